//! Remembers which chat message caused which status action, so a redaction
//! of the message can undo it.

use anyhow::{anyhow, Result};
use feedroom_core::StatusId;
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Default number of remembered actions.
pub const ACTION_MEMORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Post,
    Reblog,
    Favourite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RememberedAction {
    /// Chat user who issued the command.
    pub user: String,
    pub status: StatusId,
    pub action: Action,
}

enum Request {
    Store {
        event_id: String,
        action: RememberedAction,
    },
    Recall {
        event_id: String,
        reply: oneshot::Sender<Option<RememberedAction>>,
    },
}

#[derive(Clone)]
pub struct ActionMemory {
    requests: mpsc::Sender<Request>,
}

impl ActionMemory {
    pub fn spawn(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let (requests, mut rx) = mpsc::channel(20);
        tokio::spawn(async move {
            let mut memory: LruCache<String, RememberedAction> = LruCache::new(capacity);
            while let Some(request) = rx.recv().await {
                match request {
                    Request::Store { event_id, action } => {
                        debug!("action memory: {event_id} -> {:?} {}", action.action, action.status);
                        memory.put(event_id, action);
                    }
                    Request::Recall { event_id, reply } => {
                        let _ = reply.send(memory.get(&event_id).cloned());
                    }
                }
            }
        });
        Self { requests }
    }

    pub async fn store(&self, event_id: &str, action: RememberedAction) -> Result<()> {
        self.requests
            .send(Request::Store {
                event_id: event_id.to_string(),
                action,
            })
            .await
            .map_err(|_| anyhow!("action memory stopped"))
    }

    pub async fn recall(&self, event_id: &str) -> Result<Option<RememberedAction>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Recall {
                event_id: event_id.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("action memory stopped"))?;
        response.await.map_err(|_| anyhow!("action memory dropped request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(user: &str, id: &str) -> RememberedAction {
        RememberedAction {
            user: user.to_string(),
            status: StatusId::from(id),
            action: Action::Post,
        }
    }

    #[tokio::test]
    async fn store_then_recall() {
        let memory = ActionMemory::spawn(ACTION_MEMORY_CAPACITY);
        memory.store("$ev1", post("@a:x", "1")).await.unwrap();
        assert_eq!(memory.recall("$ev1").await.unwrap(), Some(post("@a:x", "1")));
        assert_eq!(memory.recall("$missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn forgets_least_recently_used() {
        let memory = ActionMemory::spawn(2);
        memory.store("$1", post("@a:x", "1")).await.unwrap();
        memory.store("$2", post("@a:x", "2")).await.unwrap();
        memory.recall("$1").await.unwrap();
        memory.store("$3", post("@a:x", "3")).await.unwrap();

        assert!(memory.recall("$1").await.unwrap().is_some());
        assert!(memory.recall("$2").await.unwrap().is_none());
        assert!(memory.recall("$3").await.unwrap().is_some());
    }
}
