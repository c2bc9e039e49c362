//! Per-user serialization of chat commands.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

pub type UserLock = Arc<Mutex<()>>;

struct LockRequest {
    user: String,
    reply: oneshot::Sender<UserLock>,
}

/// Hands out one lock per user from a task that owns the lock table.
#[derive(Clone)]
pub struct UserLocks {
    requests: mpsc::Sender<LockRequest>,
}

impl UserLocks {
    pub fn spawn() -> Self {
        let (requests, mut rx) = mpsc::channel::<LockRequest>(16);
        tokio::spawn(async move {
            let mut locks: HashMap<String, UserLock> = HashMap::new();
            while let Some(LockRequest { user, reply }) = rx.recv().await {
                let lock = locks.entry(user).or_default();
                let _ = reply.send(Arc::clone(lock));
            }
        });
        Self { requests }
    }

    /// The lock serializing commands of `user`.
    pub async fn lock_for(&self, user: &str) -> Result<UserLock> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(LockRequest {
                user: user.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("user lock registry stopped"))?;
        response
            .await
            .map_err(|_| anyhow!("user lock registry dropped request"))
    }
}
