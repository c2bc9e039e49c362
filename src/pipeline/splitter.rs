//! Demultiplexes one streaming subscription into statuses and notifications.

use super::StatusSender;
use feedroom_core::{Notification, TaggedEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn a splitter reading `events` until the subscription closes.
///
/// Outputs that are `None`, or whose receiver has gone away, swallow their
/// events. Delete and error events are logged and dropped.
pub fn spawn(
    name: impl Into<String>,
    mut events: mpsc::Receiver<TaggedEvent>,
    mut statuses: Option<StatusSender>,
    mut notifications: Option<mpsc::Sender<Notification>>,
) -> JoinHandle<()> {
    let name = name.into();
    tokio::spawn(async move {
        info!("splitter {name}: started");
        while let Some(event) = events.recv().await {
            match event {
                TaggedEvent::Update(status) => {
                    if let Some(tx) = &statuses {
                        if tx.send(status).await.is_err() {
                            warn!("splitter {name}: status output closed, detaching");
                            statuses = None;
                        }
                    }
                }
                TaggedEvent::Notification(notification) => {
                    if let Some(tx) = &notifications {
                        if tx.send(notification).await.is_err() {
                            warn!("splitter {name}: notification output closed, detaching");
                            notifications = None;
                        }
                    }
                }
                TaggedEvent::Delete(id) => {
                    debug!("splitter {name}: ignoring delete of {id}");
                }
                TaggedEvent::Error(e) => {
                    warn!("splitter {name}: stream error: {e}");
                }
            }
        }
        info!("splitter {name}: event source closed");
    })
}
