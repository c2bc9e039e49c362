//! Terminal consumers writing statuses and notifications into chat rooms.

use super::AttachmentRelay;
use crate::pipeline::StatusReceiver;
use crate::services::ChatRoom;
use feedroom_core::{format_notification, format_status, Attachment, Notification, Status};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Limits applied when writing a status into a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomLimits {
    /// Characters of status text in a notice.
    pub character_limit: usize,
    /// Statuses with more attachments than this get none re-hosted.
    pub image_count_limit: usize,
    pub image_bytes_limit: u64,
}

/// Writes statuses into one room.
#[derive(Clone)]
pub struct RoomWriter {
    chat: Arc<dyn ChatRoom>,
    attachments: AttachmentRelay,
    room: String,
    limits: RoomLimits,
}

impl RoomWriter {
    pub fn new(
        chat: Arc<dyn ChatRoom>,
        attachments: AttachmentRelay,
        room: impl Into<String>,
        limits: RoomLimits,
    ) -> Self {
        Self {
            chat,
            attachments,
            room: room.into(),
            limits,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Send the status as a notice, followed by its images.
    pub async fn write_status(&self, status: &Status) {
        info!("room {}: forwarding status {}", self.room, status.id);
        let message = format_status(status, self.limits.character_limit);
        if let Err(e) = self.chat.send_notice(&self.room, &message).await {
            warn!("room {}: failed to send status {}: {e:#}", self.room, status.id);
        }

        for (url, alt) in images_to_rehost(status, &self.limits) {
            match self.attachments.rehost(url).await {
                Ok(media) => {
                    if let Err(e) = self.chat.send_image(&self.room, alt, &media).await {
                        warn!("room {}: failed to send image {url}: {e:#}", self.room);
                    }
                }
                Err(e) => warn!("room {}: dropping image {url}: {e:#}", self.room),
            }
        }
    }

    pub async fn write_notification(&self, notification: &Notification) {
        let message = format_notification(notification, self.limits.character_limit);
        if let Err(e) = self.chat.send_notice(&self.room, &message).await {
            warn!("room {}: failed to send notification: {e:#}", self.room);
        }
    }

    /// Write every status arriving on `statuses` until it closes.
    pub fn spawn(self, mut statuses: StatusReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("room {}: writer started", self.room);
            while let Some(status) = statuses.recv().await {
                self.write_status(&status).await;
            }
            info!("room {}: writer stopped", self.room);
        })
    }
}

/// `(url, alt text)` of each image attachment worth re-hosting.
///
/// Nothing is re-hosted for statuses with more attachments than the count
/// limit. Images whose reported size exceeds the byte limit are skipped;
/// unknown sizes are left to the upload to enforce.
fn images_to_rehost<'a>(status: &'a Status, limits: &RoomLimits) -> Vec<(&'a str, &'a str)> {
    let attachments = &status.media_attachments;
    if attachments.is_empty() || attachments.len() > limits.image_count_limit {
        return Vec::new();
    }

    attachments
        .iter()
        .filter(|a| a.is_image())
        .filter(|a| within_byte_limit(a, limits.image_bytes_limit))
        .filter_map(|a| Some((a.best_url()?, a.description.as_deref().unwrap_or(""))))
        .collect()
}

fn within_byte_limit(attachment: &Attachment, limit: u64) -> bool {
    match attachment.byte_size() {
        Some(size) if size > limit => {
            debug!("ignoring image of {size} bytes, limit is {limit}");
            false
        }
        _ => true,
    }
}

/// Controlling-room writer: notifications and our own deduplicated statuses.
pub struct ControlRoomWriter {
    pub writer: RoomWriter,
    pub show_notifications: bool,
    pub show_statuses: bool,
}

impl ControlRoomWriter {
    pub fn spawn(
        self,
        mut statuses: StatusReceiver,
        mut notifications: mpsc::Receiver<Notification>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("control room {}: writer started", self.writer.room());
            let (mut statuses_open, mut notifications_open) = (true, true);
            while statuses_open || notifications_open {
                tokio::select! {
                    next = notifications.recv(), if notifications_open => match next {
                        Some(notification) if self.show_notifications => {
                            self.writer.write_notification(&notification).await;
                        }
                        Some(_) => {}
                        None => notifications_open = false,
                    },
                    next = statuses.recv(), if statuses_open => match next {
                        Some(status) if self.show_statuses => self.writer.write_status(&status).await,
                        Some(status) => debug!("control room: not showing {}", status.id),
                        None => statuses_open = false,
                    },
                }
            }
            info!("control room {}: writer stopped", self.writer.room());
        })
    }
}
