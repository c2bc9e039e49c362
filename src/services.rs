//! Seams between the relay and the outside world.
//!
//! The pipeline only talks to the timeline service and the chat service
//! through these traits, so stages can be exercised with in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use feedroom_core::{Account, AccountId, RenderedMessage, Relationship, Status, StatusId, TaggedEvent, Visibility};
use std::path::Path;
use tokio::sync::mpsc;

/// Which streaming timeline to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamSource {
    /// Home timeline plus notifications of the local account.
    User,
    Hashtag(String),
}

impl std::fmt::Display for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Hashtag(tag) => write!(f, "#{tag}"),
        }
    }
}

#[async_trait]
pub trait StatusStream: Send + Sync {
    /// Open a subscription. Failing to connect the first time is an error;
    /// later disconnects are handled by the implementation.
    async fn subscribe(&self, source: StreamSource) -> Result<mpsc::Receiver<TaggedEvent>>;
}

#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn current_account(&self) -> Result<Account>;
    async fn relationship(&self, account: &AccountId) -> Result<Relationship>;
}

/// A status to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStatus {
    pub text: String,
    /// Server default when `None`.
    pub visibility: Option<Visibility>,
    pub media_ids: Vec<String>,
}

#[async_trait]
pub trait StatusActions: Send + Sync {
    async fn post_status(&self, status: NewStatus) -> Result<Status>;
    async fn reblog(&self, id: &StatusId) -> Result<()>;
    async fn unreblog(&self, id: &StatusId) -> Result<()>;
    async fn favourite(&self, id: &StatusId) -> Result<()>;
    async fn unfavourite(&self, id: &StatusId) -> Result<()>;
    async fn delete_status(&self, id: &StatusId) -> Result<()>;
    /// Upload a media file and return its media ID.
    async fn upload_media(&self, path: &Path) -> Result<String>;
}

/// Media re-hosted on the chat server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    /// `mxc://` URI.
    pub content_uri: String,
    pub mime_type: String,
    pub byte_len: u64,
}

#[async_trait]
pub trait ChatRoom: Send + Sync {
    async fn send_notice(&self, room: &str, message: &RenderedMessage) -> Result<()>;
    async fn send_text(&self, room: &str, text: &str) -> Result<()>;
    async fn send_image(&self, room: &str, alt_text: &str, media: &UploadedMedia) -> Result<()>;
    async fn join_room(&self, room: &str) -> Result<()>;
    /// Fetch `url` and upload it to the chat server, refusing anything
    /// larger than `byte_limit`.
    async fn upload_from_url(&self, url: &str, byte_limit: u64) -> Result<UploadedMedia>;
    /// Download chat-server content, refusing anything larger than `byte_limit`.
    async fn download(&self, content_uri: &str, byte_limit: u64) -> Result<Vec<u8>>;
}

/// Events of the controlling room that the command handler reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Message {
        event_id: String,
        sender: String,
        content: MessageContent,
    },
    Redaction {
        event_id: String,
        sender: String,
        redacts: String,
    },
    Member {
        sender: String,
        membership: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Image {
        url: String,
        /// Byte size announced by the sending client.
        size: Option<u64>,
    },
    Audio,
    Video,
    Other(String),
}
