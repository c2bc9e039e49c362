//! Status, notification and account types as delivered by the timeline service.
//!
//! Field names follow the Mastodon REST/streaming JSON so the transport can
//! deserialize straight into these types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Globally unique status identifier (opaque string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub String);

impl StatusId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StatusId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StatusId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    #[serde(default)]
    pub username: String,
    /// `user` for local accounts, `user@host` for remote ones.
    #[serde(default)]
    pub acct: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
    Private,
    Direct,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Gifv,
    Video,
    Audio,
    #[serde(other)]
    Unknown,
}

/// Size information of the original media file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Byte size, when the server reports one.
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    #[serde(default)]
    pub original: Option<MediaInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    /// Alt text.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub meta: Option<AttachmentMeta>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        matches!(self.kind, AttachmentKind::Image | AttachmentKind::Gifv)
    }

    /// Remote URL first, then the local copy, then the preview.
    pub fn best_url(&self) -> Option<&str> {
        [&self.remote_url, &self.url, &self.preview_url]
            .into_iter()
            .filter_map(|u| u.as_deref())
            .find(|u| !u.is_empty())
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.original().and_then(|o| o.file_size)
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let original = self.original()?;
        Some((original.width?, original.height?))
    }

    fn original(&self) -> Option<&MediaInfo> {
        self.meta.as_ref().and_then(|m| m.original.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub account: Account,
    pub visibility: Visibility,
    #[serde(default)]
    pub sensitive: bool,
    /// `None` when the server did not say (e.g. unauthenticated views).
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub reblog: Option<Box<Status>>,
    /// Whether we have boosted it ourselves.
    #[serde(default)]
    pub reblogged: Option<bool>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub media_attachments: Vec<Attachment>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub uri: String,
    /// HTML body.
    #[serde(default)]
    pub content: String,
}

impl Status {
    /// A boost, or a status we have boosted already.
    pub fn is_reblog(&self) -> bool {
        self.reblog.is_some() || self.reblogged == Some(true)
    }

    pub fn is_muted(&self) -> bool {
        self.muted == Some(true)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    /// Link for humans: the web URL if present, else the ActivityPub URI.
    pub fn link(&self) -> &str {
        self.url.as_deref().filter(|u| !u.is_empty()).unwrap_or(self.uri.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Reblog,
    Favourite,
    Follow,
    FollowRequest,
    Poll,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub account: Account,
    #[serde(default)]
    pub status: Option<Status>,
}

/// Relationship of the local account towards another account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub following: bool,
    #[serde(default)]
    pub blocking: bool,
}

/// One event from a streaming subscription.
#[derive(Debug, Clone)]
pub enum TaggedEvent {
    Update(Arc<Status>),
    Notification(Notification),
    Delete(StatusId),
    Error(String),
}

impl TaggedEvent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Notification(_) => "notification",
            Self::Delete(_) => "delete",
            Self::Error(_) => "error",
        }
    }
}
