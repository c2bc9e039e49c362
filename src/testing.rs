//! Fixtures and in-memory service fakes shared by unit tests.

use crate::services::{AccountLookup, ChatRoom, NewStatus, StatusActions, UploadedMedia};
use anyhow::{bail, Result};
use async_trait::async_trait;
use feedroom_core::{
    Account, AccountId, Notification, NotificationKind, RenderedMessage, Relationship, Status,
    StatusId, Tag, Visibility,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub fn account(id: &str) -> Account {
    Account {
        id: AccountId::from(id),
        username: id.to_string(),
        acct: format!("{id}@example.social"),
        display_name: String::new(),
        url: format!("https://example.social/@{id}"),
    }
}

pub fn status(id: &str, author: &str) -> Status {
    Status {
        id: StatusId::from(id),
        account: account(author),
        visibility: Visibility::Public,
        sensitive: false,
        muted: Some(false),
        reblog: None,
        reblogged: Some(false),
        tags: vec![],
        media_attachments: vec![],
        url: Some(format!("https://example.social/@{author}/{id}")),
        uri: String::new(),
        content: format!("<p>status {id}</p>"),
    }
}

pub fn tagged(id: &str, author: &str, tags: &[&str]) -> Status {
    let mut s = status(id, author);
    s.tags = tags
        .iter()
        .map(|name| Tag {
            name: name.to_string(),
            url: String::new(),
        })
        .collect();
    s
}

pub fn reblog_of(original: Status, booster: &str) -> Status {
    let mut s = status(&format!("{}-boost", original.id), booster);
    s.reblog = Some(Box::new(original));
    s
}

pub fn follow_notification(from: &str) -> Notification {
    Notification {
        id: format!("n-{from}"),
        kind: NotificationKind::Follow,
        account: account(from),
        status: None,
    }
}

pub struct MockAccounts {
    us: String,
    following: HashSet<String>,
    fail_account: bool,
    fail_relationships: bool,
}

impl MockAccounts {
    pub fn new(us: &str) -> Self {
        Self {
            us: us.to_string(),
            following: HashSet::new(),
            fail_account: false,
            fail_relationships: false,
        }
    }

    pub fn following<'a>(mut self, ids: impl IntoIterator<Item = &'a str>) -> Self {
        self.following.extend(ids.into_iter().map(str::to_string));
        self
    }

    pub fn failing_account(mut self) -> Self {
        self.fail_account = true;
        self
    }

    pub fn failing_relationships(mut self) -> Self {
        self.fail_relationships = true;
        self
    }
}

#[async_trait]
impl AccountLookup for MockAccounts {
    async fn current_account(&self) -> Result<Account> {
        if self.fail_account {
            bail!("401 unauthorized");
        }
        Ok(account(&self.us))
    }

    async fn relationship(&self, id: &AccountId) -> Result<Relationship> {
        if self.fail_relationships {
            bail!("503 unavailable");
        }
        Ok(Relationship {
            id: id.to_string(),
            following: self.following.contains(id.as_str()),
            blocking: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Notice { room: String, body: String },
    Text { room: String, text: String },
    Image { room: String, alt: String, uri: String },
}

/// Chat fake recording everything it is asked to do.
///
/// Uploads of URLs containing `broken` fail.
#[derive(Default)]
pub struct RecordingChat {
    sent: Mutex<Vec<Sent>>,
    uploads: Mutex<Vec<String>>,
    joined: Mutex<Vec<String>>,
    download_body: Vec<u8>,
}

impl RecordingChat {
    pub fn with_download(body: &[u8]) -> Self {
        Self {
            download_body: body.to_vec(),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatRoom for RecordingChat {
    async fn send_notice(&self, room: &str, message: &RenderedMessage) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Notice {
            room: room.to_string(),
            body: message.body.clone(),
        });
        Ok(())
    }

    async fn send_text(&self, room: &str, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Text {
            room: room.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_image(&self, room: &str, alt_text: &str, media: &UploadedMedia) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Image {
            room: room.to_string(),
            alt: alt_text.to_string(),
            uri: media.content_uri.clone(),
        });
        Ok(())
    }

    async fn join_room(&self, room: &str) -> Result<()> {
        self.joined.lock().unwrap().push(room.to_string());
        Ok(())
    }

    async fn upload_from_url(&self, url: &str, _byte_limit: u64) -> Result<UploadedMedia> {
        let n = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(url.to_string());
            uploads.len()
        };
        if url.contains("broken") {
            bail!("upload of {url} failed");
        }
        Ok(UploadedMedia {
            content_uri: format!("mxc://test/{n}"),
            mime_type: "image/png".to_string(),
            byte_len: 10,
        })
    }

    async fn download(&self, _content_uri: &str, byte_limit: u64) -> Result<Vec<u8>> {
        if self.download_body.len() as u64 > byte_limit {
            bail!("media exceeds {byte_limit} bytes");
        }
        Ok(self.download_body.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Post(NewStatus),
    Reblog(StatusId),
    Unreblog(StatusId),
    Favourite(StatusId),
    Unfavourite(StatusId),
    Delete(StatusId),
    Upload(PathBuf),
}

/// Status service fake. Posted statuses get ID `100`.
#[derive(Default)]
pub struct RecordingStatuses {
    calls: Mutex<Vec<Call>>,
    fail: bool,
    upload_delay: Option<Duration>,
}

impl RecordingStatuses {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Media uploads take `delay`, leaving room for other commands to interleave.
    pub fn slow_uploads(delay: Duration) -> Self {
        Self {
            upload_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail {
            bail!("422 unprocessable");
        }
        Ok(())
    }
}

#[async_trait]
impl StatusActions for RecordingStatuses {
    async fn post_status(&self, new: NewStatus) -> Result<Status> {
        self.record(Call::Post(new))?;
        Ok(status("100", "me"))
    }

    async fn reblog(&self, id: &StatusId) -> Result<()> {
        self.record(Call::Reblog(id.clone()))
    }

    async fn unreblog(&self, id: &StatusId) -> Result<()> {
        self.record(Call::Unreblog(id.clone()))
    }

    async fn favourite(&self, id: &StatusId) -> Result<()> {
        self.record(Call::Favourite(id.clone()))
    }

    async fn unfavourite(&self, id: &StatusId) -> Result<()> {
        self.record(Call::Unfavourite(id.clone()))
    }

    async fn delete_status(&self, id: &StatusId) -> Result<()> {
        self.record(Call::Delete(id.clone()))
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Upload(path.to_path_buf()))?;
        Ok(format!("media-{}", self.calls().len()))
    }
}
