//! Re-hosting of remote media on the chat server.
//!
//! One task owns the upload cache and handles requests strictly in order,
//! so concurrent requests for the same URL result in a single upload.

use crate::pipeline::CHANNEL_CAPACITY;
use crate::services::{ChatRoom, UploadedMedia};
use anyhow::{anyhow, Result};
use feedroom_core::{BoundedCache, CacheError};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const UPLOAD_CACHE_BUCKETS: usize = 70;
const UPLOAD_CACHE_BUCKET_CAPACITY: usize = 9;

struct UploadRequest {
    url: String,
    reply: oneshot::Sender<Result<UploadedMedia>>,
}

/// Handle to the attachment relay task. Cheap to clone.
#[derive(Clone)]
pub struct AttachmentRelay {
    requests: mpsc::Sender<UploadRequest>,
}

impl AttachmentRelay {
    /// Start the relay task. Uploads larger than `byte_limit` are refused.
    pub fn spawn(chat: Arc<dyn ChatRoom>, byte_limit: u64) -> Result<Self, CacheError> {
        let cache = BoundedCache::new(UPLOAD_CACHE_BUCKETS, UPLOAD_CACHE_BUCKET_CAPACITY)?;
        let (requests, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run(chat, byte_limit, cache, rx));
        Ok(Self { requests })
    }

    /// Upload `url` to the chat server, or return the earlier upload of it.
    pub async fn rehost(&self, url: &str) -> Result<UploadedMedia> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(UploadRequest {
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| anyhow!("attachment relay stopped"))?;
        response
            .await
            .map_err(|_| anyhow!("attachment relay dropped request for {url}"))?
    }
}

async fn run(
    chat: Arc<dyn ChatRoom>,
    byte_limit: u64,
    mut cache: BoundedCache<UploadedMedia>,
    mut requests: mpsc::Receiver<UploadRequest>,
) {
    info!("attachment relay: started");
    while let Some(UploadRequest { url, reply }) = requests.recv().await {
        let result = match cache.get(&url) {
            Some(media) => {
                debug!("attachment relay: {url} already uploaded as {}", media.content_uri);
                Ok(media.clone())
            }
            None => match chat.upload_from_url(&url, byte_limit).await {
                Ok(media) => {
                    cache.set(url.as_str(), media.clone());
                    Ok(media)
                }
                Err(e) => {
                    warn!("attachment relay: uploading {url} failed: {e:#}");
                    Err(e)
                }
            },
        };
        // The requester may have given up.
        let _ = reply.send(result);
    }
    info!("attachment relay: stopped");
}
