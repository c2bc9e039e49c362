//! Mastodon REST and streaming client.

use crate::pipeline::CHANNEL_CAPACITY;
use crate::services::{AccountLookup, NewStatus, StatusActions, StatusStream, StreamSource};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use feedroom_core::{Account, AccountId, Notification, Relationship, Status, StatusId, TaggedEvent, Visibility};
use futures_util::{Stream, StreamExt};
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MastodonClient {
    http: Client,
    server: String,
    access_token: String,
}

#[derive(Serialize)]
struct PostStatusBody {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    media_ids: Vec<String>,
}

#[derive(Deserialize)]
struct MediaUploaded {
    id: String,
}

impl MastodonClient {
    pub fn new(server: &str, access_token: &str) -> Result<Self> {
        // No overall timeout: streaming responses stay open indefinitely.
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            server: server.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.server, path))
            .bearer_auth(&self.access_token)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = check(request.timeout(REQUEST_TIMEOUT).send().await?).await?;
        response.json().await.context("Failed to decode Mastodon response")
    }

    async fn call_unit(&self, request: RequestBuilder) -> Result<()> {
        check(request.timeout(REQUEST_TIMEOUT).send().await?).await?;
        Ok(())
    }

    async fn status_action(&self, id: &StatusId, action: &str) -> Result<()> {
        let path = format!("/api/v1/statuses/{id}/{action}");
        self.call_unit(self.request(Method::POST, &path))
            .await
            .with_context(|| format!("Failed to {action} status {id}"))
    }

    async fn open_stream(&self, source: &StreamSource) -> Result<Response> {
        let request = match source {
            StreamSource::User => self.request(Method::GET, "/api/v1/streaming/user"),
            StreamSource::Hashtag(tag) => self
                .request(Method::GET, "/api/v1/streaming/hashtag")
                .query(&[("tag", tag.as_str())]),
        };
        let response = request
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        check(response).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("Mastodon returned {status}: {body}")
}

#[async_trait]
impl AccountLookup for MastodonClient {
    async fn current_account(&self) -> Result<Account> {
        self.call(self.request(Method::GET, "/api/v1/accounts/verify_credentials"))
            .await
            .context("Failed to verify Mastodon credentials")
    }

    async fn relationship(&self, account: &AccountId) -> Result<Relationship> {
        let request = self
            .request(Method::GET, "/api/v1/accounts/relationships")
            .query(&[("id[]", account.as_str())]);
        let relationships: Vec<Relationship> = self.call(request).await?;
        relationships
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no relationship returned for {account}"))
    }
}

#[async_trait]
impl StatusActions for MastodonClient {
    async fn post_status(&self, new: NewStatus) -> Result<Status> {
        let body = PostStatusBody {
            status: new.text,
            visibility: new.visibility,
            media_ids: new.media_ids,
        };
        self.call(self.request(Method::POST, "/api/v1/statuses").json(&body))
            .await
            .context("Failed to post status")
    }

    async fn reblog(&self, id: &StatusId) -> Result<()> {
        self.status_action(id, "reblog").await
    }

    async fn unreblog(&self, id: &StatusId) -> Result<()> {
        self.status_action(id, "unreblog").await
    }

    async fn favourite(&self, id: &StatusId) -> Result<()> {
        self.status_action(id, "favourite").await
    }

    async fn unfavourite(&self, id: &StatusId) -> Result<()> {
        self.status_action(id, "unfavourite").await
    }

    async fn delete_status(&self, id: &StatusId) -> Result<()> {
        self.call_unit(self.request(Method::DELETE, &format!("/api/v1/statuses/{id}")))
            .await
            .with_context(|| format!("Failed to delete status {id}"))
    }

    async fn upload_media(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let form = multipart::Form::new().part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let uploaded: MediaUploaded = self
            .call(self.request(Method::POST, "/api/v2/media").multipart(form))
            .await
            .context("Failed to upload media")?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl StatusStream for MastodonClient {
    async fn subscribe(&self, source: StreamSource) -> Result<mpsc::Receiver<TaggedEvent>> {
        let first = self
            .open_stream(&source)
            .await
            .with_context(|| format!("Failed to subscribe to the {source} stream"))?;
        info!("Subscribed to the {source} stream");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move {
            let mut response = Some(first);
            loop {
                if let Some(r) = response.take() {
                    match pump(r.bytes_stream(), &tx).await {
                        Ok(()) => info!("{source} stream ended"),
                        Err(e) => warn!("{source} stream failed: {e:#}"),
                    }
                }
                if tx.is_closed() {
                    info!("{source} stream has no consumers left");
                    break;
                }

                tokio::time::sleep(RECONNECT_DELAY).await;
                match client.open_stream(&source).await {
                    Ok(r) => {
                        info!("Reconnected to the {source} stream");
                        response = Some(r);
                    }
                    Err(e) => warn!("Reconnecting to the {source} stream failed: {e:#}, retrying in 5s"),
                }
            }
        });
        Ok(rx)
    }
}

/// Forward decoded events from one streaming body until it ends or
/// nobody listens anymore.
async fn pump<S, B, E>(body: S, tx: &mpsc::Sender<TaggedEvent>) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut frames = pin!(body.eventsource());
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| anyhow!("stream read failed: {e}"))?;
        if let Some(event) = decode_frame(&frame.event, &frame.data) {
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn decode_frame(kind: &str, data: &str) -> Option<TaggedEvent> {
    let event = match kind {
        "update" => match serde_json::from_str::<Status>(data) {
            Ok(status) => TaggedEvent::Update(Arc::new(status)),
            Err(e) => TaggedEvent::Error(format!("undecodable update: {e}")),
        },
        "notification" => match serde_json::from_str::<Notification>(data) {
            Ok(notification) => TaggedEvent::Notification(notification),
            Err(e) => TaggedEvent::Error(format!("undecodable notification: {e}")),
        },
        "delete" => TaggedEvent::Delete(StatusId::from(data.trim())),
        other => {
            debug!("skipping {other} stream event");
            return None;
        }
    };
    Some(event)
}
