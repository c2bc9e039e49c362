//! Matrix client-server API over plain REST.

use crate::pipeline::CHANNEL_CAPACITY;
use crate::services::{ChatRoom, MessageContent, RoomEvent, UploadedMedia};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use feedroom_core::RenderedMessage;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SYNC_TIMEOUT_MS: u64 = 30_000;
const SYNC_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEVICE_NAME: &str = "feedroom";

pub struct MatrixClient {
    http: Client,
    homeserver: String,
    access_token: String,
    user_id: String,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    identifier: LoginIdentifier<'a>,
    password: &'a str,
    initial_device_display_name: &'static str,
}

#[derive(Serialize)]
struct LoginIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    user: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ContentUri {
    content_uri: String,
}

#[derive(Debug, Default, Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, JoinedRoom>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinedRoom {
    #[serde(default)]
    timeline: Timeline,
}

#[derive(Debug, Default, Deserialize)]
struct Timeline {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    state_key: Option<String>,
    #[serde(default)]
    redacts: Option<String>,
    #[serde(default)]
    content: Value,
}

impl MatrixClient {
    /// Password login. `user` may be a full MXID or a localpart.
    pub async fn login(homeserver: &str, user: &str, password: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        let homeserver = homeserver.trim_end_matches('/').to_string();

        let request = LoginRequest {
            kind: "m.login.password",
            identifier: LoginIdentifier {
                kind: "m.id.user",
                user,
            },
            password,
            initial_device_display_name: DEVICE_NAME,
        };
        let response = http
            .post(format!("{homeserver}/_matrix/client/v3/login"))
            .json(&request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to reach {homeserver}"))?;
        let login: LoginResponse = check(response)
            .await
            .context("Matrix login failed")?
            .json()
            .await
            .context("Failed to decode login response")?;

        info!("Logged in to {homeserver} as {}", login.user_id);
        Ok(Self {
            http,
            homeserver,
            access_token: login.access_token,
            user_id: login.user_id,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.homeserver, path))
            .bearer_auth(&self.access_token)
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send_event(&self, room: &str, content: Value) -> Result<()> {
        let path = format!(
            "/_matrix/client/v3/rooms/{}/send/m.room.message/{}",
            urlencoding::encode(room),
            uuid::Uuid::new_v4()
        );
        check(self.request(Method::PUT, &path).json(&content).send().await?)
            .await
            .with_context(|| format!("Failed to send to {room}"))?;
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, mime_type: &str) -> Result<String> {
        let response = self
            .request(Method::POST, "/_matrix/media/v3/upload")
            .header(header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        let uploaded: ContentUri = check(response)
            .await
            .context("Media upload failed")?
            .json()
            .await?;
        Ok(uploaded.content_uri)
    }

    async fn sync_once(&self, since: Option<&str>) -> Result<SyncResponse> {
        let mut query: Vec<(&str, String)> = Vec::new();
        match since {
            Some(token) => {
                query.push(("since", token.to_string()));
                query.push(("timeout", SYNC_TIMEOUT_MS.to_string()));
            }
            None => {
                // Only the batch token matters on the first sync.
                query.push(("timeout", "0".to_string()));
                query.push(("filter", json!({"room": {"timeline": {"limit": 1}}}).to_string()));
            }
        }
        let response = self
            .request(Method::GET, "/_matrix/client/v3/sync")
            .query(&query)
            .timeout(REQUEST_TIMEOUT + Duration::from_millis(SYNC_TIMEOUT_MS))
            .send()
            .await?;
        check(response)
            .await?
            .json()
            .await
            .context("Failed to decode sync response")
    }

    /// Long-poll the homeserver and forward new events of `room`.
    pub fn spawn_sync(self: Arc<Self>, room: String) -> mpsc::Receiver<RoomEvent> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut since: Option<String> = None;
            loop {
                if tx.is_closed() {
                    break;
                }
                let sync = match self.sync_once(since.as_deref()).await {
                    Ok(sync) => sync,
                    Err(e) => {
                        warn!("Matrix sync failed: {e:#}, retrying in 5s");
                        tokio::time::sleep(SYNC_RETRY_DELAY).await;
                        continue;
                    }
                };

                if since.is_some() {
                    for event in room_events_from_sync(&sync, &room, &self.user_id) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                } else {
                    debug!("initial sync done, listening in {room}");
                }
                since = Some(sync.next_batch);
            }
        });
        rx
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    bail!("homeserver returned {status}: {body}")
}

/// Collect a response body, giving up once it grows past `limit`.
async fn read_limited(mut response: Response, limit: u64) -> Result<Vec<u8>> {
    if let Some(length) = response.content_length() {
        if length > limit {
            bail!("{length} bytes exceeds the limit of {limit}");
        }
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        body.extend_from_slice(&chunk);
        if body.len() as u64 > limit {
            bail!("body exceeds the limit of {limit} bytes");
        }
    }
    Ok(body)
}

fn split_mxc(uri: &str) -> Result<(&str, &str)> {
    uri.strip_prefix("mxc://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(server, media)| !server.is_empty() && !media.is_empty())
        .with_context(|| format!("not a content URI: {uri}"))
}

#[async_trait]
impl ChatRoom for MatrixClient {
    async fn send_notice(&self, room: &str, message: &RenderedMessage) -> Result<()> {
        self.send_event(
            room,
            json!({
                "msgtype": "m.notice",
                "body": message.body,
                "format": "org.matrix.custom.html",
                "formatted_body": message.html,
            }),
        )
        .await
    }

    async fn send_text(&self, room: &str, text: &str) -> Result<()> {
        self.send_event(room, json!({"msgtype": "m.text", "body": text}))
            .await
    }

    async fn send_image(&self, room: &str, alt_text: &str, media: &UploadedMedia) -> Result<()> {
        self.send_event(
            room,
            json!({
                "msgtype": "m.image",
                "body": alt_text,
                "url": media.content_uri,
                "info": {"mimetype": media.mime_type, "size": media.byte_len},
            }),
        )
        .await
    }

    async fn join_room(&self, room: &str) -> Result<()> {
        let path = format!("/_matrix/client/v3/join/{}", urlencoding::encode(room));
        check(self.request(Method::POST, &path).json(&json!({})).send().await?)
            .await
            .with_context(|| format!("Failed to join {room}"))?;
        info!("Joined {room}");
        Ok(())
    }

    async fn upload_from_url(&self, url: &str, byte_limit: u64) -> Result<UploadedMedia> {
        let response = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;
        let response = check(response).await?;
        let mime_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = read_limited(response, byte_limit)
            .await
            .with_context(|| format!("Refusing {url}"))?;
        let byte_len = bytes.len() as u64;

        let content_uri = self.upload(bytes, &mime_type).await?;
        debug!("re-hosted {url} as {content_uri}");
        Ok(UploadedMedia {
            content_uri,
            mime_type,
            byte_len,
        })
    }

    async fn download(&self, content_uri: &str, byte_limit: u64) -> Result<Vec<u8>> {
        let (server, media_id) = split_mxc(content_uri)?;
        let authenticated = format!("/_matrix/client/v1/media/download/{server}/{media_id}");
        let mut response = self.request(Method::GET, &authenticated).send().await?;

        // Homeservers without authenticated media only serve the legacy path.
        if response.status() == StatusCode::NOT_FOUND {
            let legacy = format!("/_matrix/media/v3/download/{server}/{media_id}");
            response = self.request(Method::GET, &legacy).send().await?;
        }
        let response = check(response)
            .await
            .with_context(|| format!("Failed to download {content_uri}"))?;
        read_limited(response, byte_limit).await
    }
}

/// Turn one sync batch into the events the command handler cares about.
fn room_events_from_sync(sync: &SyncResponse, room: &str, own_user: &str) -> Vec<RoomEvent> {
    let Some(joined) = sync.rooms.join.get(room) else {
        return Vec::new();
    };
    joined
        .timeline
        .events
        .iter()
        .filter(|event| event.sender != own_user)
        .filter_map(room_event)
        .collect()
}

fn room_event(event: &RawEvent) -> Option<RoomEvent> {
    match event.kind.as_str() {
        "m.room.message" => {
            // Edits are new events carrying the replacement; they are not new commands.
            if event.content["m.relates_to"]["rel_type"] == "m.replace" {
                return None;
            }
            let body = event.content["body"].as_str().unwrap_or_default();
            let content = match event.content["msgtype"].as_str().unwrap_or_default() {
                "m.text" => MessageContent::Text(body.to_string()),
                "m.image" => MessageContent::Image {
                    url: event.content["url"].as_str()?.to_string(),
                    size: event.content["info"]["size"].as_u64(),
                },
                "m.audio" => MessageContent::Audio,
                "m.video" => MessageContent::Video,
                other => MessageContent::Other(other.to_string()),
            };
            Some(RoomEvent::Message {
                event_id: event.event_id.clone(),
                sender: event.sender.clone(),
                content,
            })
        }
        "m.room.redaction" => {
            // Room version 11 moved `redacts` into the content.
            let redacts = event
                .redacts
                .clone()
                .or_else(|| event.content["redacts"].as_str().map(str::to_string))?;
            Some(RoomEvent::Redaction {
                event_id: event.event_id.clone(),
                sender: event.sender.clone(),
                redacts,
            })
        }
        "m.room.member" => Some(RoomEvent::Member {
            sender: event.state_key.clone().unwrap_or_else(|| event.sender.clone()),
            membership: event.content["membership"].as_str()?.to_string(),
        }),
        _ => None,
    }
}
