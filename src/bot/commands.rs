//! Reacts to messages, redactions and joins in the controlling room.

use super::action_memory::{Action, ActionMemory, RememberedAction};
use super::images::{check_image_size, ImageStore, MAX_IMAGE_BYTES};
use super::user_locks::UserLocks;
use crate::services::{ChatRoom, MessageContent, NewStatus, RoomEvent, StatusActions};
use anyhow::Result;
use feedroom_core::{check_character_limit, has_direct_recipient, parse_status_argument, StatusId, Visibility};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Command prefixes and switches of the controlling room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    pub room: String,
    pub reblog_prefix: String,
    pub favourite_prefix: String,
    pub directtoot_prefix: String,
    /// Empty means every other message is posted.
    pub guard_prefix: String,
    pub character_limit: usize,
    pub image_bytes_limit: u64,
    pub admins_can_redact_user_status: bool,
    pub join_welcome_text: Option<String>,
}

#[derive(Clone)]
pub struct CommandHandler {
    chat: Arc<dyn ChatRoom>,
    statuses: Arc<dyn StatusActions>,
    settings: Arc<BotSettings>,
    locks: UserLocks,
    memory: ActionMemory,
    images: Option<Arc<ImageStore>>,
    mark_seen: Option<mpsc::Sender<StatusId>>,
}

impl CommandHandler {
    pub fn new(
        chat: Arc<dyn ChatRoom>,
        statuses: Arc<dyn StatusActions>,
        settings: BotSettings,
        memory: ActionMemory,
        images: Option<Arc<ImageStore>>,
        mark_seen: Option<mpsc::Sender<StatusId>>,
    ) -> Self {
        Self {
            chat,
            statuses,
            settings: Arc::new(settings),
            locks: UserLocks::spawn(),
            memory,
            images,
            mark_seen,
        }
    }

    /// Handle each room event on its own task until `events` closes.
    pub fn spawn(self, mut events: mpsc::Receiver<RoomEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("command handler: started for {}", self.settings.room);
            while let Some(event) = events.recv().await {
                let handler = self.clone();
                tokio::spawn(async move { handler.handle(event).await });
            }
            info!("command handler: room event stream closed");
        })
    }

    pub async fn handle(&self, event: RoomEvent) {
        match event {
            RoomEvent::Message {
                event_id,
                sender,
                content,
            } => self.on_message(&event_id, &sender, content).await,
            RoomEvent::Redaction {
                sender, redacts, ..
            } => self.on_redaction(&sender, &redacts).await,
            RoomEvent::Member { sender, membership } => {
                if membership == "join" {
                    if let Some(text) = self.settings.join_welcome_text.as_deref() {
                        debug!("welcoming {sender}");
                        self.reply(text).await;
                    }
                }
            }
        }
    }

    async fn on_message(&self, event_id: &str, sender: &str, content: MessageContent) {
        match content {
            MessageContent::Text(body) => self.on_text(event_id, sender, &body).await,
            MessageContent::Image { url, size } => self.on_image(event_id, sender, &url, size).await,
            MessageContent::Audio | MessageContent::Video => {
                self.reply("Audio/Video files are not supported directly. Please just include its URL in your toot and Mastodon will do the rest.")
                    .await;
            }
            MessageContent::Other(kind) => debug!("ignoring {kind} message from {sender}"),
        }
    }

    async fn on_text(&self, event_id: &str, sender: &str, body: &str) {
        let s = &self.settings;
        if let Some(args) = body.strip_prefix(s.reblog_prefix.as_str()) {
            self.status_action(event_id, sender, &s.reblog_prefix, args, Action::Reblog)
                .await;
        } else if let Some(args) = body.strip_prefix(s.favourite_prefix.as_str()) {
            self.status_action(event_id, sender, &s.favourite_prefix, args, Action::Favourite)
                .await;
        } else if let Some(text) = body.strip_prefix(s.directtoot_prefix.as_str()) {
            self.post(event_id, sender, text.trim(), Some(Visibility::Direct))
                .await;
        } else if let Some(text) = body.strip_prefix(s.guard_prefix.as_str()) {
            self.post(event_id, sender, text.trim(), None).await;
        }
    }

    async fn status_action(&self, event_id: &str, sender: &str, prefix: &str, args: &str, action: Action) {
        let (verb, past) = match action {
            Action::Favourite => ("favouriting", "favourited"),
            _ => ("reblogging", "reblogged"),
        };

        let result = match parse_status_argument(prefix, args) {
            Ok(id) => {
                let done = match action {
                    Action::Favourite => self.statuses.favourite(&id).await,
                    _ => self.statuses.reblog(&id).await,
                };
                done.map(|()| id)
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(id) => {
                info!("{sender} {past} {id}");
                self.remember(event_id, sender, id, action).await;
                self.reply(&format!("Ok, I {past} that status for you")).await;
            }
            Err(e) => {
                warn!("{verb} for {sender} failed: {e:#}");
                self.reply(&format!("error {verb}: {e}")).await;
            }
        }
    }

    async fn post(&self, event_id: &str, sender: &str, text: &str, visibility: Option<Visibility>) {
        let direct = visibility == Some(Visibility::Direct);

        if let Err(e) = check_character_limit(text, self.settings.character_limit) {
            info!("not posting for {sender}: {e}");
            self.reply(&format!("Not tooting this! {e}")).await;
            return;
        }
        if direct && !has_direct_recipient(text) {
            self.reply("No can do! A direct message requires a recipient. Please mention an @username.")
                .await;
            return;
        }

        let Some(lock) = self.user_lock(sender).await else { return };
        let _guard = lock.lock().await;

        let media_ids = self.upload_user_images(sender).await;
        let new_status = NewStatus {
            text: text.to_string(),
            visibility,
            media_ids,
        };

        match self.statuses.post_status(new_status).await {
            Ok(status) => {
                if let Some(mark_seen) = &self.mark_seen {
                    if mark_seen.send(status.id.clone()).await.is_err() {
                        warn!("control room suppressor is gone, {} may be echoed", status.id);
                    }
                }
                let what = if direct { "sent direct toot!" } else { "sent toot!" };
                self.reply(&format!("{what} {}", status.link())).await;
                self.remember(event_id, sender, status.id, Action::Post).await;
            }
            Err(e) => {
                error!("posting for {sender} failed: {e:#}");
                self.reply("ERROR while tooting!").await;
            }
        }

        // Images are attached once only.
        if let Some(images) = &self.images {
            if let Err(e) = images.clear_user(sender).await {
                warn!("failed to clear images of {sender}: {e:#}");
            }
        }
    }

    async fn upload_user_images(&self, sender: &str) -> Vec<String> {
        let Some(images) = &self.images else {
            return Vec::new();
        };
        let paths = match images.images_for(sender).await {
            Ok(paths) => paths,
            Err(e) => {
                warn!("failed to list images of {sender}: {e:#}");
                return Vec::new();
            }
        };

        let mut media_ids = Vec::with_capacity(paths.len());
        for path in paths {
            match self.statuses.upload_media(&path).await {
                Ok(id) => media_ids.push(id),
                Err(e) => warn!("failed to upload {}: {e:#}", path.display()),
            }
        }
        media_ids
    }

    async fn on_image(&self, event_id: &str, sender: &str, url: &str, size: Option<u64>) {
        let Some(images) = &self.images else {
            self.reply("image support is disabled. Set [images] enabled = true").await;
            return;
        };

        if let Some(size) = size {
            if let Err(e) = check_image_size(size, self.settings.image_bytes_limit) {
                self.reply(&e.to_string()).await;
                return;
            }
        }

        let Some(lock) = self.user_lock(sender).await else { return };
        let _guard = lock.lock().await;

        let limit = self.settings.image_bytes_limit.min(MAX_IMAGE_BYTES);
        let saved: Result<_> = async {
            let bytes = self.chat.download(url, limit).await?;
            images.save(sender, event_id, &bytes).await
        }
        .await;

        match saved {
            Ok(path) => {
                debug!("stored image of {sender} at {}", path.display());
                self.reply(&format!("image saved. Will toot with {sender}'s next message"))
                    .await;
            }
            Err(e) => {
                error!("downloading image of {sender} failed: {e:#}");
                self.reply(&format!("Could not get your image! {e}")).await;
            }
        }
    }

    async fn on_redaction(&self, sender: &str, redacts: &str) {
        if let Some(images) = &self.images {
            if let Some(lock) = self.user_lock(sender).await {
                let _guard = lock.lock().await;
                match images.remove(sender, redacts).await {
                    Ok(true) => {
                        self.reply(&format!(
                            "{sender}'s image has been redacted. Next toot will not contain that image."
                        ))
                        .await;
                    }
                    Ok(false) => {}
                    Err(e) => error!("deleting image of {sender} failed: {e:#}"),
                }
            }
        }

        let remembered = match self.memory.recall(redacts).await {
            Ok(Some(remembered)) => remembered,
            Ok(None) => return,
            Err(e) => {
                warn!("action memory unavailable: {e:#}");
                return;
            }
        };

        if remembered.user != sender && !self.settings.admins_can_redact_user_status {
            self.reply("Won't redact other users status for you! Set admins_can_redact_user_status = true if you disagree.")
                .await;
            return;
        }

        let id = &remembered.status;
        let (result, done, failed) = match remembered.action {
            Action::Post => (
                self.statuses.delete_status(id).await,
                "Ok, I deleted that toot for you",
                "Could not redact your toot",
            ),
            Action::Reblog => (
                self.statuses.unreblog(id).await,
                "Ok, I un-reblogged that toot for you",
                "Could not redact your reblog",
            ),
            Action::Favourite => (
                self.statuses.unfavourite(id).await,
                "Ok, I removed your favour from that toot",
                "Could not redact your favour",
            ),
        };

        match result {
            Ok(()) => self.reply(done).await,
            Err(e) => {
                error!("undoing {:?} of {id} failed: {e:#}", remembered.action);
                self.reply(failed).await;
            }
        }
    }

    async fn remember(&self, event_id: &str, sender: &str, status: StatusId, action: Action) {
        let remembered = RememberedAction {
            user: sender.to_string(),
            status,
            action,
        };
        if let Err(e) = self.memory.store(event_id, remembered).await {
            warn!("failed to remember {event_id}: {e:#}");
        }
    }

    async fn user_lock(&self, sender: &str) -> Option<super::user_locks::UserLock> {
        match self.locks.lock_for(sender).await {
            Ok(lock) => Some(lock),
            Err(e) => {
                error!("no lock for {sender}: {e:#}");
                None
            }
        }
    }

    async fn reply(&self, text: &str) {
        info!("reply: {text}");
        if let Err(e) = self.chat.send_text(&self.settings.room, text).await {
            warn!("failed to reply in {}: {e:#}", self.settings.room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::action_memory::ACTION_MEMORY_CAPACITY;
    use crate::testing::{Call, RecordingChat, RecordingStatuses};
    use std::time::Duration;
    use tokio::time::timeout;

    const ROOM: &str = "!control:x";

    fn settings() -> BotSettings {
        BotSettings {
            room: ROOM.to_string(),
            reblog_prefix: "+reblog".to_string(),
            favourite_prefix: "+fav".to_string(),
            directtoot_prefix: "+dm".to_string(),
            guard_prefix: "+toot".to_string(),
            character_limit: 20,
            image_bytes_limit: 1000,
            admins_can_redact_user_status: false,
            join_welcome_text: Some("welcome!".to_string()),
        }
    }

    struct Fixture {
        chat: Arc<RecordingChat>,
        statuses: Arc<RecordingStatuses>,
        handler: CommandHandler,
        mark_seen: mpsc::Receiver<StatusId>,
        _parent: tempfile::TempDir,
    }

    fn fixture_with(statuses: RecordingStatuses, download: &[u8]) -> Fixture {
        let chat = Arc::new(RecordingChat::with_download(download));
        let statuses = Arc::new(statuses);
        let parent = tempfile::tempdir().unwrap();
        let images = Arc::new(ImageStore::create(parent.path(), 2).unwrap());
        let (mark_tx, mark_seen) = mpsc::channel(8);
        let handler = CommandHandler::new(
            chat.clone(),
            statuses.clone(),
            settings(),
            ActionMemory::spawn(ACTION_MEMORY_CAPACITY),
            Some(images),
            Some(mark_tx),
        );
        Fixture {
            chat,
            statuses,
            handler,
            mark_seen,
            _parent: parent,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingStatuses::default(), b"png")
    }

    fn text(event_id: &str, sender: &str, body: &str) -> RoomEvent {
        RoomEvent::Message {
            event_id: event_id.to_string(),
            sender: sender.to_string(),
            content: MessageContent::Text(body.to_string()),
        }
    }

    fn redaction(sender: &str, redacts: &str) -> RoomEvent {
        RoomEvent::Redaction {
            event_id: "$redaction".to_string(),
            sender: sender.to_string(),
            redacts: redacts.to_string(),
        }
    }

    #[tokio::test]
    async fn post_marks_seen_and_replies_with_link() {
        let mut f = fixture();
        f.handler.handle(text("$1", "@a:x", "+toot hello")).await;

        assert_eq!(
            f.statuses.calls(),
            vec![Call::Post(NewStatus {
                text: "hello".to_string(),
                visibility: None,
                media_ids: vec![],
            })]
        );
        assert_eq!(f.mark_seen.recv().await, Some(StatusId::from("100")));
        assert_eq!(
            f.chat.texts(),
            vec!["sent toot! https://example.social/@me/100"]
        );
    }

    #[tokio::test]
    async fn too_long_post_is_refused() {
        let f = fixture();
        f.handler
            .handle(text("$1", "@a:x", "+toot this text is far too long"))
            .await;
        assert!(f.statuses.calls().is_empty());
        assert!(f.chat.texts()[0].starts_with("Not tooting this!"));
    }

    #[tokio::test]
    async fn direct_post_needs_recipient() {
        let f = fixture();
        f.handler.handle(text("$1", "@a:x", "+dm hi there")).await;
        assert!(f.statuses.calls().is_empty());

        f.handler.handle(text("$2", "@a:x", "+dm hi @bob")).await;
        assert_eq!(
            f.statuses.calls(),
            vec![Call::Post(NewStatus {
                text: "hi @bob".to_string(),
                visibility: Some(Visibility::Direct),
                media_ids: vec![],
            })]
        );
        assert!(f.chat.texts()[1].starts_with("sent direct toot!"));
    }

    #[tokio::test]
    async fn reblog_and_usage_errors() {
        let f = fixture();
        f.handler.handle(text("$1", "@a:x", "+reblog toot 42")).await;
        f.handler.handle(text("$2", "@a:x", "+fav nonsense here")).await;

        assert_eq!(f.statuses.calls(), vec![Call::Reblog(StatusId::from("42"))]);
        let texts = f.chat.texts();
        assert_eq!(texts[0], "Ok, I reblogged that status for you");
        assert!(texts[1].starts_with("error favouriting: Please say +fav"));
    }

    #[tokio::test]
    async fn unprefixed_text_is_ignored() {
        let f = fixture();
        f.handler.handle(text("$1", "@a:x", "just chatting")).await;
        assert!(f.statuses.calls().is_empty());
        assert!(f.chat.sent().is_empty());
    }

    #[tokio::test]
    async fn redacting_own_post_deletes_it() {
        let f = fixture();
        f.handler.handle(text("$1", "@a:x", "+toot hello")).await;
        f.handler.handle(redaction("@a:x", "$1")).await;

        assert_eq!(f.statuses.calls()[1], Call::Delete(StatusId::from("100")));
        assert_eq!(
            f.chat.texts().last().map(String::as_str),
            Some("Ok, I deleted that toot for you")
        );
    }

    #[tokio::test]
    async fn redacting_someone_elses_action_is_refused() {
        let f = fixture();
        f.handler.handle(text("$1", "@a:x", "+fav toot 7")).await;
        f.handler.handle(redaction("@mallory:x", "$1")).await;

        assert_eq!(f.statuses.calls(), vec![Call::Favourite(StatusId::from("7"))]);
        assert!(f.chat.texts()[1].starts_with("Won't redact other users status"));
    }

    #[tokio::test]
    async fn image_is_attached_to_next_post_once() {
        let f = fixture();
        f.handler
            .handle(RoomEvent::Message {
                event_id: "$img".to_string(),
                sender: "@a:x".to_string(),
                content: MessageContent::Image {
                    url: "mxc://x/abc".to_string(),
                    size: Some(3),
                },
            })
            .await;
        assert_eq!(f.chat.texts()[0], "image saved. Will toot with @a:x's next message");

        f.handler.handle(text("$1", "@a:x", "+toot look")).await;
        f.handler.handle(text("$2", "@a:x", "+toot again")).await;

        let calls = f.statuses.calls();
        assert!(matches!(calls[0], Call::Upload(_)));
        assert!(matches!(&calls[1], Call::Post(p) if p.media_ids.len() == 1));
        assert!(matches!(&calls[2], Call::Post(p) if p.media_ids.is_empty()));
    }

    fn image(event_id: &str, sender: &str) -> RoomEvent {
        RoomEvent::Message {
            event_id: event_id.to_string(),
            sender: sender.to_string(),
            content: MessageContent::Image {
                url: "mxc://x/abc".to_string(),
                size: Some(3),
            },
        }
    }

    fn posts(calls: &[Call]) -> Vec<&NewStatus> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Post(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn concurrent_posts_of_one_user_share_an_image_once() {
        let f = fixture_with(RecordingStatuses::slow_uploads(Duration::from_millis(50)), b"png");
        f.handler.handle(image("$img", "@a:x")).await;

        tokio::join!(
            f.handler.handle(text("$1", "@a:x", "+toot one")),
            f.handler.handle(text("$2", "@a:x", "+toot two")),
        );

        let calls = f.statuses.calls();
        let posts = posts(&calls);
        assert_eq!(posts.len(), 2);
        let with_media: Vec<_> = posts.iter().filter(|p| !p.media_ids.is_empty()).collect();
        assert_eq!(with_media.len(), 1);
        assert_eq!(with_media[0].media_ids.len(), 1);
        assert_eq!(calls.iter().filter(|c| matches!(c, Call::Upload(_))).count(), 1);
    }

    #[tokio::test]
    async fn held_lock_only_blocks_its_own_user() {
        let f = fixture();
        let lock = f.handler.locks.lock_for("@a:x").await.unwrap();
        let _held = lock.lock().await;

        timeout(Duration::from_secs(1), f.handler.handle(text("$1", "@b:x", "+toot hi")))
            .await
            .expect("another user's post must not wait");
        assert_eq!(posts(&f.statuses.calls()).len(), 1);

        let blocked = timeout(Duration::from_millis(100), f.handler.handle(text("$2", "@a:x", "+toot me")))
            .await;
        assert!(blocked.is_err());
        assert_eq!(posts(&f.statuses.calls()).len(), 1);
    }

    #[tokio::test]
    async fn oversized_image_is_refused() {
        let f = fixture();
        f.handler
            .handle(RoomEvent::Message {
                event_id: "$img".to_string(),
                sender: "@a:x".to_string(),
                content: MessageContent::Image {
                    url: "mxc://x/abc".to_string(),
                    size: Some(5000),
                },
            })
            .await;
        assert!(f.chat.texts()[0].starts_with("Image too large for Mastodon"));
    }

    #[tokio::test]
    async fn failed_post_is_reported() {
        let f = fixture_with(RecordingStatuses::failing(), b"");
        f.handler.handle(text("$1", "@a:x", "+toot hello")).await;
        assert_eq!(f.chat.texts(), vec!["ERROR while tooting!"]);
    }

    #[tokio::test]
    async fn welcomes_joining_members() {
        let f = fixture();
        f.handler
            .handle(RoomEvent::Member {
                sender: "@new:x".to_string(),
                membership: "join".to_string(),
            })
            .await;
        f.handler
            .handle(RoomEvent::Member {
                sender: "@old:x".to_string(),
                membership: "leave".to_string(),
            })
            .await;
        assert_eq!(f.chat.texts(), vec!["welcome!"]);
    }
}
