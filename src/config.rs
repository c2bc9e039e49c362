use crate::bot::BotSettings;
use crate::pipeline::{Destination, FilterConfig, PipelinePlan};
use crate::relay::RoomLimits;
use anyhow::{Context, Result};
use feedroom_core::Visibility;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub mastodon: MastodonConfig,
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub feed2matrix: FeedConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MastodonConfig {
    pub server: String,
    /// Falls back to MASTODON_ACCESS_TOKEN.
    pub access_token: Option<String>,
    #[serde(default = "default_mastodon_character_limit")]
    pub character_limit: usize,
    #[serde(default = "default_mastodon_image_bytes_limit")]
    pub image_bytes_limit: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MatrixConfig {
    pub url: String,
    pub user: String,
    /// Falls back to MATRIX_PASSWORD.
    pub password: Option<String>,
    /// The controlling room.
    pub room_id: String,
    #[serde(default = "default_reblog_prefix")]
    pub reblog_prefix: String,
    #[serde(default = "default_favourite_prefix")]
    pub favourite_prefix: String,
    #[serde(default = "default_directtoot_prefix")]
    pub directtoot_prefix: String,
    #[serde(default)]
    pub guard_prefix: String,
    #[serde(default)]
    pub admins_can_redact_user_status: bool,
    #[serde(default)]
    pub join_welcome_text: Option<String>,
    #[serde(default = "default_true")]
    pub show_mastodon_notifications: bool,
    #[serde(default = "default_true")]
    pub show_own_toots_from_foreign_clients: bool,
    #[serde(default)]
    pub show_complete_home_stream: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FeedConfig {
    #[serde(default, deserialize_with = "string_or_list")]
    pub subscribe_tagstreams: Vec<String>,
    /// Character limit of forwarded notices.
    #[serde(default = "default_notice_character_limit")]
    pub character_limit: usize,
    #[serde(default = "default_feed_image_bytes_limit")]
    pub image_bytes_limit: u64,
    #[serde(default = "default_feed_image_count_limit")]
    pub image_count_limit: usize,
    #[serde(default)]
    pub configurations: Vec<DestinationConfig>,
}

/// One `[[feed2matrix.configurations]]` block.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DestinationConfig {
    pub name: String,
    #[serde(default)]
    pub target_room: String,
    #[serde(default)]
    pub filter_reblogs: bool,
    #[serde(default)]
    pub filter_unfollowed: bool,
    #[serde(default)]
    pub filter_sensitive: bool,
    #[serde(default = "default_true")]
    pub filter_otherpeoplesposts: bool,
    #[serde(default = "default_true")]
    pub filter_myposts: bool,
    #[serde(default, deserialize_with = "string_or_list")]
    pub filter_visibility: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub filter_for_tags: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImagesConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subscribe_tagstreams: Vec::new(),
            character_limit: default_notice_character_limit(),
            image_bytes_limit: default_feed_image_bytes_limit(),
            image_count_limit: default_feed_image_count_limit(),
            configurations: Vec::new(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            temp_dir: default_temp_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_mastodon_character_limit() -> usize {
    500
}

fn default_mastodon_image_bytes_limit() -> u64 {
    8 * 1024 * 1024
}

fn default_reblog_prefix() -> String {
    "+reblog".to_string()
}

fn default_favourite_prefix() -> String {
    "+fav".to_string()
}

fn default_directtoot_prefix() -> String {
    "+dm".to_string()
}

fn default_notice_character_limit() -> usize {
    1000
}

fn default_feed_image_bytes_limit() -> u64 {
    4 * 1024 * 1024
}

fn default_feed_image_count_limit() -> usize {
    8
}

fn default_temp_dir() -> String {
    "/tmp".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Accept `["a", "b"]` as well as `"a b"`.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => s.split_whitespace().map(str::to_string).collect(),
        StringOrList::List(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

fn require_http(what: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{what} must start with http:// or https://");
    }
    Ok(())
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse TOML config")?;

        if config.mastodon.access_token.is_none() {
            config.mastodon.access_token = std::env::var("MASTODON_ACCESS_TOKEN").ok();
        }
        if config.matrix.password.is_none() {
            config.matrix.password = std::env::var("MATRIX_PASSWORD").ok();
        }

        Ok(config)
    }

    pub fn expand_paths(&mut self) -> Result<()> {
        self.images.temp_dir = shellexpand::tilde(&self.images.temp_dir).to_string();
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        require_http("Mastodon server URL", &self.mastodon.server)?;
        require_http("Matrix homeserver URL", &self.matrix.url)?;

        if self.mastodon.access_token.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("Mastodon access_token is not set (config or MASTODON_ACCESS_TOKEN)");
        }
        if self.matrix.user.is_empty() {
            anyhow::bail!("Matrix user is not set");
        }
        if self.matrix.password.as_deref().unwrap_or("").is_empty() {
            anyhow::bail!("Matrix password is not set (config or MATRIX_PASSWORD)");
        }
        if self.matrix.room_id.is_empty() {
            anyhow::bail!("Matrix room_id is not set");
        }

        for (name, prefix) in [
            ("reblog_prefix", &self.matrix.reblog_prefix),
            ("favourite_prefix", &self.matrix.favourite_prefix),
            ("directtoot_prefix", &self.matrix.directtoot_prefix),
        ] {
            if prefix.is_empty() {
                anyhow::bail!("Matrix {name} must not be empty");
            }
        }

        if self.mastodon.character_limit == 0 || self.feed2matrix.character_limit == 0 {
            anyhow::bail!("Character limits must be positive");
        }
        if self.mastodon.image_bytes_limit == 0
            || self.feed2matrix.image_bytes_limit == 0
            || self.feed2matrix.image_count_limit == 0
        {
            anyhow::bail!("Image limits must be positive");
        }

        for block in &self.feed2matrix.configurations {
            if block.target_room.is_empty() {
                anyhow::bail!("target_room in feed2matrix configuration '{}' is not set", block.name);
            }
            block.filter_config()?;
        }

        Ok(())
    }

    pub fn pipeline_plan(&self) -> Result<PipelinePlan> {
        let destinations = self
            .feed2matrix
            .configurations
            .iter()
            .map(|block| {
                Ok(Destination {
                    room: block.target_room.clone(),
                    filter: block.filter_config()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PipelinePlan {
            show_complete_home_stream: self.matrix.show_complete_home_stream,
            destinations,
        })
    }

    pub fn bot_settings(&self) -> BotSettings {
        BotSettings {
            room: self.matrix.room_id.clone(),
            reblog_prefix: self.matrix.reblog_prefix.clone(),
            favourite_prefix: self.matrix.favourite_prefix.clone(),
            directtoot_prefix: self.matrix.directtoot_prefix.clone(),
            guard_prefix: self.matrix.guard_prefix.clone(),
            character_limit: self.mastodon.character_limit,
            image_bytes_limit: self.mastodon.image_bytes_limit,
            admins_can_redact_user_status: self.matrix.admins_can_redact_user_status,
            join_welcome_text: self
                .matrix
                .join_welcome_text
                .clone()
                .filter(|text| !text.is_empty()),
        }
    }

    pub fn room_limits(&self) -> RoomLimits {
        RoomLimits {
            character_limit: self.feed2matrix.character_limit,
            image_count_limit: self.feed2matrix.image_count_limit,
            image_bytes_limit: self.feed2matrix.image_bytes_limit,
        }
    }

    /// Hashtag streams to subscribe to, without leading `#`.
    pub fn tag_streams(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in &self.feed2matrix.subscribe_tagstreams {
            let tag = tag.trim_start_matches('#').to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

impl DestinationConfig {
    pub fn filter_config(&self) -> Result<FilterConfig> {
        let allowed_visibility = self
            .filter_visibility
            .iter()
            .map(|v| v.parse::<Visibility>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid filter_visibility in configuration '{}'", self.name))?;
        let tag_names: Vec<String> = self
            .filter_for_tags
            .iter()
            .map(|t| t.trim_start_matches('#').to_string())
            .collect();

        Ok(FilterConfig {
            name: self.name.clone(),
            must_be_unmuted: true,
            must_not_be_sensitive: self.filter_sensitive,
            must_be_original: self.filter_reblogs,
            must_be_written_by_us: self.filter_otherpeoplesposts,
            must_not_be_written_by_us: self.filter_myposts,
            check_visibility: !allowed_visibility.is_empty(),
            allowed_visibility,
            must_be_followed_by_us: self.filter_unfollowed,
            check_tagnames: !tag_names.is_empty(),
            tag_names,
        })
    }
}
