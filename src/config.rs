//! Configuration types for chat-media-dl
//!
//! The configuration is layered. Each source rule (channel, category, server,
//! user, or the global `all` rule) carries a [`SourceSettings`] in which every
//! field is optional. Missing fields fall back to [`Config::defaults`] and then
//! to the hardcoded defaults in this module. The fallback is applied once per
//! load by [`crate::router::ResolvedConfig`], never at lookup time.

use crate::error::{Error, Result};
use crate::types::{ChannelId, GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP behaviour of the download pipeline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Timeout for a single media request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent with media requests (default: a desktop browser string)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Fixed delay between download attempts (default: 5 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// History backfill settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of jobs running at once (default: 3, zero or negative = unlimited)
    #[serde(default = "default_max_running_jobs")]
    pub max_running_jobs: i32,

    /// How often the scheduler promotes waiting jobs (default: 5 seconds)
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// Pause before re-requesting an empty history page (default: 1 second)
    #[serde(default = "default_empty_page_retry_delay", with = "duration_serde")]
    pub empty_page_retry_delay: Duration,

    /// Post and edit a progress message in the requesting channel (default: true)
    #[serde(default = "default_true")]
    pub status_updates: bool,

    /// Directory holding resumption cursors (default: "./cache/history")
    #[serde(default = "default_cursor_dir")]
    pub cursor_dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_running_jobs: default_max_running_jobs(),
            check_interval: default_check_interval(),
            empty_page_retry_delay: default_empty_page_retry_delay(),
            status_updates: true,
            cursor_dir: default_cursor_dir(),
        }
    }
}

impl HistoryConfig {
    /// Running job limit, `None` when unlimited
    pub fn running_limit(&self) -> Option<usize> {
        usize::try_from(self.max_running_jobs)
            .ok()
            .filter(|limit| *limit > 0)
    }
}

/// Data storage settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding download records (default: "./chat-media-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Per-source settings; every field is optional and inherits when absent
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSettings {
    /// Process messages from this source at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Save files (false = listen only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save: Option<bool>,
    /// Ignore messages from bot accounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_bots: Option<bool>,
    /// Reprocess messages when they are edited
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_edits: Option<bool>,
    /// Post a notice in the channel when a download fails for good
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_error_messages: Option<bool>,
    /// Queue a history backfill for this source's channels on startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_autorun: Option<bool>,

    /// Attempts per candidate, including the first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Destination root for files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// strftime template prefixed to every filename (empty = no prefix)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_date_format: Option<String>,

    /// Allow image files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_images: Option<bool>,
    /// Allow video files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_videos: Option<bool>,
    /// Allow audio files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_audio: Option<bool>,
    /// Allow text files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_text: Option<bool>,
    /// Allow everything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_applications: Option<bool>,
    /// Extensions never saved (e.g. ".exe")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_extensions: Option<Vec<String>>,

    /// Subfolder per year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_year: Option<bool>,
    /// Subfolder per month
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_month: Option<bool>,
    /// Subfolder per server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_server: Option<bool>,
    /// Subfolder per channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_channel: Option<bool>,
    /// Subfolder per user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_user: Option<bool>,
    /// Subfolder per media type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divide_by_type: Option<bool>,

    /// Keep same-named files by appending a numeric suffix (false = skip them)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_possible_duplicates: Option<bool>,

    /// React to the message after a successful download
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub react_when_downloaded: Option<bool>,
    /// Fixed reaction emoji (empty = random server emoji)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_emoji: Option<String>,
    /// Server emoji names never picked as a random reaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction_emoji_blacklist: Option<Vec<String>>,

    /// Users whose messages are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_users: Option<Vec<UserId>>,
    /// Roles whose members' messages are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_roles: Option<Vec<RoleId>>,
    /// Messages containing any of these phrases are ignored (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_phrases: Option<Vec<String>>,
    /// Links to these domains (or their subdomains) are never downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_domains: Option<Vec<String>>,
    /// Channels excluded from this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_channels: Option<Vec<ChannelId>>,
    /// Categories excluded from this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_categories: Option<Vec<ChannelId>>,
    /// Servers excluded from this source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_servers: Option<Vec<GuildId>>,
}

impl SourceSettings {
    /// Layer `self` over `fallback`: every field set here wins, every unset field is taken from `fallback`
    pub fn merge(&self, fallback: &SourceSettings) -> SourceSettings {
        fn pick<T: Clone>(primary: &Option<T>, fallback: &Option<T>) -> Option<T> {
            primary.as_ref().or(fallback.as_ref()).cloned()
        }

        SourceSettings {
            enabled: pick(&self.enabled, &fallback.enabled),
            save: pick(&self.save, &fallback.save),
            ignore_bots: pick(&self.ignore_bots, &fallback.ignore_bots),
            scan_edits: pick(&self.scan_edits, &fallback.scan_edits),
            send_error_messages: pick(&self.send_error_messages, &fallback.send_error_messages),
            history_autorun: pick(&self.history_autorun, &fallback.history_autorun),
            max_attempts: pick(&self.max_attempts, &fallback.max_attempts),
            destination: pick(&self.destination, &fallback.destination),
            filename_date_format: pick(&self.filename_date_format, &fallback.filename_date_format),
            allow_images: pick(&self.allow_images, &fallback.allow_images),
            allow_videos: pick(&self.allow_videos, &fallback.allow_videos),
            allow_audio: pick(&self.allow_audio, &fallback.allow_audio),
            allow_text: pick(&self.allow_text, &fallback.allow_text),
            allow_applications: pick(&self.allow_applications, &fallback.allow_applications),
            blocked_extensions: pick(&self.blocked_extensions, &fallback.blocked_extensions),
            divide_by_year: pick(&self.divide_by_year, &fallback.divide_by_year),
            divide_by_month: pick(&self.divide_by_month, &fallback.divide_by_month),
            divide_by_server: pick(&self.divide_by_server, &fallback.divide_by_server),
            divide_by_channel: pick(&self.divide_by_channel, &fallback.divide_by_channel),
            divide_by_user: pick(&self.divide_by_user, &fallback.divide_by_user),
            divide_by_type: pick(&self.divide_by_type, &fallback.divide_by_type),
            save_possible_duplicates: pick(
                &self.save_possible_duplicates,
                &fallback.save_possible_duplicates,
            ),
            react_when_downloaded: pick(
                &self.react_when_downloaded,
                &fallback.react_when_downloaded,
            ),
            reaction_emoji: pick(&self.reaction_emoji, &fallback.reaction_emoji),
            reaction_emoji_blacklist: pick(
                &self.reaction_emoji_blacklist,
                &fallback.reaction_emoji_blacklist,
            ),
            blacklisted_users: pick(&self.blacklisted_users, &fallback.blacklisted_users),
            blacklisted_roles: pick(&self.blacklisted_roles, &fallback.blacklisted_roles),
            blacklisted_phrases: pick(&self.blacklisted_phrases, &fallback.blacklisted_phrases),
            blacklisted_domains: pick(&self.blacklisted_domains, &fallback.blacklisted_domains),
            blacklisted_channels: pick(&self.blacklisted_channels, &fallback.blacklisted_channels),
            blacklisted_categories: pick(
                &self.blacklisted_categories,
                &fallback.blacklisted_categories,
            ),
            blacklisted_servers: pick(&self.blacklisted_servers, &fallback.blacklisted_servers),
        }
    }
}

/// A rule matching one ID or a set of IDs, plus the settings it applies
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRule {
    /// Single ID this rule matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Additional IDs this rule matches
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<u64>,

    /// Settings applied to matching messages
    #[serde(flatten)]
    pub settings: SourceSettings,
}

impl SourceRule {
    /// Every ID matched by this rule
    pub fn id_set(&self) -> HashSet<u64> {
        self.id.iter().chain(self.ids.iter()).copied().collect()
    }
}

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - HTTP timeouts, user agent, retry delay
/// - [`history`](HistoryConfig) - backfill concurrency and cursor storage
/// - [`persistence`](PersistenceConfig) - record store location
/// - `defaults`, `channels`, `categories`, `servers`, `users`, `all` - source rules
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Download pipeline settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// History backfill settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Record store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Global defaults inherited by every source rule
    #[serde(default)]
    pub defaults: SourceSettings,

    /// Channel rules (highest precedence)
    #[serde(default)]
    pub channels: Vec<SourceRule>,

    /// Category rules
    #[serde(default)]
    pub categories: Vec<SourceRule>,

    /// Server rules
    #[serde(default)]
    pub servers: Vec<SourceRule>,

    /// User rules
    #[serde(default)]
    pub users: Vec<SourceRule>,

    /// Catch-all rule; only consulted when its `enabled` resolves to true
    #[serde(default)]
    pub all: Option<SourceRule>,
}

impl Config {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).map_err(|e| Error::Config {
            message: format!("invalid configuration: {}", e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_json(&text)
    }

    /// Check the global (non-source) settings
    ///
    /// Source rules are checked when they are resolved into policies.
    pub fn validate(&self) -> Result<()> {
        if self.download.request_timeout.is_zero() {
            return Err(Error::config(
                "download.request_timeout",
                "must be greater than zero",
            ));
        }
        if self.download.user_agent.trim().is_empty() {
            return Err(Error::config("download.user_agent", "must not be empty"));
        }
        if self.history.check_interval.is_zero() {
            return Err(Error::config(
                "history.check_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

// Hardcoded source defaults, the last layer of the cascade

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const DEFAULT_FILENAME_DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub(crate) const DEFAULT_BLOCKED_EXTENSIONS: &[&str] = &[
    ".htm", ".html", ".php", ".exe", ".dll", ".bin", ".cmd", ".sh", ".py", ".jar",
];

pub(crate) fn default_destination() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string()
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_running_jobs() -> i32 {
    3
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_empty_page_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_cursor_dir() -> PathBuf {
    PathBuf::from("./cache/history")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./chat-media-dl.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (as whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
