//! Core types for chat-media-dl

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Milliseconds between the Unix epoch and the platform's snowflake epoch (2015-01-01)
pub const SNOWFLAKE_EPOCH_MS: u64 = 1_420_070_400_000;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Create a new ID from its raw value
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the inner u64 value
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }
    };
}

snowflake_id!(
    /// Unique identifier for a chat message
    MessageId
);
snowflake_id!(
    /// Unique identifier for a channel, thread or category
    ChannelId
);
snowflake_id!(
    /// Unique identifier for a server (guild)
    GuildId
);
snowflake_id!(
    /// Unique identifier for a user
    UserId
);
snowflake_id!(
    /// Unique identifier for a server role
    RoleId
);

impl MessageId {
    /// Creation time encoded in the snowflake
    pub fn timestamp(&self) -> DateTime<Utc> {
        let ms = (self.0 >> 22) + SNOWFLAKE_EPOCH_MS;
        Utc.timestamp_millis_opt(ms as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Smallest snowflake that could have been created at `time`
    ///
    /// Lets operators give history bounds as dates instead of message IDs.
    /// Times before the snowflake epoch clamp to zero.
    pub fn from_datetime(time: DateTime<Utc>) -> Self {
        let ms = u64::try_from(time.timestamp_millis()).unwrap_or(0);
        Self(ms.saturating_sub(SNOWFLAKE_EPOCH_MS) << 22)
    }
}

/// File attached directly to a message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Direct URL of the attachment
    pub url: String,
    /// Filename as uploaded
    pub filename: String,
    /// Size in bytes as reported by the platform
    #[serde(default)]
    pub size: u64,
}

/// Rich embed attached to a message (link previews, bot embeds)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    /// Link the embed points at
    #[serde(default)]
    pub url: Option<String>,
    /// Full-size image URL
    #[serde(default)]
    pub image_url: Option<String>,
    /// Video URL
    #[serde(default)]
    pub video_url: Option<String>,
}

impl Embed {
    /// URLs carried by this embed in encounter order
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        [&self.url, &self.image_url, &self.video_url]
            .into_iter()
            .filter_map(|u| u.as_deref())
    }
}

/// Inbound message event delivered by the chat client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message ID
    pub id: MessageId,
    /// Channel (or thread) the message was posted in
    pub channel_id: ChannelId,
    /// Server the channel belongs to (None for direct messages)
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Author of the message
    pub author_id: UserId,
    /// Whether the author is a bot account
    #[serde(default)]
    pub author_is_bot: bool,
    /// Text content
    #[serde(default)]
    pub content: String,
    /// Uploaded files
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Embeds
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Time the message was posted
    pub timestamp: DateTime<Utc>,
    /// Whether this event is an edit of an existing message
    #[serde(default)]
    pub edited: bool,
}

/// Where a message came from, with everything the source router needs to pick a policy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageOrigin {
    /// Channel (or thread) the message was posted in
    pub channel_id: ChannelId,
    /// Parent channel when `channel_id` is a thread
    pub thread_parent: Option<ChannelId>,
    /// Category the channel is nested in
    pub category_id: Option<ChannelId>,
    /// Server the channel belongs to
    pub guild_id: Option<GuildId>,
    /// Author of the message
    pub author_id: UserId,
    /// Roles the author holds on the server
    pub author_roles: Vec<RoleId>,
    /// Whether the author is a bot
    pub author_is_bot: bool,
    /// Message text, used for phrase blacklists
    pub content: String,
}

/// A URL considered for download, prior to fetching
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaCandidate {
    /// URL to fetch
    pub url: String,
    /// Filename already known from the platform or a scraper
    pub filename: Option<String>,
    /// Time of the message the link came from
    pub timestamp: DateTime<Utc>,
}

/// Media classification derived from the response body
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// Still or animated images
    Image,
    /// Video containers
    Video,
    /// Audio streams
    Audio,
    /// Plain text and markup
    Text,
    /// Everything else (archives, documents, executables)
    Application,
}

impl MediaType {
    /// Stable lowercase name, used for storage
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Text => "text",
            MediaType::Application => "application",
        }
    }

    /// Subfolder name used when dividing downloads by type
    pub fn folder_name(&self) -> &'static str {
        match self {
            MediaType::Image => "images",
            MediaType::Video => "videos",
            MediaType::Audio => "audio",
            MediaType::Text => "text",
            MediaType::Application => "applications",
        }
    }

    /// Parse the storage name back into a media type
    pub fn parse(value: &str) -> Self {
        match value {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            "audio" => MediaType::Audio,
            "text" => MediaType::Text,
            _ => MediaType::Application,
        }
    }
}

/// Why a candidate was skipped without writing anything
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Same file already exists and duplicates are rejected
    Duplicate,
    /// Sniffed media type is not allowed by the policy
    UnpermittedType,
    /// File extension is blocked by the policy
    UnpermittedExtension,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Duplicate => write!(f, "duplicate"),
            SkipReason::UnpermittedType => write!(f, "unpermitted type"),
            SkipReason::UnpermittedExtension => write!(f, "unpermitted extension"),
        }
    }
}

/// Pipeline step at which a download attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Could not create the destination folder
    FolderCreation,
    /// The HTTP request could not be sent
    Request,
    /// The server answered with an error status
    Transfer,
    /// The response body could not be read
    Read,
    /// Could not create the per-type subfolder
    SubfolderCreation,
    /// Could not write the file
    Write,
    /// File was written but the download record could not be stored
    ///
    /// The only failure that is never retried: the file is already on disk.
    RecordWrite,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureReason::FolderCreation => "failed to create folder",
            FailureReason::Request => "failed to send request",
            FailureReason::Transfer => "failed to download response",
            FailureReason::Read => "failed to read response",
            FailureReason::SubfolderCreation => "failed to create subfolder",
            FailureReason::Write => "failed to write file",
            FailureReason::RecordWrite => "failed to write download record",
        };
        f.write_str(text)
    }
}

/// A failed download attempt: the step that failed and the underlying error text
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{reason}: {message}")]
pub struct DownloadFailure {
    /// Step that failed
    pub reason: FailureReason,
    /// Underlying error text
    pub message: String,
}

impl DownloadFailure {
    /// Create a failure for `reason` from any displayable error
    pub fn new(reason: FailureReason, error: impl std::fmt::Display) -> Self {
        Self {
            reason,
            message: error.to_string(),
        }
    }
}

/// File written by a successful download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Full path on disk
    pub path: PathBuf,
    /// Final filename (after date prefix and collision suffix)
    pub filename: String,
    /// Classification from the body
    pub media_type: MediaType,
    /// Bytes written
    pub size_bytes: u64,
    /// ID of the stored download record
    pub record_id: i64,
}

/// Result of downloading one candidate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File written and recorded
    Success(DownloadedFile),
    /// Nothing written, retrying cannot change the result
    Skipped(SkipReason),
    /// All attempts failed
    Failed(DownloadFailure),
}

impl DownloadOutcome {
    /// True for [`DownloadOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success(_))
    }
}

/// Totals produced by processing one message
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageSummary {
    /// Candidates found in the message
    pub candidates: u64,
    /// Files written
    pub files_downloaded: u64,
    /// Bytes written
    pub bytes_downloaded: u64,
    /// Candidates skipped
    pub skipped: u64,
    /// Candidates that failed after all attempts
    pub failed: u64,
}

/// Event emitted by the downloader
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A file was written and recorded
    FileDownloaded {
        /// Channel the message came from
        channel_id: ChannelId,
        /// Message the file came from
        message_id: MessageId,
        /// Source URL
        url: String,
        /// Path on disk
        path: PathBuf,
        /// Bytes written
        size_bytes: u64,
    },

    /// A candidate was skipped by policy
    DownloadSkipped {
        /// Channel the message came from
        channel_id: ChannelId,
        /// Source URL
        url: String,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// A candidate failed after all attempts
    DownloadFailed {
        /// Channel the message came from
        channel_id: ChannelId,
        /// Source URL
        url: String,
        /// Failure step
        reason: FailureReason,
        /// Underlying error text
        error: String,
    },

    /// A backfill job was queued
    HistoryQueued {
        /// Channel being backfilled
        channel_id: ChannelId,
    },

    /// A backfill job started running
    HistoryStarted {
        /// Channel being backfilled
        channel_id: ChannelId,
    },

    /// A backfill job finished a page
    HistoryProgress {
        /// Channel being backfilled
        channel_id: ChannelId,
        /// Messages processed so far
        messages_seen: u64,
        /// Files downloaded so far
        files_downloaded: u64,
        /// Bytes downloaded so far
        bytes_downloaded: u64,
    },

    /// A backfill job reached a terminal state
    HistoryFinished {
        /// Channel being backfilled
        channel_id: ChannelId,
        /// Terminal status
        status: crate::history::HistoryStatus,
    },

    /// Configuration was reloaded
    ConfigReloaded,

    /// Downloader is shutting down
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_timestamp_round_trips_through_datetime() {
        let time = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        let id = MessageId::from_datetime(time);
        assert_eq!(id.timestamp(), time);
    }

    #[test]
    fn snowflake_before_epoch_clamps_to_zero() {
        let time = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(MessageId::from_datetime(time), MessageId(0));
    }

    #[test]
    fn ids_parse_with_whitespace() {
        let id: ChannelId = " 123456789012345678\n".parse().unwrap();
        assert_eq!(id, ChannelId(123456789012345678));
    }

    #[test]
    fn embed_urls_in_order() {
        let embed = Embed {
            url: Some("https://a".into()),
            image_url: None,
            video_url: Some("https://c".into()),
        };
        let urls: Vec<_> = embed.urls().collect();
        assert_eq!(urls, vec!["https://a", "https://c"]);
    }

    #[test]
    fn failure_display_includes_reason_and_error() {
        let failure = DownloadFailure::new(FailureReason::Transfer, "404 Not Found");
        assert_eq!(
            failure.to_string(),
            "failed to download response: 404 Not Found"
        );
    }
}
