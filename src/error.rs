//! Error types for chat-media-dl
//!
//! Configuration problems surface at load time as [`Error::Config`]. Per-candidate
//! download problems are not errors at all: they are reported as
//! [`DownloadOutcome`](crate::types::DownloadOutcome) values. Everything else
//! (record store, chat platform, backfill control) flows through [`Error`].

use crate::history::HistoryStatus;
use crate::types::ChannelId;
use thiserror::Error;

/// Result type alias for chat-media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chat-media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "channels[2].destination")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Chat platform call failed
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Backfill control error
    #[error("history error: {0}")]
    History(#[from] HistoryError),

    /// A scraper adapter could not expand a link
    #[error("scraper {adapter} failed: {message}")]
    Scraper {
        /// Name of the adapter
        adapter: String,
        /// Underlying error text
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown in progress - not accepting new messages
    #[error("shutdown in progress: not accepting new messages")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Config file watching error
    #[error("config watch error: {0}")]
    ConfigWatch(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors reported by the chat platform client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// The bot lacks a permission needed for the call
    #[error("missing permission: {0}")]
    MissingPermissions(String),

    /// Channel, message or server does not exist (or is not visible)
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform rate limited the request
    #[error("rate limited")]
    RateLimited,

    /// Any other request failure
    #[error("request failed: {0}")]
    Request(String),
}

/// Errors from backfill control operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// A job for this channel is already waiting or running
    #[error("channel {channel_id} already has an active history job ({status:?})")]
    AlreadyActive {
        /// Channel with the active job
        channel_id: ChannelId,
        /// Status of the existing job
        status: HistoryStatus,
    },

    /// No job exists for this channel
    #[error("no history job for channel {channel_id}")]
    NotFound {
        /// Channel that was looked up
        channel_id: ChannelId,
    },

    /// The job has not reached a terminal state
    #[error("history job for channel {channel_id} is still {status:?}")]
    NotFinished {
        /// Channel with the unfinished job
        channel_id: ChannelId,
        /// Current status
        status: HistoryStatus,
    },

    /// The before bound is not after the since bound
    #[error("invalid history range: before {before} must be greater than since {since}")]
    InvalidRange {
        /// Upper bound
        before: u64,
        /// Lower bound
        since: u64,
    },
}
