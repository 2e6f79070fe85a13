//! Database layer for chat-media-dl
//!
//! Handles SQLite persistence for download records. The record store is a
//! best-effort index of what was saved; the files on disk are the source of
//! truth.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Download record inserts, lookups and statistics

use crate::types::{ChannelId, MediaType, UserId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod migrations;
mod records;

/// Download record to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownloadRecord {
    /// Source URL
    pub url: String,
    /// When the file was written
    pub downloaded_at: DateTime<Utc>,
    /// Folder the file was written to
    pub destination: PathBuf,
    /// Final filename
    pub filename: String,
    /// Channel the message came from
    pub channel_id: ChannelId,
    /// Author of the message
    pub user_id: UserId,
    /// Bytes written
    pub size_bytes: u64,
    /// Classification from the body
    pub media_type: MediaType,
}

/// Download record row (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub(crate) struct DownloadRecordRow {
    pub id: i64,
    pub url: String,
    pub downloaded_at: i64,
    pub destination: String,
    pub filename: String,
    pub channel_id: i64,
    pub user_id: i64,
    pub size_bytes: i64,
    pub media_type: String,
}

/// Download record from database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    /// Unique database ID
    pub id: i64,
    /// Source URL
    pub url: String,
    /// When the file was written
    pub downloaded_at: DateTime<Utc>,
    /// Folder the file was written to
    pub destination: PathBuf,
    /// Final filename
    pub filename: String,
    /// Channel the message came from
    pub channel_id: ChannelId,
    /// Author of the message
    pub user_id: UserId,
    /// Bytes written
    pub size_bytes: u64,
    /// Classification from the body
    pub media_type: MediaType,
}

impl From<DownloadRecordRow> for DownloadRecord {
    fn from(row: DownloadRecordRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            downloaded_at: DateTime::from_timestamp(row.downloaded_at, 0).unwrap_or_default(),
            destination: PathBuf::from(row.destination),
            filename: row.filename,
            // Snowflakes are stored bit-for-bit in SQLite's signed INTEGER
            channel_id: ChannelId(row.channel_id as u64),
            user_id: UserId(row.user_id as u64),
            size_bytes: row.size_bytes.max(0) as u64,
            media_type: MediaType::parse(&row.media_type),
        }
    }
}

/// Database handle for chat-media-dl
#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
