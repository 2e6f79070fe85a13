//! Download record inserts, lookups and statistics.

use crate::types::{ChannelId, UserId};
use crate::{Error, Result};

use super::{Database, DownloadRecord, DownloadRecordRow, NewDownloadRecord};

const SELECT_RECORDS: &str = r#"
    SELECT id, url, downloaded_at, destination, filename, channel_id, user_id,
           size_bytes, media_type
    FROM download_records
"#;

impl Database {
    /// Append a record for a successful download, returning its ID
    pub async fn insert_download_record(&self, record: &NewDownloadRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO download_records (
                url, downloaded_at, destination, filename, channel_id, user_id,
                size_bytes, media_type
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.url)
        .bind(record.downloaded_at.timestamp())
        .bind(record.destination.to_string_lossy().into_owned())
        .bind(&record.filename)
        .bind(record.channel_id.get() as i64)
        .bind(record.user_id.get() as i64)
        .bind(record.size_bytes as i64)
        .bind(record.media_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Every record for a source URL, oldest first
    pub async fn find_records_by_url(&self, url: &str) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecordRow>(&format!(
            "{} WHERE url = ? ORDER BY id",
            SELECT_RECORDS
        ))
        .bind(url)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(DownloadRecord::from).collect())
    }

    /// Whether any file was saved from this URL
    pub async fn has_record_for_url(&self, url: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM download_records WHERE url = ?)")
                .bind(url)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(exists)
    }

    /// Every record from a channel, oldest first
    pub async fn find_records_by_channel(&self, channel: ChannelId) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query_as::<_, DownloadRecordRow>(&format!(
            "{} WHERE channel_id = ? ORDER BY id",
            SELECT_RECORDS
        ))
        .bind(channel.get() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(DownloadRecord::from).collect())
    }

    /// Total number of records
    pub async fn count_records(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM download_records")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(count as u64)
    }

    /// Number of records from a channel
    pub async fn count_records_by_channel(&self, channel: ChannelId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM download_records WHERE channel_id = ?")
                .bind(channel.get() as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(count as u64)
    }

    /// Number of records from messages by a user
    pub async fn count_records_by_user(&self, user: UserId) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM download_records WHERE user_id = ?")
                .bind(user.get() as i64)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(count as u64)
    }

    /// Sum of bytes over all records
    pub async fn total_downloaded_bytes(&self) -> Result<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM download_records")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?;

        Ok(total.max(0) as u64)
    }
}
