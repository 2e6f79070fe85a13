//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{Connection, SqliteConnection};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Latest schema version
const SCHEMA_VERSION: i64 = 1;

fn connection_failed<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{context}: {e}")))
}

fn migration_failed<E: Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("{context}: {e}")))
}

impl Database {
    /// Open (or create) the record store at `path` and bring its schema up to date
    ///
    /// The parent directory is created when missing. The database runs in
    /// WAL mode.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(connection_failed("Failed to create database directory"))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_failed("Failed to parse database path"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("Failed to connect to database"))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply every migration newer than the stored schema version
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(connection_failed("Failed to acquire connection"))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(migration_failed("Failed to create schema_version table"))?;

        let current: i64 = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM schema_version",
        )
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query schema version: {e}"
            )))
        })?
        .unwrap_or(0);

        if current >= SCHEMA_VERSION {
            tracing::debug!(version = current, "Database schema up to date");
            return Ok(());
        }

        if current < 1 {
            Self::migrate_v1(&mut conn).await?;
        }
        Ok(())
    }

    /// v1: download record table and lookup indexes
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        // Dropping the transaction without commit rolls it back
        let mut tx = conn
            .begin()
            .await
            .map_err(migration_failed("Failed to begin transaction"))?;

        sqlx::query(
            r#"
            CREATE TABLE download_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                downloaded_at INTEGER NOT NULL,
                destination TEXT NOT NULL,
                filename TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                media_type TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(migration_failed("Failed to create download_records table"))?;

        for (name, column) in [
            ("idx_download_records_url", "url"),
            ("idx_download_records_channel", "channel_id"),
            ("idx_download_records_user", "user_id"),
        ] {
            sqlx::query(&format!("CREATE INDEX {name} ON download_records({column})"))
                .execute(&mut *tx)
                .await
                .map_err(migration_failed("Failed to create download_records index"))?;
        }

        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(1_i64)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(migration_failed("Failed to record migration"))?;

        tx.commit()
            .await
            .map_err(migration_failed("Failed to commit migration v1"))?;

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
