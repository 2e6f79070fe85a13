//! Core downloader implementation split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`handlers`] - New and edited message entry points
//! - [`pipeline`] - Fetch, classify and write a single media candidate
//! - [`history_task`] - Backfill engine for one channel
//! - [`history_processor`] - Scheduler loop promoting waiting backfill jobs
//! - [`control`] - Operator control of backfill jobs (start/cancel/clear)
//! - [`config_ops`] - Runtime configuration reloads
//! - [`services`] - Background service starters
//! - [`lifecycle`] - Startup and shutdown coordination

mod config_ops;
mod control;
mod handlers;
mod history_processor;
mod history_task;
mod lifecycle;
pub(crate) mod pipeline;
mod services;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::extractor::LinkExtractor;
use crate::history::JobRegistry;
use crate::platform::ChatPlatform;
use crate::router::ConfigStore;
use crate::scraper::ScraperRegistry;
use pipeline::DownloadPipeline;

/// Backfill job state shared by the scheduler, the jobs and operator calls
#[derive(Clone)]
pub(crate) struct HistoryState {
    /// Per-channel job registry (single source of truth for job status)
    pub(crate) jobs: std::sync::Arc<JobRegistry>,
    /// Wakes the scheduler early (job queued, job finished, config reloaded)
    pub(crate) wakeup: std::sync::Arc<tokio::sync::Notify>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query download records
    pub db: std::sync::Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<crate::types::Event>,
    /// Atomically swappable, fully resolved configuration
    pub(crate) config: std::sync::Arc<ConfigStore>,
    /// Chat service client
    pub(crate) platform: std::sync::Arc<dyn ChatPlatform>,
    /// Candidate extraction (scraper adapters included)
    pub(crate) extractor: std::sync::Arc<LinkExtractor>,
    /// Per-candidate download pipeline
    pub(crate) pipeline: std::sync::Arc<DownloadPipeline>,
    /// Backfill jobs
    pub(crate) history: HistoryState,
    /// Flag to indicate whether new messages are accepted (set to false during shutdown)
    pub(crate) accepting_new: std::sync::Arc<std::sync::atomic::AtomicBool>,
    /// Cancelled once shutdown has drained running jobs; stops background services
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
}

impl MediaDownloader {
    /// Create a new MediaDownloader instance
    ///
    /// This initializes all core components:
    /// - Resolves every source rule (configuration errors are fatal here)
    /// - Opens/creates the SQLite database and runs migrations
    /// - Builds the HTTP client used by the download pipeline
    /// - Sets up the event broadcast channel
    ///
    /// Nothing runs in the background until [`MediaDownloader::start`] is called.
    pub async fn new(
        config: Config,
        platform: std::sync::Arc<dyn ChatPlatform>,
        scrapers: ScraperRegistry,
    ) -> Result<Self> {
        let database_path = config.persistence.database_path.clone();

        // Resolve first so a bad config never touches the database
        let config = std::sync::Arc::new(ConfigStore::new(config)?);

        // Initialize database
        let db = std::sync::Arc::new(Database::new(&database_path).await?);

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let pipeline = std::sync::Arc::new(DownloadPipeline::new(db.clone())?);

        let history = HistoryState {
            jobs: std::sync::Arc::new(JobRegistry::new()),
            wakeup: std::sync::Arc::new(tokio::sync::Notify::new()),
        };

        Ok(Self {
            db,
            event_tx,
            config,
            platform,
            extractor: std::sync::Arc::new(LinkExtractor::new(scrapers)),
            pipeline,
            history,
            accepting_new: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true)),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        })
    }

    /// Subscribe to downloader events
    ///
    /// Returns a receiver that will receive all events emitted by the downloader.
    /// Multiple subscribers are supported; each receives its own copy of every event.
    ///
    /// A subscriber that falls more than 1000 events behind receives
    /// `RecvError::Lagged` and skips the missed events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::types::Event> {
        self.event_tx.subscribe()
    }

    /// Current configuration as loaded (before rule resolution)
    pub fn get_config(&self) -> Config {
        self.config.snapshot().config().clone()
    }

    /// Emit an event to all subscribers
    ///
    /// Silently drops the event when nobody is subscribed.
    pub(crate) fn emit_event(&self, event: crate::types::Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}
