//! # chat-media-dl
//!
//! Policy-driven media downloader and history backfill engine for chat
//! platforms.
//!
//! ## Design Philosophy
//!
//! chat-media-dl is designed to be:
//! - **Rule-driven** - Every channel, category, server or user can carry its own policy
//! - **Sensible defaults** - Works with an empty configuration file
//! - **Library-first** - The chat connection is supplied by the embedding bot
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use chat_media_dl::{ChatPlatform, Config, MediaDownloader, ScraperRegistry};
//! use std::sync::Arc;
//!
//! async fn run(platform: Arc<dyn ChatPlatform>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(std::path::Path::new("config.json"))?;
//!     let downloader = MediaDownloader::new(config, platform, ScraperRegistry::new()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // Scheduler and autorun backfills
//!     downloader.start();
//!
//!     // Feed live messages from the platform's gateway:
//!     // downloader.handle_message(&message).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Hot reload of the configuration file
pub mod config_watcher;
/// Backfill resumption cursors
pub mod cursor;
/// Database persistence layer
pub mod db;
/// Core downloader implementation (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Candidate URL extraction from messages
pub mod extractor;
/// History job states and registry
pub mod history;
/// Chat platform seam
pub mod platform;
/// Retry logic with a fixed delay
pub mod retry;
/// Source rules resolved into per-origin policies
pub mod router;
/// Site adapters that expand gallery links
pub mod scraper;
/// Content-based media classification
pub mod sniff;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, SourceRule, SourceSettings};
pub use db::{Database, DownloadRecord};
pub use downloader::MediaDownloader;
pub use error::{DatabaseError, Error, HistoryError, PlatformError, Result};
pub use history::{AbortOutcome, HistoryJob, HistoryOrigin, HistoryStatus};
pub use platform::{ChannelInfo, ChatPlatform, GuildEmoji, HistoryPage, PlatformResult};
pub use router::Policy;
pub use scraper::{ExpandedLink, ScraperAdapter, ScraperRegistry};
pub use types::{
    Attachment, ChannelId, DownloadOutcome, Embed, Event, FailureReason, GuildId, MediaType,
    Message, MessageId, MessageSummary, RoleId, SkipReason, UserId,
};

/// Helper function to run the downloader with graceful signal handling.
///
/// Starts background work, waits for a termination signal and then calls the
/// downloader's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use chat_media_dl::{ChatPlatform, Config, MediaDownloader, ScraperRegistry, run_with_shutdown};
/// use std::sync::Arc;
///
/// async fn run(platform: Arc<dyn ChatPlatform>) -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(Config::default(), platform, ScraperRegistry::new()).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(downloader).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    downloader.start();
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration fails in some sandboxes
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
