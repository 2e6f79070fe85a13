//! Startup and shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::MediaDownloader;

/// How long shutdown waits for running backfill jobs to stop
const SHUTDOWN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

impl MediaDownloader {
    /// Start background work
    ///
    /// Spawns the history scheduler and queues a backfill for every channel
    /// whose rule sets `history_autorun`. Returns the scheduler's handle.
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let handle = self.start_history_scheduler();
        self.queue_autorun_jobs();
        tracing::info!("Downloader started");
        handle
    }

    /// Gracefully shut down the downloader
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new messages and backfill requests
    /// 2. Drops waiting backfill jobs and asks running ones to abort
    /// 3. Waits for running jobs to stop with a timeout (30 seconds)
    /// 4. Stops background services
    /// 5. Closes database connections
    ///
    /// Running jobs stop between messages, so their cursors stay consistent
    /// and the next run resumes where they stopped.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);
        tracing::info!("Stopped accepting new messages");

        // 2. Abort backfills
        let aborting = self.history.jobs.abort_all();
        tracing::info!(aborting, "Signaled abort to running history jobs");

        // 3. Wait for running jobs with timeout
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_running_jobs()).await {
            Ok(()) => {
                tracing::info!("All history jobs stopped");
            }
            Err(_) => {
                tracing::warn!(
                    running = self.history.jobs.running_count(),
                    "Timeout waiting for history jobs to stop, proceeding with shutdown"
                );
            }
        }

        // 4. Stop the scheduler and watchers
        self.shutdown_token.cancel();

        // 5. Emit shutdown event
        self.emit_event(Event::Shutdown);

        // 6. Close database connections
        self.db.close().await;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no job is running or aborting
    async fn wait_for_running_jobs(&self) {
        loop {
            let running = self.history.jobs.running_count();
            if running == 0 {
                return;
            }

            tracing::debug!(running, "Waiting for history jobs to stop");
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
