//! History scheduler: promotes waiting backfill jobs and spawns their tasks.

use crate::types::Event;

use super::MediaDownloader;

impl MediaDownloader {
    /// Start the history scheduler task
    ///
    /// This method spawns a background task that repeatedly:
    /// 1. Promotes the oldest waiting jobs while the running limit allows
    /// 2. Spawns one task per promoted job
    /// 3. Sleeps for `history.check_interval`, or until woken early by a
    ///    queued job, a finished job or a config reload
    ///
    /// The loop ends when shutdown cancels the downloader's token.
    pub fn start_history_scheduler(&self) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        let token = self.shutdown_token.clone();
        let wakeup = self.history.wakeup.clone();

        tokio::spawn(async move {
            loop {
                downloader.promote_waiting_jobs();

                let interval = downloader.config.snapshot().config().history.check_interval;
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("History scheduler stopped");
                        break;
                    }
                    _ = wakeup.notified() => {}
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    /// Promote as many waiting jobs as the running limit allows and spawn them
    ///
    /// Returns the number of jobs started.
    pub(crate) fn promote_waiting_jobs(&self) -> usize {
        if !self.is_accepting() {
            return 0;
        }

        let limit = self.config.snapshot().config().history.running_limit();
        let promoted = self.history.jobs.promote_waiting(limit);
        let started = promoted.len();

        for job in promoted {
            tracing::info!(channel_id = %job.channel_id, "Promoting history job");
            let downloader = self.clone();
            tokio::spawn(async move {
                downloader.run_history_job(job).await;
            });
        }

        if started > 0 {
            tracing::debug!(
                started,
                running = self.history.jobs.running_count(),
                "History scheduler pass"
            );
        }

        started
    }

    /// Queue autorun backfills for every channel rule that asks for one
    pub(crate) fn queue_autorun_jobs(&self) -> usize {
        let channels = self.config.snapshot().autorun_channels();
        let mut queued = 0;

        for channel_id in channels {
            let job = crate::history::HistoryJob::new(
                channel_id,
                crate::history::HistoryOrigin::Autorun,
                None,
                None,
                None,
            );
            match self.history.jobs.insert_waiting(job) {
                Ok(()) => {
                    queued += 1;
                    self.emit_event(Event::HistoryQueued { channel_id });
                }
                Err(e) => {
                    tracing::debug!(channel_id = %channel_id, error = %e, "Skipping autorun backfill");
                }
            }
        }

        if queued > 0 {
            tracing::info!(queued, "Queued autorun history jobs");
            self.history.wakeup.notify_one();
        }
        queued
    }
}
