//! Backfill engine for one channel.
//!
//! A job pages through the channel's history, newest first, pushing every
//! message through the same route/extract/download path as live messages.
//! Pages are requested relative to two cursors:
//!
//! - `since`: the newest message handled by an earlier run; while set, pages
//!   are requested after it so new messages are caught up first
//! - `before`: the oldest message reached (initially the job's `before`
//!   bound); pages are requested before it
//!
//! Both cursors are persisted after every page, so a job interrupted by a
//! crash, an abort or a request error resumes where it stopped. The job's own
//! `before`/`since` bounds act as filters: the scan ends at the first message
//! outside them. A job with a `before` bound skips the catch-up phase.

use crate::cursor::{CursorDirection, CursorStore};
use crate::error::PlatformError;
use crate::history::{HistoryJob, HistoryStatus};
use crate::platform::HistoryPage;
use crate::retry::{RetryConfig, download_with_retry};
use crate::types::{ChannelId, Event, Message, MessageId};

use super::MediaDownloader;
use super::handlers::Trigger;

/// Consecutive empty pages that mean the channel is exhausted
pub(crate) const EMPTY_PAGE_LIMIT: u32 = 3;

/// Attempts for a rate-limited history request
const PLATFORM_ATTEMPTS: u32 = 3;

/// Where the job currently is in the channel
struct Cursors {
    before: Option<MessageId>,
    since: Option<MessageId>,
    newest_seen: Option<MessageId>,
}

impl Cursors {
    fn request(&self) -> HistoryPage {
        match (self.since, self.before) {
            (Some(since), _) => HistoryPage::After(since),
            (None, Some(before)) => HistoryPage::Before(before),
            (None, None) => HistoryPage::Latest,
        }
    }

    /// Record a processed message
    fn seen(&mut self, id: MessageId) {
        self.newest_seen = Some(self.newest_seen.map_or(id, |seen| seen.max(id)));
    }

    /// Move past a processed page
    fn advance(&mut self, page: &[Message]) {
        let (Some(newest), Some(oldest)) = (
            page.iter().map(|m| m.id).max(),
            page.iter().map(|m| m.id).min(),
        ) else {
            return;
        };

        if self.since.is_some() {
            self.since = Some(newest);
        } else {
            self.before = Some(oldest);
        }
    }
}

/// Progress message posted to the requesting channel
struct StatusMessage {
    channel: Option<ChannelId>,
    message: Option<MessageId>,
}

impl MediaDownloader {
    /// Run a promoted job to a terminal state
    pub(crate) async fn run_history_job(&self, job: HistoryJob) {
        let channel_id = job.channel_id;
        tracing::info!(channel_id = %channel_id, origin = ?job.origin, "History job started");
        self.emit_event(Event::HistoryStarted { channel_id });

        let snapshot = self.config.snapshot();
        let history_config = &snapshot.config().history;
        let cursors = CursorStore::new(history_config.cursor_dir.clone());
        let mut status_message = StatusMessage {
            channel: job.status_channel.filter(|_| history_config.status_updates),
            message: None,
        };

        let status = self
            .backfill(&job, &cursors, &mut status_message)
            .await;

        let finished = self.history.jobs.finish(channel_id, status);
        if let Some(finished) = &finished {
            self.report_status(&mut status_message, finished).await;
            tracing::info!(
                channel_id = %channel_id,
                status = status.describe(),
                messages_seen = finished.messages_seen,
                files_downloaded = finished.files_downloaded,
                "History job finished"
            );
        }

        self.emit_event(Event::HistoryFinished { channel_id, status });
        self.history.wakeup.notify_one();
    }

    async fn backfill(
        &self,
        job: &HistoryJob,
        store: &CursorStore,
        status_message: &mut StatusMessage,
    ) -> HistoryStatus {
        let channel_id = job.channel_id;

        match self.platform.can_read_history(channel_id).await {
            Ok(true) => {}
            Ok(false) | Err(PlatformError::MissingPermissions(_)) => {
                tracing::warn!(channel_id = %channel_id, "Cannot read channel history");
                return HistoryStatus::ErrorReadPerms;
            }
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to check history permissions");
                return HistoryStatus::ErrorRequesting;
            }
        }

        // A bounded job scans backwards from its bound; catching up after the
        // since cursor would only meet messages outside the range
        let persisted_since = store.load(channel_id, CursorDirection::Since).await;
        let mut cursors = Cursors {
            before: store
                .load(channel_id, CursorDirection::Before)
                .await
                .or(job.before),
            since: persisted_since.filter(|_| job.before.is_none()),
            newest_seen: persisted_since,
        };

        let status = self
            .scan_pages(job, store, &mut cursors, status_message)
            .await;

        if status.is_completed() {
            if let Err(e) = store.delete(channel_id, CursorDirection::Before).await {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to delete history cursor");
            }
            if let Some(newest) = cursors.newest_seen {
                self.save_cursor(store, channel_id, CursorDirection::Since, newest)
                    .await;
            }
        }

        status
    }

    async fn scan_pages(
        &self,
        job: &HistoryJob,
        store: &CursorStore,
        cursors: &mut Cursors,
        status_message: &mut StatusMessage,
    ) -> HistoryStatus {
        let channel_id = job.channel_id;
        let retry = RetryConfig::new(
            PLATFORM_ATTEMPTS,
            self.config.snapshot().config().download.retry_delay,
        );
        let mut empty_pages = 0;

        loop {
            if self.abort_requested(channel_id) {
                return HistoryStatus::AbortCompleted;
            }

            let request = cursors.request();
            let page = match download_with_retry(&retry, || {
                self.platform.fetch_history(channel_id, request)
            })
            .await
            {
                Ok(page) => page,
                Err(PlatformError::MissingPermissions(_)) => return HistoryStatus::ErrorReadPerms,
                Err(e) => {
                    tracing::warn!(channel_id = %channel_id, request = ?request, error = %e, "History request failed");
                    return HistoryStatus::ErrorRequesting;
                }
            };

            if page.is_empty() {
                empty_pages += 1;
                if empty_pages < EMPTY_PAGE_LIMIT {
                    tokio::time::sleep(
                        self.config.snapshot().config().history.empty_page_retry_delay,
                    )
                    .await;
                    continue;
                }
                empty_pages = 0;

                if cursors.since.is_some() && cursors.before.is_some() {
                    // Caught up with new messages, continue the older scan
                    tracing::debug!(channel_id = %channel_id, "History caught up, resuming older pages");
                    cursors.since = None;
                    continue;
                }
                return HistoryStatus::CompletedNoMoreMessages;
            }
            empty_pages = 0;

            for message in &page {
                if self.abort_requested(channel_id) {
                    return HistoryStatus::AbortCompleted;
                }
                if job.before.is_some_and(|before| message.id > before) {
                    return HistoryStatus::CompletedToBeforeFilter;
                }
                if job.since.is_some_and(|since| message.id < since) {
                    return HistoryStatus::CompletedToSinceFilter;
                }

                let summary = self.process_message(message, Trigger::History).await;
                cursors.seen(message.id);
                self.history.jobs.update(channel_id, |job| {
                    job.messages_seen += 1;
                    job.files_downloaded += summary.files_downloaded;
                    job.bytes_downloaded += summary.bytes_downloaded;
                });
            }

            cursors.advance(&page);
            if let Some(before) = cursors.before {
                self.save_cursor(store, channel_id, CursorDirection::Before, before)
                    .await;
            }
            if let Some(newest) = cursors.newest_seen {
                self.save_cursor(store, channel_id, CursorDirection::Since, newest)
                    .await;
            }

            if let Some(progress) = self.history.jobs.get(channel_id) {
                self.emit_event(Event::HistoryProgress {
                    channel_id,
                    messages_seen: progress.messages_seen,
                    files_downloaded: progress.files_downloaded,
                    bytes_downloaded: progress.bytes_downloaded,
                });
                self.report_status(status_message, &progress).await;
            }
        }
    }

    fn abort_requested(&self, channel_id: ChannelId) -> bool {
        self.history.jobs.status(channel_id) == Some(HistoryStatus::AbortRequested)
    }

    async fn save_cursor(
        &self,
        store: &CursorStore,
        channel_id: ChannelId,
        direction: CursorDirection,
        id: MessageId,
    ) {
        if let Err(e) = store.save(channel_id, direction, id).await {
            tracing::warn!(channel_id = %channel_id, direction = ?direction, error = %e, "Failed to save history cursor");
        }
    }

    /// Post or edit the progress message; a failed edit posts a new one
    async fn report_status(&self, status_message: &mut StatusMessage, job: &HistoryJob) {
        let Some(channel) = status_message.channel else {
            return;
        };
        let text = format!(
            "History of <#{}>: {} ({} messages, {} files, {} bytes)",
            job.channel_id,
            job.status.describe(),
            job.messages_seen,
            job.files_downloaded,
            job.bytes_downloaded
        );

        if let Some(message) = status_message.message {
            match self.platform.edit_message(channel, message, &text).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(channel_id = %channel, error = %e, "Failed to edit status message, posting a new one");
                }
            }
        }

        match self.platform.send_message(channel, &text).await {
            Ok(id) => status_message.message = Some(id),
            Err(e) => {
                tracing::warn!(channel_id = %channel, error = %e, "Failed to post status message");
            }
        }
    }
}
