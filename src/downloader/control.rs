//! History job control: start, cancel, clear and inspect backfills.

use crate::error::{Error, HistoryError, Result};
use crate::history::{AbortOutcome, HistoryJob, HistoryOrigin, HistoryStatus};
use crate::types::{ChannelId, Event, MessageId};

use super::MediaDownloader;

impl MediaDownloader {
    /// Queue a history backfill for a channel
    ///
    /// The job starts in the `Waiting` state; the scheduler promotes it once
    /// the running limit allows. Starting is fire-and-forget: progress and the
    /// final state are reported through events and, when `status_channel` is
    /// set, a status message in that channel.
    ///
    /// # Arguments
    ///
    /// * `channel_id` - Channel to backfill
    /// * `origin` - Who asked for the backfill
    /// * `status_channel` - Channel receiving progress messages
    /// * `before` - Stop once a message newer than this ID is reached
    /// * `since` - Stop once a message older than this ID is reached
    ///
    /// # Errors
    ///
    /// - [`HistoryError::InvalidRange`] when both bounds are given and `before <= since`
    /// - [`HistoryError::AlreadyActive`] when the channel already has a waiting or running job
    /// - [`Error::ShuttingDown`] once shutdown has started
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use chat_media_dl::*;
    /// # use chat_media_dl::history::HistoryOrigin;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let job = downloader
    ///     .start_history(ChannelId(42), HistoryOrigin::User(UserId(7)), Some(ChannelId(42)), None, None)
    ///     .await?;
    /// println!("Queued backfill of {}", job.channel_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_history(
        &self,
        channel_id: ChannelId,
        origin: HistoryOrigin,
        status_channel: Option<ChannelId>,
        before: Option<MessageId>,
        since: Option<MessageId>,
    ) -> Result<HistoryJob> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        if let (Some(before), Some(since)) = (before, since)
            && before <= since
        {
            return Err(HistoryError::InvalidRange {
                before: before.get(),
                since: since.get(),
            }
            .into());
        }

        let job = HistoryJob::new(channel_id, origin, status_channel, before, since);
        self.history.jobs.insert_waiting(job.clone())?;

        tracing::info!(
            channel_id = %channel_id,
            origin = ?origin,
            before = ?before,
            since = ?since,
            "Queued history job"
        );
        self.emit_event(Event::HistoryQueued { channel_id });
        self.history.wakeup.notify_one();

        Ok(job)
    }

    /// Cancel a channel's backfill
    ///
    /// A waiting job is dropped at once and reported as `AbortCompleted`. A
    /// running job is flagged `AbortRequested` and stops before its next
    /// message. Cancelling a finished job returns its terminal status.
    pub async fn cancel_history(&self, channel_id: ChannelId) -> Result<HistoryStatus> {
        let outcome = self.history.jobs.request_abort(channel_id)?;
        let status = outcome.status();

        match outcome {
            AbortOutcome::Removed => {
                tracing::info!(channel_id = %channel_id, "Cancelled waiting history job");
                self.emit_event(Event::HistoryFinished { channel_id, status });
            }
            AbortOutcome::Requested => {
                tracing::info!(channel_id = %channel_id, "Requested abort of history job");
            }
            AbortOutcome::Unchanged(_) => {}
        }

        Ok(status)
    }

    /// Remove a finished job so its channel shows no job at all
    pub async fn clear_history_job(&self, channel_id: ChannelId) -> Result<HistoryJob> {
        Ok(self.history.jobs.remove(channel_id)?)
    }

    /// Every known job, oldest first
    pub async fn history_jobs(&self) -> Vec<HistoryJob> {
        self.history.jobs.snapshot()
    }

    /// One channel's job
    pub async fn history_job(&self, channel_id: ChannelId) -> Option<HistoryJob> {
        self.history.jobs.get(channel_id)
    }
}
