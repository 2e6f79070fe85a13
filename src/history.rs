//! History backfill job state and the job registry
//!
//! A [`HistoryJob`] tracks one channel's backfill. At most one job per channel
//! is active at a time. The [`JobRegistry`] is shared between the scheduler
//! loop, every running job, and operator requests; each of its methods is a
//! single read-modify-write of one entry under the lock, so no caller ever
//! observes a half-applied transition.

use crate::error::HistoryError;
use crate::types::{ChannelId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// What an abort request did to a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The job was waiting and has been dropped
    Removed,
    /// The running job will stop at its next message
    Requested,
    /// The job was already past running; its status is unchanged
    Unchanged(HistoryStatus),
}

impl AbortOutcome {
    /// Status reported to the caller
    pub fn status(self) -> HistoryStatus {
        match self {
            Self::Removed => HistoryStatus::AbortCompleted,
            Self::Requested => HistoryStatus::AbortRequested,
            Self::Unchanged(status) => status,
        }
    }
}

/// Lifecycle state of a history job
///
/// Discriminants at or above 10 are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum HistoryStatus {
    /// Queued, waiting for a free running slot
    Waiting = 0,
    /// Paging through history
    Running = 1,
    /// Abort requested; observed at the next message
    AbortRequested = 2,
    /// Stopped after an abort request
    AbortCompleted = 10,
    /// The bot cannot read the channel's history
    ErrorReadPerms = 11,
    /// A history request failed
    ErrorRequesting = 12,
    /// Reached the start (or end) of the channel
    CompletedNoMoreMessages = 13,
    /// Reached a message newer than the `before` bound
    CompletedToBeforeFilter = 14,
    /// Reached a message older than the `since` bound
    CompletedToSinceFilter = 15,
}

impl HistoryStatus {
    /// Whether the job has stopped for good
    pub fn is_terminal(&self) -> bool {
        (*self as u8) >= 10
    }

    /// Whether the job finished by reaching one of its bounds
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            HistoryStatus::CompletedNoMoreMessages
                | HistoryStatus::CompletedToBeforeFilter
                | HistoryStatus::CompletedToSinceFilter
        )
    }

    /// Short human-readable description, used in status messages
    pub fn describe(&self) -> &'static str {
        match self {
            HistoryStatus::Waiting => "waiting for a free slot",
            HistoryStatus::Running => "running",
            HistoryStatus::AbortRequested => "aborting",
            HistoryStatus::AbortCompleted => "aborted",
            HistoryStatus::ErrorReadPerms => "missing permission to read history",
            HistoryStatus::ErrorRequesting => "failed to request history",
            HistoryStatus::CompletedNoMoreMessages => "finished, no more messages",
            HistoryStatus::CompletedToBeforeFilter => "finished, reached the before filter",
            HistoryStatus::CompletedToSinceFilter => "finished, reached the since filter",
        }
    }
}

/// Who queued a history job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum HistoryOrigin {
    /// An operator command
    User(UserId),
    /// The autorun setting at startup
    Autorun,
}

/// One channel's backfill
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryJob {
    /// Channel being backfilled
    pub channel_id: ChannelId,
    /// Who queued the job
    pub origin: HistoryOrigin,
    /// Channel that receives status messages (None = no status messages)
    pub status_channel: Option<ChannelId>,
    /// Stop at messages newer than this ID
    pub before: Option<MessageId>,
    /// Stop at messages older than this ID
    pub since: Option<MessageId>,
    /// Current state
    pub status: HistoryStatus,
    /// Messages processed
    pub messages_seen: u64,
    /// Files written
    pub files_downloaded: u64,
    /// Bytes written
    pub bytes_downloaded: u64,
    /// When the job was queued
    pub created_at: DateTime<Utc>,
    /// When the job last changed
    pub updated_at: DateTime<Utc>,
}

impl HistoryJob {
    /// New waiting job
    pub fn new(
        channel_id: ChannelId,
        origin: HistoryOrigin,
        status_channel: Option<ChannelId>,
        before: Option<MessageId>,
        since: Option<MessageId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            channel_id,
            origin,
            status_channel,
            before,
            since,
            status: HistoryStatus::Waiting,
            messages_seen: 0,
            files_downloaded: 0,
            bytes_downloaded: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Shared table of history jobs keyed by channel
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<ChannelId, HistoryJob>>,
}

impl JobRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, HistoryJob>> {
        // A poisoned lock only means another thread panicked mid-update; entries stay consistent
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a waiting job, replacing a terminal one for the same channel
    ///
    /// Fails with [`HistoryError::AlreadyActive`] if the channel already has a
    /// non-terminal job.
    pub fn insert_waiting(&self, job: HistoryJob) -> Result<(), HistoryError> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&job.channel_id)
            && !existing.status.is_terminal()
        {
            return Err(HistoryError::AlreadyActive {
                channel_id: job.channel_id,
                status: existing.status,
            });
        }
        jobs.insert(job.channel_id, job);
        Ok(())
    }

    /// Promote the oldest waiting jobs into free running slots
    ///
    /// `limit` is the maximum number of jobs that may be running (or aborting)
    /// at once; `None` means unlimited. Returns the promoted jobs, oldest first.
    pub fn promote_waiting(&self, limit: Option<usize>) -> Vec<HistoryJob> {
        let mut jobs = self.lock();
        let active = jobs
            .values()
            .filter(|job| {
                matches!(
                    job.status,
                    HistoryStatus::Running | HistoryStatus::AbortRequested
                )
            })
            .count();
        let free = match limit {
            Some(limit) => limit.saturating_sub(active),
            None => usize::MAX,
        };
        if free == 0 {
            return Vec::new();
        }

        let mut waiting: Vec<(DateTime<Utc>, ChannelId)> = jobs
            .values()
            .filter(|job| job.status == HistoryStatus::Waiting)
            .map(|job| (job.created_at, job.channel_id))
            .collect();
        waiting.sort();

        let now = Utc::now();
        waiting
            .into_iter()
            .take(free)
            .filter_map(|(_, channel_id)| {
                let job = jobs.get_mut(&channel_id)?;
                job.status = HistoryStatus::Running;
                job.updated_at = now;
                Some(job.clone())
            })
            .collect()
    }

    /// Request an abort
    ///
    /// A running job moves to `AbortRequested` and stops at its next message.
    /// A waiting job never started, so it is removed outright. Terminal jobs
    /// are left untouched.
    pub fn request_abort(&self, channel_id: ChannelId) -> Result<AbortOutcome, HistoryError> {
        let mut jobs = self.lock();
        let status = jobs
            .get(&channel_id)
            .map(|job| job.status)
            .ok_or(HistoryError::NotFound { channel_id })?;

        match status {
            HistoryStatus::Waiting => {
                jobs.remove(&channel_id);
                Ok(AbortOutcome::Removed)
            }
            HistoryStatus::Running => {
                if let Some(job) = jobs.get_mut(&channel_id) {
                    job.status = HistoryStatus::AbortRequested;
                    job.updated_at = Utc::now();
                }
                Ok(AbortOutcome::Requested)
            }
            other => Ok(AbortOutcome::Unchanged(other)),
        }
    }

    /// Request an abort of every running job; waiting jobs are dropped
    pub fn abort_all(&self) -> usize {
        let mut jobs = self.lock();
        jobs.retain(|_, job| job.status != HistoryStatus::Waiting);
        let now = Utc::now();
        let mut count = 0;
        for job in jobs.values_mut() {
            if job.status == HistoryStatus::Running {
                job.status = HistoryStatus::AbortRequested;
                job.updated_at = now;
                count += 1;
            }
        }
        count
    }

    /// Current status of a channel's job
    pub fn status(&self, channel_id: ChannelId) -> Option<HistoryStatus> {
        self.lock().get(&channel_id).map(|job| job.status)
    }

    /// Apply `update` to a channel's job atomically, returning the updated copy
    pub fn update<F>(&self, channel_id: ChannelId, update: F) -> Option<HistoryJob>
    where
        F: FnOnce(&mut HistoryJob),
    {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&channel_id)?;
        update(job);
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    /// Move a job into a terminal status
    pub fn finish(&self, channel_id: ChannelId, status: HistoryStatus) -> Option<HistoryJob> {
        debug_assert!(status.is_terminal());
        self.update(channel_id, |job| job.status = status)
    }

    /// Remove a terminal job
    pub fn remove(&self, channel_id: ChannelId) -> Result<HistoryJob, HistoryError> {
        let mut jobs = self.lock();
        let status = jobs
            .get(&channel_id)
            .map(|job| job.status)
            .ok_or(HistoryError::NotFound { channel_id })?;
        if !status.is_terminal() {
            return Err(HistoryError::NotFinished { channel_id, status });
        }
        jobs.remove(&channel_id)
            .ok_or(HistoryError::NotFound { channel_id })
    }

    /// Copy of one job
    pub fn get(&self, channel_id: ChannelId) -> Option<HistoryJob> {
        self.lock().get(&channel_id).cloned()
    }

    /// Copy of every job, oldest first
    pub fn snapshot(&self) -> Vec<HistoryJob> {
        let mut jobs: Vec<HistoryJob> = self.lock().values().cloned().collect();
        jobs.sort_by_key(|job| (job.created_at, job.channel_id));
        jobs
    }

    /// Number of jobs that are running or aborting
    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|job| {
                matches!(
                    job.status,
                    HistoryStatus::Running | HistoryStatus::AbortRequested
                )
            })
            .count()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn job(channel: u64) -> HistoryJob {
        HistoryJob::new(
            ChannelId(channel),
            HistoryOrigin::User(UserId(1)),
            None,
            None,
            None,
        )
    }

    fn job_created(channel: u64, seconds_ago: i64) -> HistoryJob {
        let mut job = job(channel);
        job.created_at = Utc::now() - Duration::seconds(seconds_ago);
        job
    }

    #[test]
    fn terminal_statuses() {
        assert!(!HistoryStatus::Waiting.is_terminal());
        assert!(!HistoryStatus::Running.is_terminal());
        assert!(!HistoryStatus::AbortRequested.is_terminal());
        assert!(HistoryStatus::AbortCompleted.is_terminal());
        assert!(HistoryStatus::ErrorReadPerms.is_terminal());
        assert!(HistoryStatus::CompletedToSinceFilter.is_terminal());
        assert!(HistoryStatus::CompletedNoMoreMessages.is_completed());
        assert!(!HistoryStatus::ErrorRequesting.is_completed());
    }

    #[test]
    fn second_insert_for_active_channel_rejected() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job(5)).unwrap();

        let err = registry.insert_waiting(job(5)).unwrap_err();
        assert_eq!(
            err,
            HistoryError::AlreadyActive {
                channel_id: ChannelId(5),
                status: HistoryStatus::Waiting
            }
        );
    }

    #[test]
    fn terminal_job_can_be_replaced() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job(5)).unwrap();
        registry.promote_waiting(None);
        registry.finish(ChannelId(5), HistoryStatus::CompletedNoMoreMessages);

        registry.insert_waiting(job(5)).unwrap();
        assert_eq!(registry.status(ChannelId(5)), Some(HistoryStatus::Waiting));
    }

    #[test]
    fn promotion_respects_limit_and_age() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job_created(1, 10)).unwrap();
        registry.insert_waiting(job_created(2, 30)).unwrap();
        registry.insert_waiting(job_created(3, 20)).unwrap();

        let promoted = registry.promote_waiting(Some(2));
        let channels: Vec<_> = promoted.iter().map(|job| job.channel_id).collect();
        assert_eq!(channels, vec![ChannelId(2), ChannelId(3)]);
        assert_eq!(registry.running_count(), 2);

        // No free slot until one finishes
        assert!(registry.promote_waiting(Some(2)).is_empty());
        registry.finish(ChannelId(2), HistoryStatus::CompletedNoMoreMessages);
        let promoted = registry.promote_waiting(Some(2));
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].channel_id, ChannelId(1));
    }

    #[test]
    fn unlimited_promotes_everything() {
        let registry = JobRegistry::new();
        for channel in 0..10 {
            registry.insert_waiting(job(channel)).unwrap();
        }
        assert_eq!(registry.promote_waiting(None).len(), 10);
    }

    #[test]
    fn abort_running_and_waiting() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job_created(1, 10)).unwrap();
        registry.promote_waiting(Some(1));
        registry.insert_waiting(job(2)).unwrap();

        assert_eq!(
            registry.request_abort(ChannelId(1)).unwrap(),
            AbortOutcome::Requested
        );
        assert_eq!(
            registry.request_abort(ChannelId(1)).unwrap(),
            AbortOutcome::Unchanged(HistoryStatus::AbortRequested)
        );
        assert_eq!(
            registry.request_abort(ChannelId(2)).unwrap(),
            AbortOutcome::Removed
        );
        assert_eq!(AbortOutcome::Removed.status(), HistoryStatus::AbortCompleted);
        assert!(registry.get(ChannelId(2)).is_none());

        registry.finish(ChannelId(1), HistoryStatus::AbortCompleted);
        assert_eq!(
            registry.request_abort(ChannelId(1)).unwrap(),
            AbortOutcome::Unchanged(HistoryStatus::AbortCompleted)
        );
        assert_eq!(
            registry.request_abort(ChannelId(3)).unwrap_err(),
            HistoryError::NotFound {
                channel_id: ChannelId(3)
            }
        );
    }

    #[test]
    fn remove_only_terminal() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job(1)).unwrap();
        assert!(matches!(
            registry.remove(ChannelId(1)),
            Err(HistoryError::NotFinished { .. })
        ));

        registry.promote_waiting(None);
        registry.finish(ChannelId(1), HistoryStatus::ErrorRequesting);
        let removed = registry.remove(ChannelId(1)).unwrap();
        assert_eq!(removed.status, HistoryStatus::ErrorRequesting);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn concurrent_inserts_allow_one_job_per_channel() {
        let registry = Arc::new(JobRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.insert_waiting(job(42)).is_ok())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn abort_all_drops_waiting_and_flags_running() {
        let registry = JobRegistry::new();
        registry.insert_waiting(job_created(1, 5)).unwrap();
        registry.promote_waiting(Some(1));
        registry.insert_waiting(job(2)).unwrap();

        assert_eq!(registry.abort_all(), 1);
        assert_eq!(
            registry.status(ChannelId(1)),
            Some(HistoryStatus::AbortRequested)
        );
        assert!(registry.status(ChannelId(2)).is_none());
    }
}
