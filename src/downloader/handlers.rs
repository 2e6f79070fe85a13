//! New and edited message entry points.

use crate::error::{Error, Result};
use crate::router::Policy;
use crate::types::{DownloadOutcome, Event, Message, MessageOrigin, MessageSummary};
use rand::seq::SliceRandom;

use super::MediaDownloader;

/// Reaction used when no fixed emoji is configured and the server offers none
pub(crate) const FALLBACK_REACTION: &str = "⬇️";

/// How a message reached the downloader
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// Live message event
    New,
    /// Live edit event
    Edit,
    /// Replayed by a backfill job (no reactions)
    History,
}

impl MediaDownloader {
    /// Process a newly posted message
    ///
    /// Resolves the policy for the message's origin, extracts candidates and
    /// downloads each of them. Messages with no matching policy produce an
    /// empty summary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once shutdown has started.
    pub async fn handle_message(&self, message: &Message) -> Result<MessageSummary> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        Ok(self.process_message(message, Trigger::New).await)
    }

    /// Process an edited message
    ///
    /// Identical to [`MediaDownloader::handle_message`] except that origins
    /// whose policy disables edit scanning are ignored.
    pub async fn handle_message_edit(&self, message: &Message) -> Result<MessageSummary> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        Ok(self.process_message(message, Trigger::Edit).await)
    }

    /// Route, extract and download everything in one message
    pub(crate) async fn process_message(
        &self,
        message: &Message,
        trigger: Trigger,
    ) -> MessageSummary {
        let mut summary = MessageSummary::default();

        let origin = self.message_origin(message).await;
        let snapshot = self.config.snapshot();
        let Some(policy) = snapshot.resolve(&origin) else {
            tracing::debug!(
                channel_id = %message.channel_id,
                message_id = %message.id,
                "No policy for message origin"
            );
            return summary;
        };

        if trigger == Trigger::Edit && !policy.scan_edits {
            tracing::debug!(message_id = %message.id, "Ignoring edit, edit scanning disabled");
            return summary;
        }
        if !policy.save {
            return summary;
        }

        let settings = snapshot.config().download.clone();
        let candidates = self.extractor.extract(message).await;

        for candidate in candidates {
            if policy.blacklist.blocks_domain(&candidate.url) {
                tracing::debug!(url = %candidate.url, "Skipping blacklisted domain");
                continue;
            }
            summary.candidates += 1;

            let outcome = self
                .pipeline
                .download(&candidate, &policy, &origin, &settings)
                .await;

            match outcome {
                DownloadOutcome::Success(file) => {
                    summary.files_downloaded += 1;
                    summary.bytes_downloaded += file.size_bytes;
                    self.emit_event(Event::FileDownloaded {
                        channel_id: message.channel_id,
                        message_id: message.id,
                        url: candidate.url.clone(),
                        path: file.path,
                        size_bytes: file.size_bytes,
                    });
                }
                DownloadOutcome::Skipped(reason) => {
                    summary.skipped += 1;
                    self.emit_event(Event::DownloadSkipped {
                        channel_id: message.channel_id,
                        url: candidate.url.clone(),
                        reason,
                    });
                }
                DownloadOutcome::Failed(failure) => {
                    summary.failed += 1;
                    tracing::error!(
                        url = %candidate.url,
                        channel_id = %message.channel_id,
                        error = %failure,
                        "Download failed"
                    );
                    if policy.send_error_messages {
                        self.notify_failure(message, &candidate.url, &failure.to_string())
                            .await;
                    }
                    self.emit_event(Event::DownloadFailed {
                        channel_id: message.channel_id,
                        url: candidate.url.clone(),
                        reason: failure.reason,
                        error: failure.message,
                    });
                }
            }
        }

        if summary.files_downloaded > 0 && trigger != Trigger::History && policy.reaction.enabled
        {
            self.react(message, &origin, &policy).await;
        }

        summary
    }

    /// Build the router input for a message
    ///
    /// Falls back to what the message itself carries when the platform cannot
    /// describe the channel or the author's roles.
    pub(crate) async fn message_origin(&self, message: &Message) -> MessageOrigin {
        let mut origin = MessageOrigin {
            channel_id: message.channel_id,
            thread_parent: None,
            category_id: None,
            guild_id: message.guild_id,
            author_id: message.author_id,
            author_roles: Vec::new(),
            author_is_bot: message.author_is_bot,
            content: message.content.clone(),
        };

        match self.platform.channel_info(message.channel_id).await {
            Ok(info) => {
                origin.thread_parent = info.thread_parent;
                origin.category_id = info.category_id;
                origin.guild_id = origin.guild_id.or(info.guild_id);
            }
            Err(e) => {
                tracing::warn!(channel_id = %message.channel_id, error = %e, "Failed to look up channel");
            }
        }

        if let Some(guild) = origin.guild_id {
            match self.platform.member_roles(guild, message.author_id).await {
                Ok(roles) => origin.author_roles = roles,
                Err(e) => {
                    tracing::warn!(
                        guild_id = %guild,
                        user_id = %message.author_id,
                        error = %e,
                        "Failed to look up member roles"
                    );
                }
            }
        }

        origin
    }

    /// React to a message once after at least one file was saved
    async fn react(&self, message: &Message, origin: &MessageOrigin, policy: &Policy) {
        let emoji = match &policy.reaction.emoji {
            Some(emoji) => emoji.clone(),
            None => self.random_server_emoji(origin, policy).await,
        };

        if let Err(e) = self
            .platform
            .add_reaction(message.channel_id, message.id, &emoji)
            .await
        {
            tracing::warn!(message_id = %message.id, emoji = %emoji, error = %e, "Failed to add reaction");
        }
    }

    /// Random non-animated server emoji outside the blacklist, or the fallback
    async fn random_server_emoji(&self, origin: &MessageOrigin, policy: &Policy) -> String {
        let Some(guild) = origin.guild_id else {
            return FALLBACK_REACTION.to_string();
        };

        let emojis = match self.platform.guild_emojis(guild).await {
            Ok(emojis) => emojis,
            Err(e) => {
                tracing::warn!(guild_id = %guild, error = %e, "Failed to list server emoji");
                return FALLBACK_REACTION.to_string();
            }
        };

        let eligible: Vec<_> = emojis
            .iter()
            .filter(|emoji| !emoji.animated && !policy.reaction.blacklist.contains(&emoji.name))
            .collect();

        eligible
            .choose(&mut rand::thread_rng())
            .map(|emoji| emoji.reaction())
            .unwrap_or_else(|| FALLBACK_REACTION.to_string())
    }

    /// Tell the origin channel that a candidate could not be downloaded
    async fn notify_failure(&self, message: &Message, url: &str, error: &str) {
        let text = format!("Failed to download <{}>: {}", url, error);
        if let Err(e) = self.platform.send_message(message.channel_id, &text).await {
            tracing::warn!(channel_id = %message.channel_id, error = %e, "Failed to send error message");
        }
    }
}
