//! Download pipeline for a single media candidate.
//!
//! One attempt runs every step from folder creation to the download record.
//! Policy decisions come back as [`DownloadOutcome::Skipped`] and end the
//! download immediately; step failures come back as [`DownloadFailure`] and
//! are retried by [`download_with_retry`] up to the policy's attempt count.

use crate::config::DownloadConfig;
use crate::db::{Database, NewDownloadRecord};
use crate::error::{Error, Result};
use crate::retry::{RetryConfig, download_with_retry};
use crate::router::Policy;
use crate::sniff::sniff;
use crate::types::{
    DownloadFailure, DownloadOutcome, DownloadedFile, FailureReason, MediaCandidate, MediaType,
    MessageOrigin, SkipReason,
};
use crate::utils::{
    FileCollisionAction, create_unique_file, filename_from_response, is_safe_filename,
    set_modified_time, split_extension,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Base name used when neither the link nor the response names the file
const GENERIC_FILENAME: &str = "download";

/// Base name used when the resolved filename cannot be written as-is
const PLACEHOLDER_FILENAME: &str = "InvalidFilename";

/// Folder used in place of a server ID for direct messages
const DIRECT_MESSAGES_FOLDER: &str = "direct";

/// Result of one attempt that did not fail
enum Attempt {
    Saved(DownloadedFile),
    Skipped(SkipReason),
}

/// Fetches candidates and writes them under the policy's destination
pub(crate) struct DownloadPipeline {
    client: reqwest::Client,
    db: Arc<Database>,
}

impl DownloadPipeline {
    /// Create a pipeline writing records to `db`
    ///
    /// Timeout and user agent are applied per request so that a config
    /// reload takes effect without rebuilding the client.
    pub(crate) fn new(db: Arc<Database>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, db })
    }

    /// Download one candidate with bounded retries
    pub(crate) async fn download(
        &self,
        candidate: &MediaCandidate,
        policy: &Policy,
        origin: &MessageOrigin,
        settings: &DownloadConfig,
    ) -> DownloadOutcome {
        let retry = RetryConfig::new(policy.max_attempts, settings.retry_delay);

        let result = download_with_retry(&retry, || {
            self.attempt(candidate, policy, origin, settings)
        })
        .await;

        match result {
            Ok(Attempt::Saved(file)) => DownloadOutcome::Success(file),
            Ok(Attempt::Skipped(reason)) => {
                tracing::debug!(url = %candidate.url, reason = %reason, "Skipped candidate");
                DownloadOutcome::Skipped(reason)
            }
            Err(failure) => DownloadOutcome::Failed(failure),
        }
    }

    async fn attempt(
        &self,
        candidate: &MediaCandidate,
        policy: &Policy,
        origin: &MessageOrigin,
        settings: &DownloadConfig,
    ) -> std::result::Result<Attempt, DownloadFailure> {
        if !policy.save_possible_duplicates && self.already_recorded(&candidate.url).await {
            return Ok(Attempt::Skipped(SkipReason::Duplicate));
        }

        // 1. Destination folder
        let mut folder = destination_folder(policy, origin, candidate);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| DownloadFailure::new(FailureReason::FolderCreation, e))?;

        // 2. Fetch
        let response = self
            .client
            .get(&candidate.url)
            .timeout(settings.request_timeout)
            .header(reqwest::header::USER_AGENT, &settings.user_agent)
            .send()
            .await
            .map_err(|e| DownloadFailure::new(FailureReason::Request, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadFailure::new(
                FailureReason::Transfer,
                format!("HTTP {}", status),
            ));
        }

        // 3. Filename (must be read before the body consumes the response)
        let suggested = candidate
            .filename
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| filename_from_response(&response));

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadFailure::new(FailureReason::Read, e))?;

        // 4. Classification from the body only
        let sniffed = sniff(&body);
        let name = resolve_filename(suggested, sniffed.extension);
        let extension = split_extension(&name)
            .1
            .map(str::to_lowercase)
            .unwrap_or_default();

        let mut media_type = sniffed.media_type;
        if extension == ".mov" && media_type == MediaType::Application {
            media_type = MediaType::Video;
        }

        // 5. Policy checks
        if !policy.allows_type(media_type) {
            return Ok(Attempt::Skipped(SkipReason::UnpermittedType));
        }
        if !extension.is_empty() && policy.blocks_extension(&extension) {
            return Ok(Attempt::Skipped(SkipReason::UnpermittedExtension));
        }

        // 6. Type subfolder
        if policy.divide.media_type {
            folder.push(media_type.folder_name());
            tokio::fs::create_dir_all(&folder)
                .await
                .map_err(|e| DownloadFailure::new(FailureReason::SubfolderCreation, e))?;
        }

        // 7. Final name
        let filename = compose_filename(&policy.date_prefix(candidate.timestamp), name);

        // 8. Collision handling and write; the name is claimed atomically
        let action = if policy.save_possible_duplicates {
            FileCollisionAction::Rename
        } else {
            FileCollisionAction::Skip
        };
        let path = match create_unique_file(&folder.join(&filename), &body, action).await {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(Attempt::Skipped(SkipReason::Duplicate)),
            Err(e) => return Err(DownloadFailure::new(FailureReason::Write, e)),
        };

        // 9. Best-effort mtime
        if let Err(e) = set_modified_time(&path, candidate.timestamp) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to set file modification time");
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);
        let size_bytes = body.len() as u64;

        // 10. Record; the file stays on disk if this fails
        let record = NewDownloadRecord {
            url: candidate.url.clone(),
            downloaded_at: chrono::Utc::now(),
            destination: folder,
            filename: filename.clone(),
            channel_id: origin.channel_id,
            user_id: origin.author_id,
            size_bytes,
            media_type,
        };
        let record_id = self
            .db
            .insert_download_record(&record)
            .await
            .map_err(|e| DownloadFailure::new(FailureReason::RecordWrite, e))?;

        tracing::info!(
            url = %candidate.url,
            path = %path.display(),
            size_bytes,
            media_type = media_type.as_str(),
            "Downloaded file"
        );

        Ok(Attempt::Saved(DownloadedFile {
            path,
            filename,
            media_type,
            size_bytes,
            record_id,
        }))
    }

    async fn already_recorded(&self, url: &str) -> bool {
        match self.db.has_record_for_url(url).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Duplicate lookup failed, downloading anyway");
                false
            }
        }
    }
}

/// Destination root plus the configured server/channel/user/year/month folders
fn destination_folder(
    policy: &Policy,
    origin: &MessageOrigin,
    candidate: &MediaCandidate,
) -> PathBuf {
    let mut folder = policy.destination.clone();
    let divide = &policy.divide;

    if divide.server {
        match origin.guild_id {
            Some(guild) => folder.push(guild.to_string()),
            None => folder.push(DIRECT_MESSAGES_FOLDER),
        }
    }
    if divide.channel {
        folder.push(origin.channel_id.to_string());
    }
    if divide.user {
        folder.push(origin.author_id.to_string());
    }
    if divide.year {
        folder.push(candidate.timestamp.format("%Y").to_string());
    }
    if divide.month {
        folder.push(candidate.timestamp.format("%m").to_string());
    }

    folder
}

/// Suggested name, or a generic one; unsafe names become a placeholder
///
/// A name without an extension gets the sniffed one.
fn resolve_filename(suggested: Option<String>, sniffed_extension: &str) -> String {
    let name = match suggested {
        Some(name) if is_safe_filename(&name) => name,
        Some(name) => {
            tracing::debug!(filename = %name, "Replacing unsafe filename");
            return format!("{}{}", PLACEHOLDER_FILENAME, sniffed_extension);
        }
        None => return format!("{}{}", GENERIC_FILENAME, sniffed_extension),
    };

    match split_extension(&name).1 {
        Some(_) => name,
        None => format!("{}{}", name, sniffed_extension),
    }
}

/// Date prefix joined to the resolved name
///
/// A name that the prefix pushes past the filename limit falls back to the
/// placeholder, then to the bare name.
fn compose_filename(prefix: &str, name: String) -> String {
    if prefix.is_empty() {
        return name;
    }
    let prefixed = format!("{} {}", prefix, name);
    if is_safe_filename(&prefixed) {
        return prefixed;
    }

    let extension = split_extension(&name).1.unwrap_or_default();
    let placeholder = format!("{} {}{}", prefix, PLACEHOLDER_FILENAME, extension);
    if is_safe_filename(&placeholder) {
        tracing::debug!(filename = %name, "Prefixed filename too long, using placeholder");
        placeholder
    } else {
        name
    }
}
