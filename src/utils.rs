//! Utility functions for file operations and filename handling

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest filename (in bytes) accepted from a URL or header
const MAX_FILENAME_LEN: usize = 255;

/// Characters that are not allowed in saved filenames on any supported platform
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// What to do when the target file already exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileCollisionAction {
    /// Keep both files; the new one gets a " (N)" suffix
    Rename,
    /// Do not write the new file
    Skip,
}

/// Write `contents` to `path`, or to a free sibling of it, without ever
/// replacing an existing file
///
/// Each name is claimed with `create_new`, so concurrent writers racing for
/// the same name end up with distinct files. Returns `Ok(None)` when the file
/// exists and the action is [`FileCollisionAction::Skip`]. For
/// [`FileCollisionAction::Rename`], tries `name (1).ext`, `name (2).ext`, ...
/// and gives up after 9999 attempts.
///
/// # Examples
///
/// ```no_run
/// use chat_media_dl::utils::{create_unique_file, FileCollisionAction};
/// use std::path::Path;
///
/// # async fn example() -> chat_media_dl::Result<()> {
/// let path = Path::new("/tmp/media/picture.png");
/// let written = create_unique_file(path, b"data", FileCollisionAction::Rename).await?;
/// assert!(written.is_some());
/// # Ok(())
/// # }
/// ```
pub async fn create_unique_file(
    path: &Path,
    contents: &[u8],
    action: FileCollisionAction,
) -> Result<Option<PathBuf>> {
    let mut file = match open_new(path).await? {
        Some(file) => Some((path.to_path_buf(), file)),
        None if action == FileCollisionAction::Skip => return Ok(None),
        None => None,
    };

    if file.is_none() {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Other(format!("cannot extract file stem: {}", path.display())))?;
        let extension = path.extension().and_then(|e| e.to_str());
        let parent = path
            .parent()
            .ok_or_else(|| Error::Other(format!("cannot extract parent: {}", path.display())))?;

        for i in 1..=MAX_RENAME_ATTEMPTS {
            let new_name = match extension {
                Some(ext) => format!("{} ({}).{}", stem, i, ext),
                None => format!("{} ({})", stem, i),
            };
            let new_path = parent.join(new_name);
            if let Some(created) = open_new(&new_path).await? {
                file = Some((new_path, created));
                break;
            }
        }
    }

    let Some((path, mut file)) = file else {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!(
                "could not find a unique filename for {} after {} attempts",
                path.display(),
                MAX_RENAME_ATTEMPTS
            ),
        )));
    };

    let written = async {
        file.write_all(contents).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        // Release the claimed name so a retry can take it again
        drop(file);
        tokio::fs::remove_file(&path).await.ok();
        return Err(Error::Io(e));
    }

    Ok(Some(path))
}

/// Claim `path`; `None` when something already exists there
async fn open_new(path: &Path) -> Result<Option<tokio::fs::File>> {
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Last path segment of a URL, percent-decoded
///
/// Returns `None` for URLs ending in `/` or that do not parse.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(decoded)
}

/// Filename from a `Content-Disposition` header value
///
/// Handles both `filename="name.ext"` and the RFC 5987 form
/// `filename*=UTF-8''name.ext`; the encoded form wins when both are present.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(encoded) = part.strip_prefix("filename*=") {
            // Format is: charset'lang'encoded-filename
            let encoded = encoded.trim_matches('"');
            let encoded = match encoded.rfind('\'') {
                Some(idx) => &encoded[idx + 1..],
                None => encoded,
            };
            if let Ok(decoded) = urlencoding::decode(encoded)
                && !decoded.is_empty()
            {
                return Some(decoded.into_owned());
            }
        } else if let Some(name) = part.strip_prefix("filename=") {
            let name = name.trim_matches('"');
            if !name.is_empty() {
                plain = Some(name.to_string());
            }
        }
    }
    plain
}

/// Filename suggested by an HTTP response
///
/// Tries the final (post-redirect) URL first, then `Content-Disposition`.
pub fn filename_from_response(response: &reqwest::Response) -> Option<String> {
    filename_from_url(response.url().as_str()).or_else(|| {
        response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition)
    })
}

/// Whether a filename can be written as-is into the destination folder
///
/// Rejects empty names, `.`/`..`, path separators, reserved characters,
/// control characters and names longer than 255 bytes.
#[must_use]
pub fn is_safe_filename(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && trimmed != ".."
        && name.len() <= MAX_FILENAME_LEN
        && !name.contains(RESERVED_CHARS)
        && !name.chars().any(char::is_control)
}

/// Split a filename into stem and extension (with the leading dot)
///
/// `"photo.JPG"` → `("photo", Some(".JPG"))`; `".hidden"` → `(".hidden", None)`.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx..])),
        _ => (name, None),
    }
}

/// Set a file's modification time
pub fn set_modified_time(path: &Path, time: DateTime<Utc>) -> std::io::Result<()> {
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_modified(time.into())
}
