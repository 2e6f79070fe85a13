//! Resumption cursors for history backfill
//!
//! One small text file per channel and direction under the cursor directory,
//! holding the last processed message ID. Files are written to a temporary
//! name and renamed into place so a crash never leaves a truncated cursor.

use crate::error::Result;
use crate::types::{ChannelId, MessageId};
use std::path::{Path, PathBuf};

/// Which end of the channel a cursor tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorDirection {
    /// Oldest message reached while paging backwards
    Before,
    /// Newest message seen; later runs only look past it
    Since,
}

impl CursorDirection {
    fn suffix(&self) -> &'static str {
        match self {
            CursorDirection::Before => "before",
            CursorDirection::Since => "since",
        }
    }
}

/// On-disk cursor store
#[derive(Clone, Debug)]
pub struct CursorStore {
    dir: PathBuf,
}

impl CursorStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the cursor files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, channel: ChannelId, direction: CursorDirection) -> PathBuf {
        self.dir
            .join(format!("{}_{}", channel.get(), direction.suffix()))
    }

    /// Read a cursor; missing or unreadable files count as absent
    pub async fn load(&self, channel: ChannelId, direction: CursorDirection) -> Option<MessageId> {
        let path = self.path(channel, direction);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read history cursor");
                return None;
            }
        };
        match text.parse::<MessageId>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed history cursor");
                None
            }
        }
    }

    /// Write a cursor
    pub async fn save(
        &self,
        channel: ChannelId,
        direction: CursorDirection,
        id: MessageId,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(channel, direction);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, id.to_string()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Remove a cursor; removing a missing cursor is not an error
    pub async fn delete(&self, channel: ChannelId, direction: CursorDirection) -> Result<()> {
        match tokio::fs::remove_file(self.path(channel, direction)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
