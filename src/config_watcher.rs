//! Config file watching for live reloads
//!
//! Watches the directory holding the configuration file (editors often
//! replace a file instead of writing it in place) and reloads the downloader
//! whenever the file is created or modified. A file that fails to parse or
//! resolve is logged and the running configuration stays in effect.
//!
//! # Example
//!
//! ```no_run
//! use chat_media_dl::MediaDownloader;
//! use chat_media_dl::config_watcher::ConfigWatcher;
//! use std::path::PathBuf;
//!
//! # async fn example(downloader: MediaDownloader) -> Result<(), Box<dyn std::error::Error>> {
//! let mut watcher = ConfigWatcher::new(downloader, PathBuf::from("config.json"))?;
//! watcher.start()?;
//!
//! // Run the watcher (blocks until shutdown)
//! watcher.run().await;
//! # Ok(())
//! # }
//! ```

use crate::MediaDownloader;
use crate::config::Config;
use crate::error::{Error, Result};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Quiet period after the last event before reloading (editors write in bursts)
const SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Watches the configuration file and reloads the downloader on change
pub struct ConfigWatcher {
    /// Filesystem watcher instance
    watcher: RecommendedWatcher,

    /// Channel for receiving filesystem events
    rx: mpsc::UnboundedReceiver<notify::Result<Event>>,

    /// Downloader receiving reloaded configurations
    downloader: MediaDownloader,

    /// Configuration file
    path: PathBuf,

    /// File name of `path`, compared against event paths
    file_name: OsString,
}

impl ConfigWatcher {
    /// Create a new config watcher
    ///
    /// # Errors
    /// Returns error if `path` has no file name or the filesystem watcher cannot be initialized
    pub fn new(downloader: MediaDownloader, path: PathBuf) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                Error::ConfigWatch(format!("not a file path: {}", path.display()))
            })?;

        let (tx, rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("Failed to send filesystem event: {}", e);
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|e| Error::ConfigWatch(e.to_string()))?;

        Ok(Self {
            watcher,
            rx,
            downloader,
            path,
            file_name,
        })
    }

    /// Start watching the directory holding the configuration file
    ///
    /// # Errors
    /// Returns error if the directory cannot be watched (e.g., doesn't exist, permission denied)
    pub fn start(&mut self) -> Result<()> {
        let dir = self.watch_dir();
        self.watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::ConfigWatch(format!("Failed to watch {}: {}", dir.display(), e)))?;

        info!(path = %self.path.display(), "Watching configuration file");
        Ok(())
    }

    /// Run the watcher event loop
    ///
    /// Should be spawned as a tokio task. Ends when the downloader shuts down
    /// or the event channel closes.
    pub async fn run(mut self) {
        let token = self.downloader.shutdown_token.clone();

        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.rx.recv() => result,
            };

            match result {
                Some(Ok(event)) => {
                    if self.concerns_config(&event) {
                        self.settle().await;
                        self.reload();
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Filesystem watcher error");
                }
                None => break,
            }
        }

        info!("Config watcher stopped");
    }

    fn watch_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Whether an event touches the configuration file with new content
    fn concerns_config(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
            && event.paths.iter().any(|path| self.is_config_file(path))
    }

    fn is_config_file(&self, path: &Path) -> bool {
        path.file_name() == Some(self.file_name.as_os_str())
    }

    /// Wait until no further events arrive for [`SETTLE_DELAY`]
    async fn settle(&mut self) {
        loop {
            match tokio::time::timeout(SETTLE_DELAY, self.rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => return,
            }
        }
    }

    fn reload(&self) {
        debug!(path = %self.path.display(), "Configuration file changed");

        let config = match Config::load(&self.path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring invalid configuration file");
                return;
            }
        };

        if let Err(e) = self.downloader.reload_config(config) {
            warn!(path = %self.path.display(), error = %e, "Configuration rejected, keeping previous");
        }
    }
}
