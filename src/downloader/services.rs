//! Background service starters (config file watcher).

use crate::config_watcher::ConfigWatcher;
use crate::error::Result;
use std::path::PathBuf;

use super::MediaDownloader;

impl MediaDownloader {
    /// Start the config watcher background task
    ///
    /// Reloads the configuration whenever `path` changes on disk. The task
    /// stops when the downloader shuts down.
    ///
    /// # Errors
    /// Returns error if the file's directory cannot be watched
    pub fn start_config_watcher(&self, path: PathBuf) -> Result<tokio::task::JoinHandle<()>> {
        let mut watcher = ConfigWatcher::new(self.clone(), path)?;

        watcher.start()?;

        let handle = tokio::spawn(async move {
            watcher.run().await;
        });

        tracing::info!("Config watcher background task started");

        Ok(handle)
    }
}
