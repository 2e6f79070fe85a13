//! Runtime configuration reloads.

use crate::config::Config;
use crate::error::Result;
use crate::types::Event;

use super::MediaDownloader;

impl MediaDownloader {
    /// Replace the running configuration
    ///
    /// Every rule is resolved before anything changes. On success the new
    /// snapshot is swapped in atomically: messages already being processed
    /// finish with the policy they started with, later messages see the new
    /// one. On error the previous configuration stays active.
    ///
    /// The database path is read once at startup and is not affected.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use chat_media_dl::*;
    /// # async fn example(downloader: MediaDownloader) -> Result<()> {
    /// let config = Config::load(std::path::Path::new("config.json"))?;
    /// downloader.reload_config(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn reload_config(&self, config: Config) -> Result<()> {
        self.config.reload(config)?;

        tracing::info!("Configuration reloaded");
        self.emit_event(Event::ConfigReloaded);
        // The running limit or check interval may have changed
        self.history.wakeup.notify_one();

        Ok(())
    }
}
