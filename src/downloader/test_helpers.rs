//! Shared test helpers for creating MediaDownloader instances in tests.

use crate::config::Config;
use crate::downloader::MediaDownloader;
use crate::error::PlatformError;
use crate::platform::{
    ChannelInfo, ChatPlatform, GuildEmoji, HISTORY_PAGE_SIZE, HistoryPage, PlatformResult,
};
use crate::scraper::ScraperRegistry;
use crate::types::{Attachment, ChannelId, GuildId, Message, MessageId, RoleId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

pub(crate) const GUILD: GuildId = GuildId(900);
pub(crate) const AUTHOR: UserId = UserId(500);

/// Time of the message with the given ID in tests
pub(crate) fn message_time(id: u64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 7, 1, 10, 0, 0).unwrap()
        + chrono::Duration::seconds((id % 86_400) as i64)
}

/// Plain text message in `channel`
pub(crate) fn message(id: u64, channel: u64, content: &str) -> Message {
    Message {
        id: MessageId(id),
        channel_id: ChannelId(channel),
        guild_id: Some(GUILD),
        author_id: AUTHOR,
        author_is_bot: false,
        content: content.to_string(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        timestamp: message_time(id),
        edited: false,
    }
}

/// Message carrying one attachment
pub(crate) fn attachment_message(id: u64, channel: u64, url: &str, filename: &str) -> Message {
    let mut message = message(id, channel, "");
    message.attachments.push(Attachment {
        url: url.to_string(),
        filename: filename.to_string(),
        size: 0,
    });
    message
}

/// Smallest valid PNG header, enough for classification
pub(crate) const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

/// Matroska/WebM header
pub(crate) const WEBM: &[u8] = b"\x1a\x45\xdf\xa3\x9f\x42\x86\x81\x01\x42\xf7\x81\x01webm";

/// In-memory chat platform
///
/// History is served from scripted pages first; once the script is used up,
/// pages are cut from `store` the way the real service would.
pub(crate) struct MockPlatform {
    pub channels: Mutex<HashMap<ChannelId, ChannelInfo>>,
    pub roles: Mutex<HashMap<UserId, Vec<RoleId>>>,
    pub emojis: Mutex<Vec<GuildEmoji>>,
    pub can_read: Mutex<PlatformResult<bool>>,
    pub scripted_pages: Mutex<VecDeque<PlatformResult<Vec<Message>>>>,
    pub store: Mutex<Vec<Message>>,
    pub page_size: AtomicUsize,
    /// History requests from this index on fail
    pub fail_history_from: AtomicUsize,
    /// Pause before answering a history request
    pub history_delay: Mutex<Duration>,
    pub history_requests: Mutex<Vec<(ChannelId, HistoryPage)>>,
    pub sent: Mutex<Vec<(ChannelId, MessageId, String)>>,
    pub edits: Mutex<Vec<(ChannelId, MessageId, String)>>,
    pub fail_edits: std::sync::atomic::AtomicBool,
    pub reactions: Mutex<Vec<(ChannelId, MessageId, String)>>,
    next_message_id: AtomicU64,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            roles: Mutex::new(HashMap::new()),
            emojis: Mutex::new(Vec::new()),
            can_read: Mutex::new(Ok(true)),
            scripted_pages: Mutex::new(VecDeque::new()),
            store: Mutex::new(Vec::new()),
            page_size: AtomicUsize::new(HISTORY_PAGE_SIZE),
            fail_history_from: AtomicUsize::new(usize::MAX),
            history_delay: Mutex::new(Duration::ZERO),
            history_requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            fail_edits: std::sync::atomic::AtomicBool::new(false),
            reactions: Mutex::new(Vec::new()),
            next_message_id: AtomicU64::new(1_000_000),
        }
    }
}

impl MockPlatform {
    pub(crate) fn script_page(&self, page: Vec<Message>) {
        self.scripted_pages.lock().unwrap().push_back(Ok(page));
    }

    pub(crate) fn set_channel(&self, info: ChannelInfo) {
        self.channels.lock().unwrap().insert(info.id, info);
    }

    pub(crate) fn history_requests(&self) -> Vec<HistoryPage> {
        self.history_requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, page)| *page)
            .collect()
    }

    pub(crate) fn reactions(&self) -> Vec<String> {
        self.reactions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, emoji)| emoji.clone())
            .collect()
    }

    pub(crate) fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, text)| text.clone())
            .collect()
    }

    fn page_from_store(&self, channel: ChannelId, page: HistoryPage) -> Vec<Message> {
        let size = self.page_size.load(Ordering::SeqCst);
        let mut messages: Vec<Message> = self
            .store
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel_id == channel)
            .cloned()
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.id));

        match page {
            HistoryPage::Latest => messages.into_iter().take(size).collect(),
            HistoryPage::Before(id) => messages
                .into_iter()
                .filter(|m| m.id < id)
                .take(size)
                .collect(),
            HistoryPage::After(id) => {
                // The page right after `id`, still newest first
                let mut newer: Vec<Message> =
                    messages.into_iter().filter(|m| m.id > id).collect();
                let keep = newer.len().saturating_sub(size);
                newer.drain(..keep);
                newer
            }
        }
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId> {
        let id = MessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst));
        self.sent
            .lock()
            .unwrap()
            .push((channel, id, content.to_string()));
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> PlatformResult<()> {
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(PlatformError::NotFound(format!("message {}", message)));
        }
        self.edits
            .lock()
            .unwrap()
            .push((channel, message, content.to_string()));
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((channel, message, emoji.to_string()));
        Ok(())
    }

    async fn channel_info(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        Ok(self
            .channels
            .lock()
            .unwrap()
            .get(&channel)
            .cloned()
            .unwrap_or(ChannelInfo {
                id: channel,
                guild_id: Some(GUILD),
                category_id: None,
                thread_parent: None,
            }))
    }

    async fn member_roles(&self, _guild: GuildId, user: UserId) -> PlatformResult<Vec<RoleId>> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .get(&user)
            .cloned()
            .unwrap_or_default())
    }

    async fn guild_emojis(&self, _guild: GuildId) -> PlatformResult<Vec<GuildEmoji>> {
        Ok(self.emojis.lock().unwrap().clone())
    }

    async fn can_read_history(&self, _channel: ChannelId) -> PlatformResult<bool> {
        self.can_read.lock().unwrap().clone()
    }

    async fn fetch_history(
        &self,
        channel: ChannelId,
        page: HistoryPage,
    ) -> PlatformResult<Vec<Message>> {
        let delay = *self.history_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let index = {
            let mut requests = self.history_requests.lock().unwrap();
            requests.push((channel, page));
            requests.len() - 1
        };
        if index >= self.fail_history_from.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("connection reset".to_string()));
        }

        if let Some(scripted) = self.scripted_pages.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(self.page_from_store(channel, page))
    }
}

/// Configuration rooted in `dir`: database, cursors and default destination
///
/// Filename date prefixes are off unless the rules set one, and all waits are
/// shortened so tests run quickly.
pub(crate) fn test_config(dir: &Path, json: &str) -> Config {
    let mut config = Config::from_json(json).unwrap();
    config.persistence.database_path = dir.join("test.db");
    config.history.cursor_dir = dir.join("cursors");
    config.history.check_interval = Duration::from_millis(20);
    config.history.empty_page_retry_delay = Duration::from_millis(1);
    config.download.retry_delay = Duration::from_millis(1);
    config.download.request_timeout = Duration::from_secs(5);
    if config.defaults.destination.is_none() {
        config.defaults.destination = Some(dir.join("downloads"));
    }
    if config.defaults.filename_date_format.is_none() {
        config.defaults.filename_date_format = Some(String::new());
    }
    config
}

/// Downloader over `platform` with the rules in `json`
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_downloader_with(
    json: &str,
    platform: Arc<MockPlatform>,
) -> (MediaDownloader, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), json);
    let downloader = MediaDownloader::new(config, platform, ScraperRegistry::default())
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// Helper to create a test MediaDownloader instance with a persistent database.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (MediaDownloader, tempfile::TempDir) {
    create_downloader_with("{}", Arc::new(MockPlatform::default())).await
}

/// Poll `condition` every 10ms for up to five seconds
pub(crate) async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
