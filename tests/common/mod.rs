//! Common test utilities for chat-media-dl integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chat_media_dl::{
    Attachment, ChannelId, ChannelInfo, ChatPlatform, Config, Event, ExpandedLink, GuildEmoji,
    GuildId, HistoryPage, MediaDownloader, Message, MessageId, PlatformResult, RoleId,
    ScraperAdapter, ScraperRegistry, UserId,
};
use chrono::{TimeZone, Utc};
use regex::Regex;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const GUILD: GuildId = GuildId(1);

/// Smallest valid PNG header
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01\x08\x06\0\0\0";

/// Chat service backed by an in-memory message list
#[derive(Default)]
pub struct MemoryPlatform {
    pub messages: Mutex<Vec<Message>>,
    pub reactions: Mutex<Vec<(MessageId, String)>>,
    pub sent: Mutex<Vec<(ChannelId, String)>>,
}

impl MemoryPlatform {
    pub fn post(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    pub fn reactions(&self) -> Vec<(MessageId, String)> {
        self.reactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for MemoryPlatform {
    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((channel, content.to_string()));
        Ok(MessageId(9_000_000 + sent.len() as u64))
    }

    async fn edit_message(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        _content: &str,
    ) -> PlatformResult<()> {
        Ok(())
    }

    async fn add_reaction(
        &self,
        _channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> PlatformResult<()> {
        self.reactions
            .lock()
            .unwrap()
            .push((message, emoji.to_string()));
        Ok(())
    }

    async fn channel_info(&self, channel: ChannelId) -> PlatformResult<ChannelInfo> {
        Ok(ChannelInfo {
            id: channel,
            guild_id: Some(GUILD),
            category_id: None,
            thread_parent: None,
        })
    }

    async fn member_roles(&self, _guild: GuildId, _user: UserId) -> PlatformResult<Vec<RoleId>> {
        Ok(Vec::new())
    }

    async fn guild_emojis(&self, _guild: GuildId) -> PlatformResult<Vec<GuildEmoji>> {
        Ok(Vec::new())
    }

    async fn can_read_history(&self, _channel: ChannelId) -> PlatformResult<bool> {
        Ok(true)
    }

    async fn fetch_history(
        &self,
        channel: ChannelId,
        page: HistoryPage,
    ) -> PlatformResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel_id == channel)
            .cloned()
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.id));

        Ok(match page {
            HistoryPage::Latest => messages,
            HistoryPage::Before(id) => messages.into_iter().filter(|m| m.id < id).collect(),
            HistoryPage::After(id) => messages.into_iter().filter(|m| m.id > id).collect(),
        })
    }
}

/// Adapter expanding `/gallery/<name>` pages that list one media URL per line
pub struct GalleryScraper {
    pattern: Regex,
    client: reqwest::Client,
}

impl GalleryScraper {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"^http://127\.0\.0\.1:\d+/gallery/").unwrap(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ScraperAdapter for GalleryScraper {
    fn name(&self) -> &str {
        "gallery"
    }

    fn pattern(&self) -> &Regex {
        &self.pattern
    }

    async fn expand(&self, url: &str) -> chat_media_dl::Result<Vec<ExpandedLink>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .text()
            .await?;
        Ok(body
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| ExpandedLink::new(line, None))
            .collect())
    }
}

/// Message from user 2 in `channel`
pub fn message(id: u64, channel: u64, content: &str) -> Message {
    Message {
        id: MessageId(id),
        channel_id: ChannelId(channel),
        guild_id: Some(GUILD),
        author_id: UserId(2),
        author_is_bot: false,
        content: content.to_string(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        edited: false,
    }
}

/// Message carrying one attachment
pub fn attachment_message(id: u64, channel: u64, url: &str, filename: &str) -> Message {
    let mut message = message(id, channel, "");
    message.attachments.push(Attachment {
        url: url.to_string(),
        filename: filename.to_string(),
        size: 0,
    });
    message
}

/// Downloader with the rules in `json`, rooted in a fresh temp dir
pub async fn create_downloader(
    json: &str,
    platform: Arc<MemoryPlatform>,
) -> (MediaDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::from_json(json).unwrap();
    config.persistence.database_path = temp_dir.path().join("records.db");
    config.history.cursor_dir = temp_dir.path().join("cursors");
    config.history.check_interval = Duration::from_millis(20);
    config.history.empty_page_retry_delay = Duration::from_millis(1);
    config.defaults.destination = Some(temp_dir.path().join("media"));
    config.defaults.filename_date_format = Some(String::new());

    let scrapers = ScraperRegistry::new().with(Arc::new(GalleryScraper::new()));
    let downloader = MediaDownloader::new(config, platform, scrapers)
        .await
        .unwrap();
    (downloader, temp_dir)
}

/// Wait for the `HistoryFinished` event of `channel`
pub async fn wait_for_history(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    channel: ChannelId,
) -> chat_media_dl::HistoryStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(Event::HistoryFinished { channel_id, status }) if channel_id == channel => {
                    return status;
                }
                Ok(_) => {}
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await
    .expect("history job did not finish")
}
