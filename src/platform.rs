//! Chat platform seam
//!
//! The downloader never talks to a chat service directly. The embedding
//! application supplies a [`ChatPlatform`] that sends messages, adds reactions,
//! reports channel metadata and pages through history.

use crate::error::PlatformError;
use crate::types::{ChannelId, GuildId, Message, MessageId, RoleId, UserId};
use async_trait::async_trait;

/// Maximum number of messages in one history page
pub const HISTORY_PAGE_SIZE: usize = 100;

/// Result type for platform calls
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Placement of a channel within its server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    /// The channel itself
    pub id: ChannelId,
    /// Server, `None` for direct messages
    pub guild_id: Option<GuildId>,
    /// Category the channel (or its parent, for threads) sits in
    pub category_id: Option<ChannelId>,
    /// Parent channel when this is a thread
    pub thread_parent: Option<ChannelId>,
}

/// Custom emoji defined on a server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuildEmoji {
    /// Emoji ID
    pub id: u64,
    /// Emoji name
    pub name: String,
    /// Animated emoji are never used as reactions
    pub animated: bool,
}

impl GuildEmoji {
    /// Reaction string understood by [`ChatPlatform::add_reaction`]
    pub fn reaction(&self) -> String {
        format!("{}:{}", self.name, self.id)
    }
}

/// Which slice of history to request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryPage {
    /// The newest messages
    Latest,
    /// Messages older than the given ID, newest first
    Before(MessageId),
    /// Messages newer than the given ID
    After(MessageId),
}

/// Operations the downloader needs from the chat service
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a text message, returning its ID
    async fn send_message(&self, channel: ChannelId, content: &str) -> PlatformResult<MessageId>;

    /// Replace the text of a message the bot posted
    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: &str,
    ) -> PlatformResult<()>;

    /// React to a message with a unicode emoji or a `name:id` custom emoji
    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> PlatformResult<()>;

    /// Where a channel sits (server, category, thread parent)
    async fn channel_info(&self, channel: ChannelId) -> PlatformResult<ChannelInfo>;

    /// Roles a member holds on a server
    async fn member_roles(&self, guild: GuildId, user: UserId) -> PlatformResult<Vec<RoleId>>;

    /// Custom emoji defined on a server
    async fn guild_emojis(&self, guild: GuildId) -> PlatformResult<Vec<GuildEmoji>>;

    /// Whether the bot may read the channel's message history
    async fn can_read_history(&self, channel: ChannelId) -> PlatformResult<bool>;

    /// Up to [`HISTORY_PAGE_SIZE`] messages; an empty page means nothing was returned
    async fn fetch_history(
        &self,
        channel: ChannelId,
        page: HistoryPage,
    ) -> PlatformResult<Vec<Message>>;
}
