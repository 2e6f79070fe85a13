//! Source router: message origin → effective policy
//!
//! Every rule in the configuration is merged with the global defaults and the
//! hardcoded defaults exactly once, when a configuration is loaded, producing a
//! [`ResolvedConfig`]. Lookups then walk the precedence cascade
//! (channel → category → server → user → all) without consulting more than one
//! layer per field. [`ConfigStore`] holds the current snapshot and replaces it
//! atomically on reload.

use crate::config::{
    Config, DEFAULT_BLOCKED_EXTENSIONS, DEFAULT_FILENAME_DATE_FORMAT, DEFAULT_MAX_ATTEMPTS,
    SourceRule, SourceSettings, default_destination,
};
use crate::error::{Error, Result};
use crate::types::{ChannelId, GuildId, MediaType, MessageOrigin, RoleId, UserId};
use crate::utils::is_safe_filename;
use arc_swap::ArcSwap;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Extensions that are never saved regardless of policy (domain-looking suffixes)
const ALWAYS_BLOCKED_EXTENSIONS: &[&str] = &[".com", ".net", ".org"];

/// Which media types a policy saves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeFilter {
    /// Images
    pub images: bool,
    /// Videos
    pub videos: bool,
    /// Audio
    pub audio: bool,
    /// Text
    pub text: bool,
    /// Everything else
    pub applications: bool,
}

impl TypeFilter {
    /// Whether files of `media_type` are saved
    pub fn allows(&self, media_type: MediaType) -> bool {
        match media_type {
            MediaType::Image => self.images,
            MediaType::Video => self.videos,
            MediaType::Audio => self.audio,
            MediaType::Text => self.text,
            MediaType::Application => self.applications,
        }
    }
}

/// Subfolder layout flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DivideBy {
    /// `<year>/`
    pub year: bool,
    /// `<month>/`
    pub month: bool,
    /// `<server id>/`
    pub server: bool,
    /// `<channel id>/`
    pub channel: bool,
    /// `<user id>/`
    pub user: bool,
    /// `<media type>/`
    pub media_type: bool,
}

/// Reaction added after a successful download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionPolicy {
    /// React at all
    pub enabled: bool,
    /// Fixed emoji; `None` picks a random server emoji
    pub emoji: Option<String>,
    /// Server emoji names never picked at random
    pub blacklist: HashSet<String>,
}

/// Sources and content a policy refuses
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blacklist {
    /// Authors
    pub users: HashSet<UserId>,
    /// Author roles
    pub roles: HashSet<RoleId>,
    /// Lowercased phrases matched against message content
    pub phrases: Vec<String>,
    /// Lowercased domains; subdomains match too
    pub domains: HashSet<String>,
    /// Channels (a thread also matches through its parent)
    pub channels: HashSet<ChannelId>,
    /// Categories
    pub categories: HashSet<ChannelId>,
    /// Servers
    pub servers: HashSet<GuildId>,
}

impl Blacklist {
    /// Whether this blacklist refuses a message from `origin`
    pub fn vetoes(&self, origin: &MessageOrigin) -> bool {
        if self.users.contains(&origin.author_id) {
            return true;
        }
        if origin.author_roles.iter().any(|role| self.roles.contains(role)) {
            return true;
        }
        if self.channels.contains(&origin.channel_id)
            || origin
                .thread_parent
                .is_some_and(|parent| self.channels.contains(&parent))
        {
            return true;
        }
        if origin
            .category_id
            .is_some_and(|category| self.categories.contains(&category))
        {
            return true;
        }
        if origin
            .guild_id
            .is_some_and(|guild| self.servers.contains(&guild))
        {
            return true;
        }
        if !self.phrases.is_empty() {
            let content = origin.content.to_lowercase();
            if self.phrases.iter().any(|phrase| content.contains(phrase)) {
                return true;
            }
        }
        false
    }

    /// Whether `url` points at a blacklisted domain or one of its subdomains
    pub fn blocks_domain(&self, url: &str) -> bool {
        if self.domains.is_empty() {
            return false;
        }
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        else {
            return false;
        };
        self.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Fully-defaulted settings for one message origin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    /// Process messages at all
    pub enabled: bool,
    /// Save files
    pub save: bool,
    /// Ignore bot authors
    pub ignore_bots: bool,
    /// Reprocess edited messages
    pub scan_edits: bool,
    /// Notify the channel after an exhausted failure
    pub send_error_messages: bool,
    /// Queue a backfill on startup
    pub history_autorun: bool,
    /// Attempts per candidate, at least 1
    pub max_attempts: u32,
    /// Destination root
    pub destination: PathBuf,
    /// strftime template for the filename prefix; empty disables the prefix
    pub filename_date_format: String,
    /// Allowed media types
    pub allowed_types: TypeFilter,
    /// Lowercased extensions with a leading dot
    pub blocked_extensions: HashSet<String>,
    /// Subfolder layout
    pub divide: DivideBy,
    /// Keep same-named files with a numeric suffix instead of skipping them
    pub save_possible_duplicates: bool,
    /// Reaction after success
    pub reaction: ReactionPolicy,
    /// Refused sources and content
    pub blacklist: Blacklist,
}

impl Policy {
    /// Build a policy from settings that have already been layered over the global defaults
    ///
    /// Fields still unset take their hardcoded defaults. `key` names the rule in
    /// configuration errors.
    pub fn from_settings(settings: &SourceSettings, key: &str) -> Result<Self> {
        let max_attempts = settings.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
        if max_attempts == 0 {
            return Err(Error::config(
                format!("{key}.max_attempts"),
                "must be at least 1",
            ));
        }

        let destination = settings
            .destination
            .clone()
            .unwrap_or_else(default_destination);
        if destination.as_os_str().is_empty() {
            return Err(Error::config(
                format!("{key}.destination"),
                "must not be empty",
            ));
        }

        let filename_date_format = settings
            .filename_date_format
            .clone()
            .unwrap_or_else(|| DEFAULT_FILENAME_DATE_FORMAT.to_string());
        if StrftimeItems::new(&filename_date_format).any(|item| matches!(item, Item::Error)) {
            return Err(Error::config(
                format!("{key}.filename_date_format"),
                format!("invalid date template: {filename_date_format:?}"),
            ));
        }
        let rendered = DateTime::<Utc>::UNIX_EPOCH
            .format(&filename_date_format)
            .to_string();
        if !rendered.is_empty() && !is_safe_filename(&rendered) {
            return Err(Error::config(
                format!("{key}.filename_date_format"),
                format!("date template renders an unusable filename: {rendered:?}"),
            ));
        }

        let blocked_extensions = match &settings.blocked_extensions {
            Some(list) => list
                .iter()
                .map(|ext| normalize_extension(ext))
                .filter(|ext| ext.len() > 1)
                .collect(),
            None => DEFAULT_BLOCKED_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_string())
                .collect(),
        };

        let emoji = settings
            .reaction_emoji
            .as_deref()
            .map(str::trim)
            .filter(|emoji| !emoji.is_empty())
            .map(str::to_string);
        if let Some(emoji) = &emoji
            && emoji.chars().any(char::is_whitespace)
        {
            return Err(Error::config(
                format!("{key}.reaction_emoji"),
                format!("not a single emoji: {emoji:?}"),
            ));
        }

        Ok(Policy {
            enabled: settings.enabled.unwrap_or(true),
            save: settings.save.unwrap_or(true),
            ignore_bots: settings.ignore_bots.unwrap_or(true),
            scan_edits: settings.scan_edits.unwrap_or(true),
            send_error_messages: settings.send_error_messages.unwrap_or(false),
            history_autorun: settings.history_autorun.unwrap_or(false),
            max_attempts,
            destination,
            filename_date_format,
            allowed_types: TypeFilter {
                images: settings.allow_images.unwrap_or(true),
                videos: settings.allow_videos.unwrap_or(true),
                audio: settings.allow_audio.unwrap_or(true),
                text: settings.allow_text.unwrap_or(false),
                applications: settings.allow_applications.unwrap_or(false),
            },
            blocked_extensions,
            divide: DivideBy {
                year: settings.divide_by_year.unwrap_or(false),
                month: settings.divide_by_month.unwrap_or(false),
                server: settings.divide_by_server.unwrap_or(false),
                channel: settings.divide_by_channel.unwrap_or(false),
                user: settings.divide_by_user.unwrap_or(false),
                media_type: settings.divide_by_type.unwrap_or(true),
            },
            save_possible_duplicates: settings.save_possible_duplicates.unwrap_or(false),
            reaction: ReactionPolicy {
                enabled: settings.react_when_downloaded.unwrap_or(true),
                emoji,
                blacklist: settings
                    .reaction_emoji_blacklist
                    .iter()
                    .flatten()
                    .cloned()
                    .collect(),
            },
            blacklist: Blacklist {
                users: settings.blacklisted_users.iter().flatten().copied().collect(),
                roles: settings.blacklisted_roles.iter().flatten().copied().collect(),
                phrases: settings
                    .blacklisted_phrases
                    .iter()
                    .flatten()
                    .map(|phrase| phrase.to_lowercase())
                    .filter(|phrase| !phrase.is_empty())
                    .collect(),
                domains: settings
                    .blacklisted_domains
                    .iter()
                    .flatten()
                    .map(|domain| domain.trim().trim_start_matches('.').to_lowercase())
                    .filter(|domain| !domain.is_empty())
                    .collect(),
                channels: settings
                    .blacklisted_channels
                    .iter()
                    .flatten()
                    .copied()
                    .collect(),
                categories: settings
                    .blacklisted_categories
                    .iter()
                    .flatten()
                    .copied()
                    .collect(),
                servers: settings
                    .blacklisted_servers
                    .iter()
                    .flatten()
                    .copied()
                    .collect(),
            },
        })
    }

    /// Whether files of `media_type` are saved
    pub fn allows_type(&self, media_type: MediaType) -> bool {
        self.allowed_types.allows(media_type)
    }

    /// Whether an extension (with or without the dot, any case) is refused
    pub fn blocks_extension(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        self.blocked_extensions.contains(&extension)
            || ALWAYS_BLOCKED_EXTENSIONS.contains(&extension.as_str())
    }

    /// Filename prefix for a file from a message posted at `timestamp`
    pub fn date_prefix(&self, timestamp: DateTime<Utc>) -> String {
        if self.filename_date_format.is_empty() {
            return String::new();
        }
        timestamp.format(&self.filename_date_format).to_string()
    }
}

fn normalize_extension(extension: &str) -> String {
    let extension = extension.trim().to_lowercase();
    if extension.starts_with('.') {
        extension
    } else {
        format!(".{extension}")
    }
}

#[derive(Debug)]
struct ResolvedRule {
    ids: HashSet<u64>,
    policy: Arc<Policy>,
}

impl ResolvedRule {
    fn resolve(rule: &SourceRule, defaults: &SourceSettings, key: &str) -> Result<Self> {
        let ids = rule.id_set();
        if ids.is_empty() {
            return Err(Error::config(key, "rule needs an id or ids"));
        }
        let settings = rule.settings.merge(defaults);
        Ok(ResolvedRule {
            ids,
            policy: Arc::new(Policy::from_settings(&settings, key)?),
        })
    }
}

fn find_rule(rules: &[ResolvedRule], id: u64) -> Option<&Arc<Policy>> {
    rules
        .iter()
        .find(|rule| rule.ids.contains(&id))
        .map(|rule| &rule.policy)
}

/// A configuration with every rule merged down to a [`Policy`]
#[derive(Debug)]
pub struct ResolvedConfig {
    config: Arc<Config>,
    channels: Vec<ResolvedRule>,
    categories: Vec<ResolvedRule>,
    servers: Vec<ResolvedRule>,
    users: Vec<ResolvedRule>,
    all: Option<Arc<Policy>>,
}

impl ResolvedConfig {
    /// Validate `config` and resolve every rule
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let defaults = &config.defaults;

        let resolve_all = |rules: &[SourceRule], section: &str| -> Result<Vec<ResolvedRule>> {
            rules
                .iter()
                .enumerate()
                .map(|(index, rule)| {
                    ResolvedRule::resolve(rule, defaults, &format!("{section}[{index}]"))
                })
                .collect()
        };

        let channels = resolve_all(&config.channels, "channels")?;
        let categories = resolve_all(&config.categories, "categories")?;
        let servers = resolve_all(&config.servers, "servers")?;
        let users = resolve_all(&config.users, "users")?;

        // The catch-all rule carries no IDs; it is consulted only when enabled
        let all = match &config.all {
            Some(rule) => {
                let policy = Policy::from_settings(&rule.settings.merge(defaults), "all")?;
                let explicitly_enabled = rule.settings.enabled.unwrap_or(false);
                (explicitly_enabled && policy.enabled).then(|| Arc::new(policy))
            }
            None => None,
        };

        Ok(ResolvedConfig {
            config: Arc::new(config),
            channels,
            categories,
            servers,
            users,
            all,
        })
    }

    /// The raw configuration this snapshot was resolved from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Effective policy for a message origin, `None` if the message is ignored
    ///
    /// The first matching rule decides. If its blacklist refuses the message,
    /// or its author is a bot and the policy ignores bots, or the policy is
    /// disabled, the result is `None` without consulting broader rules.
    pub fn resolve(&self, origin: &MessageOrigin) -> Option<Arc<Policy>> {
        let matched = self.first_match(origin)?;
        if !matched.enabled {
            return None;
        }
        if matched.blacklist.vetoes(origin) {
            return None;
        }
        if matched.ignore_bots && origin.author_is_bot {
            return None;
        }
        Some(Arc::clone(matched))
    }

    fn first_match(&self, origin: &MessageOrigin) -> Option<&Arc<Policy>> {
        find_rule(&self.channels, origin.channel_id.get())
            .or_else(|| {
                origin
                    .thread_parent
                    .and_then(|parent| find_rule(&self.channels, parent.get()))
            })
            .or_else(|| {
                origin
                    .category_id
                    .and_then(|category| find_rule(&self.categories, category.get()))
            })
            .or_else(|| {
                origin
                    .guild_id
                    .and_then(|guild| find_rule(&self.servers, guild.get()))
            })
            .or_else(|| find_rule(&self.users, origin.author_id.get()))
            .or(self.all.as_ref())
    }

    /// Channels whose own rule asks for a backfill on startup
    pub fn autorun_channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self
            .channels
            .iter()
            .filter(|rule| rule.policy.enabled && rule.policy.history_autorun)
            .flat_map(|rule| rule.ids.iter().copied().map(ChannelId))
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }
}

/// Holder of the current [`ResolvedConfig`], swapped atomically on reload
#[derive(Debug)]
pub struct ConfigStore {
    current: ArcSwap<ResolvedConfig>,
}

impl ConfigStore {
    /// Resolve `config` and hold it
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self {
            current: ArcSwap::from_pointee(ResolvedConfig::new(config)?),
        })
    }

    /// Resolve a replacement configuration and swap it in
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self, config: Config) -> Result<()> {
        let resolved = ResolvedConfig::new(config)?;
        self.current.store(Arc::new(resolved));
        Ok(())
    }

    /// The current snapshot; stays valid even if a reload happens afterwards
    pub fn snapshot(&self) -> Arc<ResolvedConfig> {
        self.current.load_full()
    }

    /// Resolve against the current snapshot
    pub fn resolve(&self, origin: &MessageOrigin) -> Option<Arc<Policy>> {
        self.current.load().resolve(origin)
    }
}
