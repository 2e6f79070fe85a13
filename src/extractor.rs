//! Link extraction: message → ordered, deduplicated media candidates

use crate::scraper::{ExpandedLink, ScraperRegistry};
use crate::types::{MediaCandidate, Message};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"'`]+"#).expect("valid URL regex"));

/// Punctuation that ends a sentence rather than a URL
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '*', '_', '~', '|'];

/// Finds media candidates in a message
///
/// Order is attachments, then URLs in the message text, then embed URLs.
/// Candidates are deduplicated by URL after adapter expansion, keeping the
/// first occurrence.
#[derive(Clone, Debug, Default)]
pub struct LinkExtractor {
    scrapers: ScraperRegistry,
}

impl LinkExtractor {
    /// Extractor using the given adapters
    pub fn new(scrapers: ScraperRegistry) -> Self {
        Self { scrapers }
    }

    /// Media candidates in `message`
    pub async fn extract(&self, message: &Message) -> Vec<MediaCandidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut push = |url: String, filename: Option<String>| {
            if seen.insert(url.clone()) {
                candidates.push(MediaCandidate {
                    url,
                    filename,
                    timestamp: message.timestamp,
                });
            }
        };

        for attachment in &message.attachments {
            let filename = (!attachment.filename.is_empty()).then(|| attachment.filename.clone());
            push(attachment.url.clone(), filename);
        }

        let linked = inline_urls(&message.content)
            .into_iter()
            .chain(message.embeds.iter().flat_map(|embed| embed.urls()));
        for url in linked {
            for link in self.expand(url).await {
                push(link.url, link.filename);
            }
        }

        candidates
    }

    /// Resolve one URL through the adapters
    ///
    /// A URL no adapter accepts is tried once more without its query string;
    /// if still unmatched, the URL itself is the candidate.
    async fn expand(&self, url: &str) -> Vec<ExpandedLink> {
        let stripped = strip_query(url);
        let matched = self
            .scrapers
            .find(url)
            .map(|adapter| (adapter, url))
            .or_else(|| {
                stripped
                    .as_deref()
                    .and_then(|bare| self.scrapers.find(bare).map(|adapter| (adapter, bare)))
            });

        let Some((adapter, target)) = matched else {
            return vec![ExpandedLink::new(url, None)];
        };

        match adapter.expand(target).await {
            Ok(links) => {
                tracing::debug!(
                    adapter = adapter.name(),
                    url = %target,
                    links = links.len(),
                    "Expanded link"
                );
                links
            }
            Err(e) => {
                tracing::warn!(adapter = adapter.name(), url = %target, error = %e, "Scraper failed");
                Vec::new()
            }
        }
    }
}

/// URLs in message text, in order of appearance
pub fn inline_urls(content: &str) -> Vec<&str> {
    URL_REGEX
        .find_iter(content)
        .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION))
        .filter(|url| url.len() > "https://".len())
        .collect()
}

fn strip_query(url: &str) -> Option<String> {
    let mut parsed = url::Url::parse(url).ok()?;
    parsed.query()?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.to_string())
}
