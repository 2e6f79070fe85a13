//! Scraper adapters for media hosting sites
//!
//! An adapter turns a hosting page URL (a gallery, a share link) into the
//! direct media URLs behind it. Adapters are keyed by a URL pattern; the
//! registry hands a URL to the first adapter whose pattern matches.

use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// A direct media link produced by an adapter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpandedLink {
    /// Direct media URL
    pub url: String,
    /// Filename suggested by the hosting site
    pub filename: Option<String>,
}

impl ExpandedLink {
    /// Link with a suggested filename
    pub fn new(url: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            url: url.into(),
            filename,
        }
    }
}

/// Expands hosting URLs into direct media URLs
#[async_trait]
pub trait ScraperAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// URLs this adapter handles
    fn pattern(&self) -> &Regex;

    /// Direct media links behind `url`, in the order the site lists them
    async fn expand(&self, url: &str) -> Result<Vec<ExpandedLink>>;
}

/// Ordered set of adapters; the first matching pattern wins
#[derive(Clone, Default)]
pub struct ScraperRegistry {
    adapters: Vec<Arc<dyn ScraperAdapter>>,
}

impl ScraperRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter after the existing ones
    pub fn register(&mut self, adapter: Arc<dyn ScraperAdapter>) {
        self.adapters.push(adapter);
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, adapter: Arc<dyn ScraperAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// First adapter whose pattern matches `url`
    pub fn find(&self, url: &str) -> Option<&Arc<dyn ScraperAdapter>> {
        self.adapters
            .iter()
            .find(|adapter| adapter.pattern().is_match(url))
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapters are registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|adapter| adapter.name()))
            .finish()
    }
}
