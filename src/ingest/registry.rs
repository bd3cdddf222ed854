// src/ingest/registry.rs
//! Type tag → adapter constructor. Adding a source type means registering a
//! constructor here (or on a registry at startup), never branching elsewhere.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::providers::aggregator::AggregatorAdapter;
use super::providers::feed::FeedAdapter;
use super::providers::forum::ForumAdapter;
use super::providers::launch_board::LaunchBoardAdapter;
use super::providers::Fetcher;
use super::types::SourceAdapter;
use crate::config::SourceSpec;
use crate::error::{DigestError, Result};

pub type AdapterCtor = fn(&SourceSpec, &Fetcher) -> Result<Box<dyn SourceAdapter>>;

#[derive(Clone)]
pub struct AdapterRegistry {
    ctors: BTreeMap<String, AdapterCtor>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register("forum", build_forum);
        r.register("reddit", build_forum);
        r.register("aggregator", build_aggregator);
        r.register("hackernews", build_aggregator);
        r.register("feed", build_feed);
        r.register("rss", build_feed);
        r.register("launch_board", build_launch_board);
        r.register("producthunt", build_launch_board);
        r
    }

    /// Register (or replace) the constructor for `tag`. Tags are case-insensitive.
    pub fn register(&mut self, tag: &str, ctor: AdapterCtor) {
        self.ctors.insert(tag.trim().to_ascii_lowercase(), ctor);
    }

    pub fn types(&self) -> Vec<&str> {
        self.ctors.keys().map(String::as_str).collect()
    }

    pub fn build(&self, spec: &SourceSpec, fetcher: &Fetcher) -> Result<Box<dyn SourceAdapter>> {
        let tag = spec.type_tag.trim().to_ascii_lowercase();
        let ctor = self.ctors.get(&tag).ok_or_else(|| {
            DigestError::config(format!(
                "unknown source type '{}' (known: {})",
                spec.type_tag,
                self.types().join(", ")
            ))
        })?;
        ctor(spec, fetcher)
    }
}

#[derive(Deserialize)]
struct ForumParams {
    #[serde(alias = "community")]
    subreddit: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default = "default_forum_limit")]
    limit: u32,
}

fn default_forum_limit() -> u32 {
    50
}

fn build_forum(spec: &SourceSpec, fetcher: &Fetcher) -> Result<Box<dyn SourceAdapter>> {
    let p: ForumParams = spec.decode()?;
    let community = p.subreddit.trim().trim_start_matches("r/");
    if community.is_empty() {
        return Err(DigestError::config("forum source: subreddit must not be empty"));
    }
    Ok(Box::new(ForumAdapter::new(
        community,
        p.base_url.as_deref(),
        p.limit.clamp(1, 100),
        fetcher.clone(),
    )))
}

#[derive(Deserialize)]
struct AggregatorParams {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default = "default_max_items")]
    max_items: usize,
}

fn default_max_items() -> usize {
    200
}

fn build_aggregator(spec: &SourceSpec, fetcher: &Fetcher) -> Result<Box<dyn SourceAdapter>> {
    let p: AggregatorParams = spec.decode()?;
    Ok(Box::new(AggregatorAdapter::new(
        p.base_url.as_deref(),
        p.max_items.max(1),
        fetcher.clone(),
    )))
}

#[derive(Deserialize)]
struct FeedParams {
    #[serde(alias = "urls")]
    feeds: Vec<String>,
    #[serde(default)]
    name: Option<String>,
}

fn build_feed(spec: &SourceSpec, fetcher: &Fetcher) -> Result<Box<dyn SourceAdapter>> {
    let p: FeedParams = spec.decode()?;
    let urls: Vec<String> = p
        .feeds
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        return Err(DigestError::config("feed source: 'feeds' must list at least one URL"));
    }
    let label = p.name.unwrap_or_else(|| "rss".to_string());
    Ok(Box::new(FeedAdapter::new(label, urls, fetcher.clone())))
}

#[derive(Deserialize)]
struct LaunchBoardParams {
    #[serde(default)]
    feed_url: Option<String>,
}

fn build_launch_board(spec: &SourceSpec, fetcher: &Fetcher) -> Result<Box<dyn SourceAdapter>> {
    let p: LaunchBoardParams = spec.decode()?;
    Ok(Box::new(LaunchBoardAdapter::new(
        p.feed_url.as_deref(),
        fetcher.clone(),
    )))
}
