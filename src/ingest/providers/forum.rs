// src/ingest/providers/forum.rs
//! `forum` adapter: newest posts of one community from a Reddit-style JSON listing.

use async_trait::async_trait;
use serde::Deserialize;

use super::{from_unix, within_window, Fetcher};
use crate::error::{DigestError, Result};
use crate::ingest::types::{Fetched, RawItem, SourceAdapter, SourceKind};
use crate::ingest::window_cutoff;

pub const DEFAULT_FORUM_BASE: &str = "https://www.reddit.com";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: Option<String>,
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: Option<String>,
    url: Option<String>,
    created_utc: f64,
    score: Option<f64>,
}

pub struct ForumAdapter {
    community: String,
    label: String,
    base_url: String,
    limit: u32,
    fetcher: Fetcher,
}

impl ForumAdapter {
    pub fn new(community: &str, base_url: Option<&str>, limit: u32, fetcher: Fetcher) -> Self {
        Self {
            community: community.to_string(),
            label: format!("reddit/{community}"),
            base_url: base_url
                .unwrap_or(DEFAULT_FORUM_BASE)
                .trim_end_matches('/')
                .to_string(),
            limit: limit.clamp(1, 100),
            fetcher,
        }
    }

    pub fn listing_url(&self) -> String {
        format!(
            "{}/r/{}/new.json?limit={}",
            self.base_url, self.community, self.limit
        )
    }

    /// Parse a listing body. Children that do not decode as posts are skipped
    /// and counted. Returns (items, skipped).
    pub fn parse_listing(&self, body: &str) -> Result<(Vec<RawItem>, usize)> {
        let listing: Listing = serde_json::from_str(body)
            .map_err(|e| DigestError::source_fetch(&self.label, format!("listing json: {e}")))?;

        let mut out = Vec::with_capacity(listing.data.children.len());
        let mut skipped = 0usize;
        for child in listing.data.children {
            let Some(data) = child.get("data").cloned() else {
                skipped += 1;
                continue;
            };
            let post: Post = match serde_json::from_value(data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::debug!(target: "ingest", source = %self.label, error = %e, "skipping malformed post");
                    skipped += 1;
                    continue;
                }
            };
            if post.title.trim().is_empty() {
                skipped += 1;
                continue;
            }
            // Discussion link is the stable identity; the outbound url may be shared by many posts.
            let url = post
                .permalink
                .as_deref()
                .map(|p| format!("{}{}", self.base_url, p))
                .or(post.url);
            out.push(RawItem {
                kind: SourceKind::Forum,
                source: self.label.clone(),
                external_id: post.id,
                title: post.title,
                summary: post.selftext,
                url,
                published_at: from_unix(post.created_utc),
                engagement: Some(post.score.unwrap_or(0.0)),
            });
        }
        Ok((out, skipped))
    }
}

#[async_trait]
impl SourceAdapter for ForumAdapter {
    async fn fetch(&self, window_hours: u32) -> Result<Fetched> {
        let body = self
            .fetcher
            .get_text(&self.listing_url())
            .await
            .map_err(|e| DigestError::source_fetch(&self.label, e))?;
        let (mut items, skipped) = self.parse_listing(&body)?;
        let cutoff = window_cutoff(window_hours);
        items.retain(|it| within_window(it.published_at, cutoff));
        Ok(Fetched::new(items, skipped))
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Forum
    }
}
