// src/ingest/providers/aggregator.rs
//! `aggregator` adapter: Hacker News style id list + per-item JSON.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::{from_unix, within_window, Fetcher};
use crate::error::{DigestError, Result};
use crate::ingest::types::{Fetched, RawItem, SourceAdapter, SourceKind};
use crate::ingest::window_cutoff;

pub const DEFAULT_AGGREGATOR_BASE: &str = "https://hacker-news.firebaseio.com/v0";
const ITEM_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize)]
struct Story {
    id: u64,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    text: Option<String>,
    url: Option<String>,
    time: Option<f64>,
    score: Option<f64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

enum ItemOutcome {
    Story(RawItem),
    NotAStory,
    Malformed,
}

pub struct AggregatorAdapter {
    label: String,
    base_url: String,
    max_items: usize,
    fetcher: Fetcher,
}

impl AggregatorAdapter {
    pub fn new(base_url: Option<&str>, max_items: usize, fetcher: Fetcher) -> Self {
        Self {
            label: "hackernews".to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_AGGREGATOR_BASE)
                .trim_end_matches('/')
                .to_string(),
            max_items: max_items.max(1),
            fetcher,
        }
    }

    pub fn ids_url(&self) -> String {
        format!("{}/newstories.json", self.base_url)
    }

    pub fn item_url(&self, id: u64) -> String {
        format!("{}/item/{id}.json", self.base_url)
    }

    async fn fetch_item(&self, id: u64) -> ItemOutcome {
        let body = match self.fetcher.get_text(&self.item_url(id)).await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!(target: "ingest", source = %self.label, id, error = %e, "item fetch failed");
                return ItemOutcome::Malformed;
            }
        };
        parse_story(&self.label, &body)
    }
}

fn parse_story(label: &str, body: &str) -> ItemOutcome {
    // `null` bodies come back for ids that were never published.
    let story: Story = match serde_json::from_str::<Option<Story>>(body) {
        Ok(Some(s)) => s,
        _ => return ItemOutcome::Malformed,
    };
    if story.dead || story.deleted || story.kind.as_deref() != Some("story") {
        return ItemOutcome::NotAStory;
    }
    let title = story.title.unwrap_or_default();
    if title.trim().is_empty() {
        return ItemOutcome::Malformed;
    }
    let url = story
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={}", story.id));
    ItemOutcome::Story(RawItem {
        kind: SourceKind::Aggregator,
        source: label.to_string(),
        external_id: Some(story.id.to_string()),
        title,
        summary: story.text.unwrap_or_default(),
        url: Some(url),
        published_at: story.time.and_then(from_unix),
        engagement: Some(story.score.unwrap_or(0.0)),
    })
}

#[async_trait]
impl SourceAdapter for AggregatorAdapter {
    async fn fetch(&self, window_hours: u32) -> Result<Fetched> {
        let body = self
            .fetcher
            .get_text(&self.ids_url())
            .await
            .map_err(|e| DigestError::source_fetch(&self.label, e))?;
        let ids: Vec<u64> = serde_json::from_str(&body)
            .map_err(|e| DigestError::source_fetch(&self.label, format!("id list json: {e}")))?;

        let cutoff = window_cutoff(window_hours);
        let outcomes: Vec<ItemOutcome> = stream::iter(ids.into_iter().take(self.max_items))
            .map(|id| self.fetch_item(id))
            .buffered(ITEM_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut items = Vec::new();
        let mut skipped = 0usize;
        for o in outcomes {
            match o {
                ItemOutcome::Story(it) if within_window(it.published_at, cutoff) => items.push(it),
                ItemOutcome::Story(_) | ItemOutcome::NotAStory => {}
                ItemOutcome::Malformed => skipped += 1,
            }
        }
        Ok(Fetched::new(items, skipped))
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Aggregator
    }
}
