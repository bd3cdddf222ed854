// src/ingest/types.rs
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Family of external source an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Forum,
    Aggregator,
    Feed,
    LaunchBoard,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Forum => "forum",
            SourceKind::Aggregator => "aggregator",
            SourceKind::Feed => "feed",
            SourceKind::LaunchBoard => "launch_board",
        };
        f.write_str(s)
    }
}

/// Item as fetched, before normalization. Owned by the adapter that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub kind: SourceKind,
    pub source: String, // e.g. "reddit/LocalLLaMA", "hackernews"
    pub external_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub engagement: Option<f64>,
}

/// One adapter's contribution: parsed items plus the count of entries that were
/// malformed and skipped.
#[derive(Debug, Default)]
pub struct Fetched {
    pub items: Vec<RawItem>,
    pub skipped: usize,
}

impl Fetched {
    pub fn new(items: Vec<RawItem>, skipped: usize) -> Self {
        Self { items, skipped }
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch items published within the last `window_hours`.
    ///
    /// A malformed entry is skipped and counted in `Fetched::skipped`; only a
    /// failure of the whole source is returned as `Err`.
    async fn fetch(&self, window_hours: u32) -> Result<Fetched>;
    fn name(&self) -> &str;
    fn kind(&self) -> SourceKind;
}

/// Normalized item flowing through prefilter, dedup and evaluation.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Canonical key: `url:<normalized url>` or `hash:<sha256>`.
    pub key: String,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub engagement: Option<f64>,
    pub kind: SourceKind,
    pub source: String,
    /// Position in source-then-engagement order; used for tie-breaks.
    pub discovery_index: usize,
    embedding: OnceCell<Vec<f32>>,
}

impl Candidate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: String,
        title: String,
        summary: String,
        url: Option<String>,
        published_at: Option<DateTime<Utc>>,
        engagement: Option<f64>,
        kind: SourceKind,
        source: String,
        discovery_index: usize,
    ) -> Self {
        Self {
            key,
            title,
            summary,
            url,
            published_at,
            engagement,
            kind,
            source,
            discovery_index,
            embedding: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.key
    }

    /// Text the semantic stage embeds: title weighted twice plus a summary preview.
    pub fn embedding_text(&self) -> String {
        let preview: String = self.summary.chars().take(200).collect();
        format!("{} {} {}", self.title, self.title, preview)
            .trim()
            .to_string()
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.get().map(Vec::as_slice)
    }

    /// Attach the embedding once; later calls are ignored.
    pub fn set_embedding(&self, v: Vec<f32>) -> &[f32] {
        self.embedding.get_or_init(|| v).as_slice()
    }
}
