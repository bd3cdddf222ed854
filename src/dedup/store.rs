// src/dedup/store.rs
//! Durable record of accepted candidates, per pipeline.
//!
//! Writers hold the state's write lock for the whole mutate-then-persist step,
//! so readers never observe a half-written insertion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use super::embed::cosine_similarity;
use crate::error::{DigestError, Result};

/// Created on first acceptance of a candidate; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub canonical_key: String,
    pub embedding: Vec<f32>,
    pub first_seen: DateTime<Utc>,
    pub pipeline: String,
}

/// What the store knows about a canonical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Unseen,
    /// Accepted but no evaluation outcome was recorded (e.g. cancelled run).
    Pending,
    Evaluated,
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn status(&self, pipeline: &str, key: &str) -> Result<KeyStatus>;

    /// Insert unless the key already exists for the record's pipeline.
    /// Returns whether the record was inserted.
    async fn insert_if_absent(&self, record: DedupRecord) -> Result<bool>;

    /// Most similar record of `pipeline` first seen at or after `since`.
    async fn nearest(
        &self,
        pipeline: &str,
        embedding: &[f32],
        since: DateTime<Utc>,
    ) -> Result<Option<(String, f32)>>;

    async fn mark_evaluated(&self, pipeline: &str, key: &str) -> Result<()>;

    /// Drop records of `pipeline` first seen before `cutoff`. Returns how many.
    async fn prune_older_than(&self, pipeline: &str, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn recent(&self, pipeline: &str, since: DateTime<Utc>) -> Result<Vec<DedupRecord>>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    records: Vec<DedupRecord>,
    /// `pipeline\u{1f}key` pairs with a recorded evaluation outcome.
    #[serde(default)]
    evaluated: HashSet<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

fn slot(pipeline: &str, key: &str) -> String {
    format!("{pipeline}\u{1f}{key}")
}

impl State {
    fn reindex(&mut self) {
        self.index = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (slot(&r.pipeline, &r.canonical_key), i))
            .collect();
    }

    fn status(&self, pipeline: &str, key: &str) -> KeyStatus {
        let s = slot(pipeline, key);
        if !self.index.contains_key(&s) {
            KeyStatus::Unseen
        } else if self.evaluated.contains(&s) {
            KeyStatus::Evaluated
        } else {
            KeyStatus::Pending
        }
    }

    fn insert(&mut self, record: DedupRecord) -> bool {
        let s = slot(&record.pipeline, &record.canonical_key);
        if self.index.contains_key(&s) {
            return false;
        }
        self.index.insert(s, self.records.len());
        self.records.push(record);
        true
    }

    fn nearest(&self, pipeline: &str, embedding: &[f32], since: DateTime<Utc>) -> Option<(String, f32)> {
        let mut best: Option<(String, f32)> = None;
        for r in self
            .records
            .iter()
            .filter(|r| r.pipeline == pipeline && r.first_seen >= since)
        {
            let sim = cosine_similarity(embedding, &r.embedding);
            if best.as_ref().is_none_or(|b| sim > b.1) {
                best = Some((r.canonical_key.clone(), sim));
            }
        }
        best
    }

    fn prune(&mut self, pipeline: &str, cutoff: DateTime<Utc>) -> usize {
        let before = self.records.len();
        let evaluated = &mut self.evaluated;
        self.records.retain(|r| {
            let keep = r.pipeline != pipeline || r.first_seen >= cutoff;
            if !keep {
                evaluated.remove(&slot(&r.pipeline, &r.canonical_key));
            }
            keep
        });
        let removed = before - self.records.len();
        if removed > 0 {
            self.reindex();
        }
        removed
    }

    fn recent(&self, pipeline: &str, since: DateTime<Utc>) -> Vec<DedupRecord> {
        self.records
            .iter()
            .filter(|r| r.pipeline == pipeline && r.first_seen >= since)
            .cloned()
            .collect()
    }
}

/// Process-lifetime store for tests and dry runs.
#[derive(Default)]
pub struct MemoryDedupStore {
    state: RwLock<State>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn status(&self, pipeline: &str, key: &str) -> Result<KeyStatus> {
        Ok(self.state.read().await.status(pipeline, key))
    }

    async fn insert_if_absent(&self, record: DedupRecord) -> Result<bool> {
        Ok(self.state.write().await.insert(record))
    }

    async fn nearest(
        &self,
        pipeline: &str,
        embedding: &[f32],
        since: DateTime<Utc>,
    ) -> Result<Option<(String, f32)>> {
        Ok(self.state.read().await.nearest(pipeline, embedding, since))
    }

    async fn mark_evaluated(&self, pipeline: &str, key: &str) -> Result<()> {
        self.state.write().await.evaluated.insert(slot(pipeline, key));
        Ok(())
    }

    async fn prune_older_than(&self, pipeline: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self.state.write().await.prune(pipeline, cutoff))
    }

    async fn recent(&self, pipeline: &str, since: DateTime<Utc>) -> Result<Vec<DedupRecord>> {
        Ok(self.state.read().await.recent(pipeline, since))
    }
}

/// Whole-file JSON store. Every mutation rewrites the file via temp file +
/// rename; a failed write rolls the in-memory change back.
pub struct JsonFileDedupStore {
    path: PathBuf,
    state: RwLock<State>,
}

impl JsonFileDedupStore {
    /// Open (or create) the store at `path`. An unreadable or corrupt file is
    /// an error: running without history would resend duplicates.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DigestError::store(format!("create {}: {e}", parent.display())))?;
        }
        let mut state = match tokio::fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => State::default(),
            Ok(s) => serde_json::from_str::<State>(&s)
                .map_err(|e| DigestError::store(format!("parse {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(DigestError::store(format!("read {}: {e}", path.display()))),
        };
        state.reindex();
        tracing::debug!(target: "dedup", path = %path.display(), records = state.records.len(), "dedup store opened");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let json = serde_json::to_vec(state).map_err(DigestError::store)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| DigestError::store(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DigestError::store(format!("rename to {}: {e}", self.path.display())))?;
        Ok(())
    }
}

#[async_trait]
impl DedupStore for JsonFileDedupStore {
    async fn status(&self, pipeline: &str, key: &str) -> Result<KeyStatus> {
        Ok(self.state.read().await.status(pipeline, key))
    }

    async fn insert_if_absent(&self, record: DedupRecord) -> Result<bool> {
        let mut guard = self.state.write().await;
        let s = slot(&record.pipeline, &record.canonical_key);
        if !guard.insert(record) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&guard).await {
            guard.records.pop();
            guard.index.remove(&s);
            return Err(e);
        }
        Ok(true)
    }

    async fn nearest(
        &self,
        pipeline: &str,
        embedding: &[f32],
        since: DateTime<Utc>,
    ) -> Result<Option<(String, f32)>> {
        Ok(self.state.read().await.nearest(pipeline, embedding, since))
    }

    async fn mark_evaluated(&self, pipeline: &str, key: &str) -> Result<()> {
        let mut guard = self.state.write().await;
        let s = slot(pipeline, key);
        if !guard.evaluated.insert(s.clone()) {
            return Ok(());
        }
        if let Err(e) = self.persist(&guard).await {
            guard.evaluated.remove(&s);
            return Err(e);
        }
        Ok(())
    }

    async fn prune_older_than(&self, pipeline: &str, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut guard = self.state.write().await;
        let snapshot = guard.clone();
        let removed = guard.prune(pipeline, cutoff);
        if removed > 0 {
            if let Err(e) = self.persist(&guard).await {
                *guard = snapshot;
                guard.reindex();
                return Err(e);
            }
        }
        Ok(removed)
    }

    async fn recent(&self, pipeline: &str, since: DateTime<Utc>) -> Result<Vec<DedupRecord>> {
        Ok(self.state.read().await.recent(pipeline, since))
    }
}
