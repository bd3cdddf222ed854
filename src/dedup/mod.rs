// src/dedup/mod.rs
//! Two-stage duplicate suppression for one pipeline.
//!
//! 1. Exact: canonical key already recorded for this pipeline.
//! 2. Semantic: cosine similarity against embeddings recorded within the
//!    retention window.
//!
//! A candidate clearing both stages is recorded before the next one is looked
//! at, so mutual duplicates inside one run resolve in favor of the first.

pub mod embed;
pub mod store;

use chrono::{DateTime, TimeDelta, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{DigestError, Result};
use crate::ingest::types::Candidate;
use embed::Embedder;
use store::{DedupRecord, DedupStore, KeyStatus};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("dedup_exact_total", "Candidates dropped by canonical key.");
        describe_counter!("dedup_semantic_total", "Candidates dropped as near-duplicates.");
        describe_counter!("dedup_accepted_total", "Candidates recorded as new.");
        describe_counter!("dedup_pruned_total", "Expired dedup records removed.");
    });
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted,
    /// Recorded by an earlier run that never produced an evaluation outcome.
    Resumed,
    ExactDuplicate,
    NearDuplicate { of: String, similarity: f32 },
    /// Embedding failed; nothing recorded, the candidate waits for a later run.
    Deferred(String),
}

#[derive(Debug, Default)]
pub struct DedupReport {
    /// Accepted or resumed candidates, in processing order.
    pub survivors: Vec<Candidate>,
    pub accepted: usize,
    pub resumed: usize,
    pub exact: usize,
    pub semantic: usize,
    pub deferred: usize,
}

fn retention_window(hours: u64) -> TimeDelta {
    i64::try_from(hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::MAX)
}

pub struct Deduplicator {
    pipeline: String,
    store: Arc<dyn DedupStore>,
    embedder: Arc<dyn Embedder>,
    threshold: f32,
    retention: TimeDelta,
    /// Serializes stage-2 acceptance and pruning for this pipeline.
    write_lock: Mutex<()>,
}

impl Deduplicator {
    pub fn new(
        pipeline: &str,
        store: Arc<dyn DedupStore>,
        embedder: Arc<dyn Embedder>,
        threshold: f32,
        retention_hours: u64,
    ) -> Self {
        ensure_metrics_described();
        Self {
            pipeline: pipeline.to_string(),
            store,
            embedder,
            threshold,
            retention: retention_window(retention_hours),
            write_lock: Mutex::new(()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Windows reaching past the representable range start at the earliest instant.
    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Run both stages for one candidate, recording it when accepted.
    pub async fn check_and_accept(&self, c: &Candidate) -> Result<Verdict> {
        // Stage 1 fast path, outside the lock.
        match self.store.status(&self.pipeline, &c.key).await? {
            KeyStatus::Evaluated => return Ok(Verdict::ExactDuplicate),
            KeyStatus::Pending => return Ok(Verdict::Resumed),
            KeyStatus::Unseen => {}
        }

        let embedding = match c.embedding() {
            Some(e) => e.to_vec(),
            None => match self.embedder.embed(&c.embedding_text()).await {
                Ok(v) => c.set_embedding(v).to_vec(),
                Err(e) => return Ok(Verdict::Deferred(e.to_string())),
            },
        };

        let _guard = self.write_lock.lock().await;

        // Re-check: another writer may have recorded the key meanwhile.
        if self.store.status(&self.pipeline, &c.key).await? != KeyStatus::Unseen {
            return Ok(Verdict::ExactDuplicate);
        }

        let now = Utc::now();
        if let Some((of, similarity)) = self
            .store
            .nearest(&self.pipeline, &embedding, self.window_start(now))
            .await?
        {
            if similarity >= self.threshold {
                return Ok(Verdict::NearDuplicate { of, similarity });
            }
        }

        let inserted = self
            .store
            .insert_if_absent(DedupRecord {
                canonical_key: c.key.clone(),
                embedding,
                first_seen: now,
                pipeline: self.pipeline.clone(),
            })
            .await?;
        Ok(if inserted {
            Verdict::Accepted
        } else {
            Verdict::ExactDuplicate
        })
    }

    /// Process candidates strictly left to right. A store failure aborts the
    /// pipeline run; cancellation stops before the next candidate.
    pub async fn run(&self, candidates: Vec<Candidate>, cancel: &CancellationToken) -> Result<DedupReport> {
        let mut report = DedupReport::default();
        for c in candidates {
            if cancel.is_cancelled() {
                return Err(DigestError::Cancelled);
            }
            match self.check_and_accept(&c).await? {
                Verdict::Accepted => {
                    report.accepted += 1;
                    report.survivors.push(c);
                }
                Verdict::Resumed => {
                    tracing::debug!(target: "dedup", pipeline = %self.pipeline, key = %c.key, "resuming unevaluated candidate");
                    report.resumed += 1;
                    report.survivors.push(c);
                }
                Verdict::ExactDuplicate => report.exact += 1,
                Verdict::NearDuplicate { of, similarity } => {
                    tracing::debug!(
                        target: "dedup",
                        pipeline = %self.pipeline,
                        key = %c.key,
                        %of,
                        similarity,
                        "near-duplicate"
                    );
                    report.semantic += 1;
                }
                Verdict::Deferred(reason) => {
                    tracing::warn!(target: "dedup", pipeline = %self.pipeline, key = %c.key, %reason, "embedding failed; candidate deferred");
                    report.deferred += 1;
                }
            }
        }

        counter!("dedup_exact_total").increment(report.exact as u64);
        counter!("dedup_semantic_total").increment(report.semantic as u64);
        counter!("dedup_accepted_total").increment(report.accepted as u64);
        Ok(report)
    }

    /// Record that `key` has an evaluation outcome, so later runs treat it as seen.
    pub async fn mark_evaluated(&self, key: &str) -> Result<()> {
        self.store.mark_evaluated(&self.pipeline, key).await
    }

    /// Remove records older than the retention window. Holds the pipeline's
    /// write lock, so it never interleaves with acceptance.
    pub async fn prune(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let cutoff = self.window_start(Utc::now());
        let removed = self.store.prune_older_than(&self.pipeline, cutoff).await?;
        counter!("dedup_pruned_total").increment(removed as u64);
        if removed > 0 {
            tracing::info!(target: "dedup", pipeline = %self.pipeline, removed, "pruned expired dedup records");
        }
        Ok(removed)
    }
}
