// src/pipeline/mod.rs
//! One configured pipeline: sources → prefilter → dedup → evaluation → batch.

pub mod factory;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::dedup::Deduplicator;
use crate::error::{DigestError, Result};
use crate::evaluate::persona::Persona;
use crate::evaluate::{EvaluationOutcome, EvaluationResult, Evaluator};
use crate::ingest::{self, types::Candidate, types::SourceAdapter};
use crate::prefilter::{self, PrefilterRules};

const EXCERPT_CHARS: usize = 400;

/// Per-run counters for one pipeline.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub pruned: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub source_errors: usize,
    pub cross_source_dups: usize,
    pub after_prefilter: usize,
    pub exact_dups: usize,
    pub semantic_dups: usize,
    pub deferred: usize,
    pub accepted: usize,
    pub resumed: usize,
    pub evaluated: usize,
    pub eval_failures: usize,
    pub below_threshold: usize,
    pub delivered: usize,
}

#[derive(Debug, Clone)]
pub struct DigestItem {
    pub candidate: Candidate,
    pub evaluation: EvaluationResult,
}

/// Ranked, threshold-passing items of one pipeline run.
#[derive(Debug, Clone)]
pub struct DigestBatch {
    pub pipeline: String,
    pub persona: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<DigestItem>,
}

/// Delivery-facing view of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestEntry {
    pub title: String,
    pub summary: String,
    pub rationale: String,
    pub audience: String,
    pub source_url: Option<String>,
    pub score: f64,
}

impl DigestBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn entries(&self) -> Vec<DigestEntry> {
        self.items
            .iter()
            .map(|it| DigestEntry {
                title: it.candidate.title.clone(),
                summary: it.candidate.summary.chars().take(EXCERPT_CHARS).collect(),
                rationale: it.evaluation.rationale.clone(),
                audience: it.evaluation.audience_tags.join(", "),
                source_url: it.candidate.url.clone(),
                score: it.evaluation.score,
            })
            .collect()
    }
}

/// Everything a completed run produced. `outcomes` holds every evaluation,
/// including below-threshold and failed ones.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub batch: DigestBatch,
    pub outcomes: Vec<EvaluationOutcome>,
    pub report: PipelineReport,
}

/// Sort by score descending, ties by discovery order, keep `top_k`.
pub fn rank(mut items: Vec<DigestItem>, top_k: usize) -> Vec<DigestItem> {
    items.sort_by(|a, b| {
        b.evaluation
            .score
            .partial_cmp(&a.evaluation.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.candidate.discovery_index.cmp(&b.candidate.discovery_index))
    });
    items.truncate(top_k);
    items
}

pub struct Pipeline {
    config: PipelineConfig,
    persona: Arc<Persona>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    rules: PrefilterRules,
    dedup: Deduplicator,
    evaluator: Evaluator,
    source_timeout: Duration,
    prune_on_start: bool,
}

impl Pipeline {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    pub fn deduplicator(&self) -> &Deduplicator {
        &self.dedup
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<PipelineRun> {
        let name = self.name();
        let mut report = PipelineReport::default();

        if self.prune_on_start {
            report.pruned = self.dedup.prune().await?;
        }

        let ingested = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DigestError::Cancelled),
            r = ingest::fetch_all(&self.adapters, self.config.fetch_hours, self.source_timeout) => r,
        };
        report.fetched = ingested.fetched;
        report.skipped = ingested.skipped;
        report.source_errors = ingested.source_errors.len();
        report.cross_source_dups = ingested.cross_source_dups;

        let total = ingested.candidates.len();
        let filtered = prefilter::filter(&ingested.candidates, &self.rules);
        report.after_prefilter = filtered.len();
        metrics::counter!("prefilter_dropped_total").increment((total - filtered.len()) as u64);

        let deduped = self.dedup.run(filtered, cancel).await?;
        report.exact_dups = deduped.exact;
        report.semantic_dups = deduped.semantic;
        report.deferred = deduped.deferred;
        report.accepted = deduped.accepted;
        report.resumed = deduped.resumed;

        tracing::info!(
            target: "pipeline",
            pipeline = %name,
            fetched = report.fetched,
            after_prefilter = report.after_prefilter,
            to_evaluate = deduped.survivors.len(),
            "evaluating candidates"
        );

        let persona = self.persona.as_ref();
        let audience = self.config.default_audience.as_str();
        let mut pending = stream::iter(deduped.survivors.iter().map(|c| async move {
            (c, self.evaluator.evaluate_outcome(c, persona, audience).await)
        }))
        .buffered(self.evaluator.options().max_concurrency);

        let mut outcomes = Vec::with_capacity(deduped.survivors.len());
        let mut passing = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DigestError::Cancelled),
                n = pending.next() => n,
            };
            let Some((candidate, outcome)) = next else {
                break;
            };
            let outcome = outcome?;
            self.dedup.mark_evaluated(&candidate.key).await?;

            match &outcome {
                EvaluationOutcome::Scored(r) => {
                    report.evaluated += 1;
                    if r.score >= persona.min_score {
                        passing.push(DigestItem {
                            candidate: candidate.clone(),
                            evaluation: r.clone(),
                        });
                    } else {
                        report.below_threshold += 1;
                        tracing::debug!(
                            target: "pipeline",
                            pipeline = %name,
                            candidate = %candidate.key,
                            score = r.score,
                            min_score = persona.min_score,
                            "below threshold"
                        );
                    }
                }
                EvaluationOutcome::Failed { .. } => report.eval_failures += 1,
            }
            outcomes.push(outcome);
        }

        let items = rank(passing, self.config.top_k);
        Ok(PipelineRun {
            batch: DigestBatch {
                pipeline: name.to_string(),
                persona: persona.name.clone(),
                created_at: Utc::now(),
                items,
            },
            outcomes,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    fn item(i: usize, score: f64) -> DigestItem {
        let c = Candidate::new(
            format!("hash:{i}"),
            format!("t{i}"),
            "s".repeat(500),
            None,
            None,
            None,
            SourceKind::Feed,
            "f".into(),
            i,
        );
        DigestItem {
            evaluation: EvaluationResult {
                candidate_id: c.key.clone(),
                score,
                rationale: "r".into(),
                audience_tags: vec!["developer".into()],
                schema_version: "genai_news/v1".into(),
                decision: None,
            },
            candidate: c,
        }
    }

    #[test]
    fn rank_orders_by_score_then_discovery() {
        let items = vec![item(0, 0.7), item(1, 0.9), item(2, 0.7), item(3, 0.8)];
        let ranked = rank(items, 3);
        assert_eq!(
            ranked.iter().map(|i| i.candidate.discovery_index).collect::<Vec<_>>(),
            vec![1, 3, 0]
        );
    }

    #[test]
    fn entries_carry_an_excerpt() {
        let batch = DigestBatch {
            pipeline: "p".into(),
            persona: "GENAI_NEWS".into(),
            created_at: Utc::now(),
            items: vec![item(0, 0.9)],
        };
        let e = &batch.entries()[0];
        assert_eq!(e.summary.chars().count(), 400);
        assert_eq!(e.audience, "developer");
    }
}
