// src/pipeline/orchestrator.rs
//! Runs every configured pipeline of one invocation and hands finished batches
//! to the delivery sinks. A pipeline failure never stops its siblings.

use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{factory, Pipeline, PipelineRun};
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::delivery::DeliverySink;
use crate::error::DigestError;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs attempted.");
        describe_counter!(
            "pipeline_failures_total",
            "Pipeline runs that failed to build or complete."
        );
        describe_counter!(
            "prefilter_dropped_total",
            "Candidates removed by prefilter rules."
        );
        describe_gauge!(
            "pipeline_last_run_ts",
            "Unix time of the last completed run, per pipeline."
        );
    });
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed(Box<PipelineRun>),
    Failed(DigestError),
    Disabled,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub name: String,
    pub outcome: PipelineOutcome,
}

impl PipelineResult {
    pub fn run(&self) -> Option<&PipelineRun> {
        match &self.outcome {
            PipelineOutcome::Completed(r) => Some(&**r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DigestError> {
        match &self.outcome {
            PipelineOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        match &self.outcome {
            PipelineOutcome::Completed(r) => format!(
                "{}: ok, {} item(s) [fetched {}, new {}, resumed {}, dups {}+{}, evaluated {}, failed {}, below threshold {}, source errors {}]",
                self.name,
                r.batch.len(),
                r.report.fetched,
                r.report.accepted,
                r.report.resumed,
                r.report.exact_dups,
                r.report.semantic_dups,
                r.report.evaluated,
                r.report.eval_failures,
                r.report.below_threshold,
                r.report.source_errors,
            ),
            PipelineOutcome::Failed(e) => format!("{}: FAILED: {e}", self.name),
            PipelineOutcome::Disabled => format!("{}: disabled", self.name),
        }
    }
}

/// Per-pipeline outcomes of one invocation, in config order.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub results: Vec<PipelineResult>,
}

impl RunSummary {
    pub fn get(&self, name: &str) -> Option<&PipelineResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn completed(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.iter().filter(|r| r.run().is_some())
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.iter().filter(|r| r.error().is_some())
    }

    /// At least one pipeline was attempted and none completed.
    pub fn all_failed(&self) -> bool {
        self.failed().count() > 0 && self.completed().count() == 0
    }
}

pub struct Orchestrator {
    ctx: Arc<RunContext>,
    sinks: Vec<Arc<dyn DeliverySink>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<RunContext>) -> Self {
        ensure_metrics_described();
        Self {
            ctx,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Build and run every raw pipeline entry. Construction errors become
    /// that pipeline's `Failed` outcome.
    pub async fn run_entries(
        &self,
        entries: &BTreeMap<String, Value>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let mut slots: Vec<(String, Result<Option<Pipeline>, DigestError>)> = Vec::new();
        for (name, raw) in entries {
            let built = PipelineConfig::from_value(name, raw).and_then(|cfg| {
                if !cfg.enabled {
                    return Ok(None);
                }
                factory::build(&cfg, &self.ctx).map(Some)
            });
            if let Err(e) = &built {
                tracing::error!(target: "pipeline", pipeline = %name, error = %e, "pipeline construction failed");
            }
            slots.push((name.clone(), built));
        }

        let mut pipelines = Vec::new();
        let mut results: Vec<Option<PipelineResult>> = Vec::with_capacity(slots.len());
        for (name, built) in slots {
            match built {
                Ok(Some(p)) => {
                    pipelines.push((results.len(), p));
                    results.push(None);
                }
                Ok(None) => results.push(Some(PipelineResult {
                    name,
                    outcome: PipelineOutcome::Disabled,
                })),
                Err(e) => {
                    counter!("pipeline_failures_total", "pipeline" => name.clone()).increment(1);
                    results.push(Some(PipelineResult {
                        name,
                        outcome: PipelineOutcome::Failed(e),
                    }))
                }
            }
        }

        let (slots_idx, built): (Vec<usize>, Vec<Pipeline>) = pipelines.into_iter().unzip();
        for (idx, result) in slots_idx.into_iter().zip(self.run_pipelines(built, cancel).await) {
            results[idx] = Some(result);
        }

        RunSummary {
            results: results.into_iter().flatten().collect(),
        }
    }

    /// Run already-built pipelines concurrently, then deliver their batches.
    pub async fn run_pipelines(
        &self,
        pipelines: Vec<Pipeline>,
        cancel: &CancellationToken,
    ) -> Vec<PipelineResult> {
        let runs = pipelines.iter().map(|p| async move {
            counter!("pipeline_runs_total", "pipeline" => p.name().to_string()).increment(1);
            tracing::info!(target: "pipeline", pipeline = %p.name(), persona = %p.persona().name, "pipeline started");
            (p.name().to_string(), p.run(cancel).await)
        });

        let mut out = Vec::with_capacity(pipelines.len());
        for (name, res) in join_all(runs).await {
            let outcome = match res {
                Ok(mut run) => {
                    gauge!("pipeline_last_run_ts", "pipeline" => name.clone())
                        .set(chrono::Utc::now().timestamp() as f64);
                    run.report.delivered = self.deliver(&run).await;
                    tracing::info!(
                        target: "pipeline",
                        pipeline = %name,
                        items = run.batch.len(),
                        source_errors = run.report.source_errors,
                        "pipeline completed"
                    );
                    PipelineOutcome::Completed(Box::new(run))
                }
                Err(e) => {
                    counter!("pipeline_failures_total", "pipeline" => name.clone()).increment(1);
                    tracing::error!(target: "pipeline", pipeline = %name, error = %e, "pipeline failed");
                    PipelineOutcome::Failed(e)
                }
            };
            out.push(PipelineResult { name, outcome });
        }
        out
    }

    /// Hand the batch to every sink. Returns how many accepted it; failures
    /// are logged and do not change the pipeline outcome.
    async fn deliver(&self, run: &PipelineRun) -> usize {
        if run.batch.is_empty() {
            return 0;
        }
        let mut ok = 0;
        for sink in &self.sinks {
            match sink.deliver(&run.batch).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(
                    target: "pipeline",
                    pipeline = %run.batch.pipeline,
                    sink = sink.name(),
                    error = ?e,
                    "delivery failed"
                ),
            }
        }
        ok
    }
}
