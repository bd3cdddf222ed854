// src/evaluate/mod.rs
//! Schema-validated model evaluation of deduplicated candidates.
//!
//! Per candidate: render the persona prompt, call the model under a deadline
//! (retrying timeouts with exponential backoff), validate the reply against the
//! persona schema (re-prompting with the violations a bounded number of times).
//! The evaluator never touches dedup state.

pub mod llm;
pub mod persona;
pub mod schema;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::config::{EvaluatorSettings, LlmSettings};
use crate::error::{DigestError, Result, SchemaViolation};
use crate::ingest::types::Candidate;
use llm::DynLlm;
use persona::Persona;
use schema::Decision;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("evaluate_calls_total", "Model calls issued.");
        describe_counter!(
            "evaluate_retries_total",
            "Model calls repeated after a timeout or schema violation."
        );
        describe_counter!(
            "evaluate_failures_total",
            "Candidates that ended without a validated evaluation."
        );
        describe_histogram!("evaluate_latency_ms", "Per-call model latency in milliseconds.");
    });
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub candidate_id: String,
    pub score: f64,
    pub rationale: String,
    pub audience_tags: Vec<String>,
    pub schema_version: String,
    /// The model's own include/exclude call; informational only.
    pub decision: Option<Decision>,
}

/// Terminal result of evaluating one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Scored(EvaluationResult),
    /// Low-confidence outcome: schema still violated after the corrective
    /// retry, timeouts exhausted, or the endpoint errored.
    Failed { candidate_id: String, reason: String },
}

impl EvaluationOutcome {
    pub fn candidate_id(&self) -> &str {
        match self {
            EvaluationOutcome::Scored(r) => &r.candidate_id,
            EvaluationOutcome::Failed { candidate_id, .. } => candidate_id,
        }
    }

    /// Failures count as score 0.
    pub fn score(&self) -> f64 {
        match self {
            EvaluationOutcome::Scored(r) => r.score,
            EvaluationOutcome::Failed { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorOptions {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
    pub schema_retries: u32,
    pub max_concurrency: usize,
}

impl EvaluatorOptions {
    pub fn from_settings(eval: &EvaluatorSettings, llm: &LlmSettings) -> Self {
        Self {
            timeout: Duration::from_secs(llm.timeout_secs.max(1)),
            max_attempts: eval.max_attempts.max(1),
            backoff: Duration::from_millis(eval.backoff_ms),
            schema_retries: eval.schema_retries,
            max_concurrency: eval.max_concurrency.max(1),
        }
    }
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        Self::from_settings(&EvaluatorSettings::default(), &LlmSettings::default())
    }
}

fn corrective_prompt(base: &str, violation: &SchemaViolation) -> String {
    format!(
        "{base}\n\nYour previous answer was rejected: {}.\n\
         Reply again with ONLY the JSON object. Use every field listed above, \
         the exact allowed values, and numbers inside the stated ranges. \
         No markdown, no commentary.",
        violation.problems.join("; ")
    )
}

/// `base * 2^(attempt-1)`, saturating instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

#[derive(Clone)]
pub struct Evaluator {
    llm: DynLlm,
    opts: EvaluatorOptions,
    /// Shared by every pipeline of a run so the endpoint sees bounded load.
    permits: Arc<Semaphore>,
}

impl Evaluator {
    pub fn new(llm: DynLlm, opts: EvaluatorOptions, permits: Arc<Semaphore>) -> Self {
        ensure_metrics_described();
        Self { llm, opts, permits }
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.opts
    }

    /// One model call with deadline, retrying only timeouts.
    async fn call_with_retry(&self, prompt: &str) -> Result<String> {
        let max = self.opts.max_attempts.max(1);
        for attempt in 1..=max {
            let permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| DigestError::Cancelled)?;
            counter!("evaluate_calls_total").increment(1);
            let started = Instant::now();
            let res = tokio::time::timeout(self.opts.timeout, self.llm.complete(prompt)).await;
            histogram!("evaluate_latency_ms").record(started.elapsed().as_millis() as f64);
            drop(permit);

            match res {
                Ok(out) => return out,
                Err(_) => {
                    tracing::warn!(
                        target: "evaluate",
                        llm = self.llm.name(),
                        attempt,
                        max,
                        "model call timed out"
                    );
                    if attempt < max {
                        counter!("evaluate_retries_total", "reason" => "timeout").increment(1);
                        tokio::time::sleep(backoff_delay(self.opts.backoff, attempt)).await;
                    }
                }
            }
        }
        Err(DigestError::InferenceTimeout { attempts: max })
    }

    /// Evaluate one candidate for `persona`. `default_audience` fills the
    /// audience tags when the schema has no audience field.
    pub async fn evaluate(
        &self,
        c: &Candidate,
        persona: &Persona,
        default_audience: &str,
    ) -> Result<EvaluationResult> {
        let schema = persona.schema_def();
        let base = persona.render_prompt(c);
        let mut prompt = base.clone();
        let mut corrections = 0u32;

        loop {
            let raw = self.call_with_retry(&prompt).await?;
            match schema.validate(&raw) {
                Ok(v) => {
                    let audience = v
                        .audience
                        .filter(|a| !a.is_empty())
                        .unwrap_or_else(|| default_audience.to_string());
                    let rationale = if v.rationale.is_empty() {
                        persona.rationale_fallback.clone()
                    } else {
                        v.rationale
                    };
                    return Ok(EvaluationResult {
                        candidate_id: c.id().to_string(),
                        score: v.score,
                        rationale,
                        audience_tags: vec![audience],
                        schema_version: schema.version.to_string(),
                        decision: v.decision,
                    });
                }
                Err(violation) if corrections < self.opts.schema_retries => {
                    corrections += 1;
                    counter!("evaluate_retries_total", "reason" => "schema").increment(1);
                    tracing::debug!(
                        target: "evaluate",
                        candidate = %c.key,
                        %violation,
                        "schema violation; re-prompting"
                    );
                    prompt = corrective_prompt(&base, &violation);
                }
                Err(violation) => return Err(DigestError::SchemaValidation(violation)),
            }
        }
    }

    /// `evaluate`, with every per-candidate failure folded into `Failed`.
    /// Only cancellation is returned as an error.
    pub async fn evaluate_outcome(
        &self,
        c: &Candidate,
        persona: &Persona,
        default_audience: &str,
    ) -> Result<EvaluationOutcome> {
        match self.evaluate(c, persona, default_audience).await {
            Ok(r) => Ok(EvaluationOutcome::Scored(r)),
            Err(DigestError::Cancelled) => Err(DigestError::Cancelled),
            Err(e) => {
                counter!("evaluate_failures_total").increment(1);
                tracing::warn!(target: "evaluate", candidate = %c.key, error = %e, "evaluation failed");
                Ok(EvaluationOutcome::Failed {
                    candidate_id: c.id().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::llm::LlmClient;
    use super::persona::{PersonaRegistry, PersonaSpec, DEFAULT_RATIONALE_FALLBACK};
    use super::*;
    use crate::ingest::types::SourceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies from a script, one entry per call; `None` hangs past any deadline.
    struct Scripted {
        replies: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Option<&str>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().map(|r| r.map(String::from)).collect()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for Scripted {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            let next = self.replies.lock().unwrap().pop().flatten();
            match next {
                Some(r) => Ok(r),
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(DigestError::Inference("unreachable".into()))
                }
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    const GOOD: &str = r#"{"relevance_score": 0.9, "topic": "serving", "why_it_matters": "Cheaper inference.", "target_audience": "developer", "decision": "include"}"#;

    fn candidate() -> Candidate {
        Candidate::new(
            "url:a.test/1".into(),
            "vLLM adds speculative decoding".into(),
            "Throughput doubles on A100.".into(),
            None,
            None,
            Some(120.0),
            SourceKind::Forum,
            "reddit/LocalLLaMA".into(),
            0,
        )
    }

    fn evaluator(llm: Arc<Scripted>) -> Evaluator {
        let opts = EvaluatorOptions {
            timeout: Duration::from_millis(50),
            max_attempts: 3,
            backoff: Duration::from_millis(10),
            schema_retries: 1,
            max_concurrency: 2,
        };
        Evaluator::new(llm, opts, Arc::new(Semaphore::new(2)))
    }

    #[tokio::test]
    async fn scores_a_valid_reply() {
        let llm = Scripted::new(vec![Some(GOOD)]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let r = evaluator(llm.clone())
            .evaluate(&candidate(), &persona, "developer")
            .await
            .unwrap();
        assert_eq!(r.candidate_id, "url:a.test/1");
        assert!((r.score - 0.9).abs() < 1e-9);
        assert_eq!(r.audience_tags, vec!["developer".to_string()]);
        assert_eq!(r.schema_version, "genai_news/v1");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn schema_violation_is_retried_once_with_correction() {
        let llm = Scripted::new(vec![Some(r#"{"relevance_score": 7}"#), Some(GOOD)]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let r = evaluator(llm.clone())
            .evaluate(&candidate(), &persona, "developer")
            .await;
        assert!(r.is_ok());
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("previous answer was rejected"));
        assert!(prompts[1].contains("missing field 'topic'"));
    }

    #[tokio::test]
    async fn persistent_violation_becomes_failed_outcome() {
        let llm = Scripted::new(vec![Some("not json"), Some("still not json")]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let out = evaluator(llm.clone())
            .evaluate_outcome(&candidate(), &persona, "developer")
            .await
            .unwrap();
        assert!(matches!(out, EvaluationOutcome::Failed { ref reason, .. } if reason.contains("schema")));
        assert_eq!(out.score(), 0.0);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_retry_with_backoff_then_succeed() {
        let llm = Scripted::new(vec![None, None, Some(GOOD)]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let r = evaluator(llm.clone())
            .evaluate(&candidate(), &persona, "developer")
            .await;
        assert!(r.is_ok());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(Duration::from_millis(u64::MAX), 2), Duration::MAX);
        assert_eq!(backoff_delay(Duration::MAX, 1), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_backoff_does_not_panic() {
        let llm = Scripted::new(vec![None, None, Some(GOOD)]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let opts = EvaluatorOptions {
            timeout: Duration::from_millis(50),
            max_attempts: 3,
            backoff: Duration::from_millis(u64::MAX),
            schema_retries: 1,
            max_concurrency: 1,
        };
        let r = Evaluator::new(llm.clone(), opts, Arc::new(Semaphore::new(1)))
            .evaluate(&candidate(), &persona, "developer")
            .await;
        assert!(r.is_ok());
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_timeouts_report_attempts() {
        let llm = Scripted::new(vec![None, None, None]);
        let persona = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let err = evaluator(llm)
            .evaluate(&candidate(), &persona, "developer")
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::InferenceTimeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn blank_rationale_uses_persona_fallback() {
        let reply = r#"{"relevance_score": 0.8, "topic": "serving", "why_it_matters": "  ",
            "target_audience": "developer", "decision": "include"}"#;
        let mut registry = PersonaRegistry::with_builtins();
        registry
            .apply_specs(&[PersonaSpec {
                name: "GENAI_NEWS".into(),
                rationale_fallback: Some("Worth a look.".into()),
                ..Default::default()
            }])
            .unwrap();
        let persona = registry.get("GENAI_NEWS").unwrap();
        let r = evaluator(Scripted::new(vec![Some(reply)]))
            .evaluate(&candidate(), &persona, "developer")
            .await
            .unwrap();
        assert_eq!(r.rationale, "Worth a look.");

        let builtin = PersonaRegistry::with_builtins().get("GENAI_NEWS").unwrap();
        let r = evaluator(Scripted::new(vec![Some(reply)]))
            .evaluate(&candidate(), &builtin, "developer")
            .await
            .unwrap();
        assert_eq!(r.rationale, DEFAULT_RATIONALE_FALLBACK);
    }

    #[tokio::test]
    async fn product_ideas_fall_back_to_default_audience() {
        let reply = r#"{"idea_type": "devtool", "problem_statement": "Flaky evals.",
            "solution_summary": "Snapshot tests for prompts.", "maturity_level": "idea",
            "reusability_score": 0.7, "decision": "include"}"#;
        let llm = Scripted::new(vec![Some(reply)]);
        let persona = PersonaRegistry::with_builtins().get("PRODUCT_IDEAS").unwrap();
        let r = evaluator(llm)
            .evaluate(&candidate(), &persona, "founder")
            .await
            .unwrap();
        assert_eq!(r.audience_tags, vec!["founder".to_string()]);
        assert_eq!(r.rationale, "Flaky evals. Snapshot tests for prompts.");
    }
}
