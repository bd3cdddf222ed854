// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use intel_digest::config::DigestConfig;
use intel_digest::dedup::embed::HashedEmbedder;
use intel_digest::dedup::store::{DedupRecord, DedupStore, KeyStatus};
use intel_digest::delivery::DeliverySink;
use intel_digest::evaluate::llm::LlmClient;
use intel_digest::evaluate::EvaluatorOptions;
use intel_digest::ingest::providers::Fetcher;
use intel_digest::pipeline::DigestBatch;
use intel_digest::{DigestError, Result, RunContext};

// ---------- fixtures ----------

/// RSS 2.0 body; items are (title, link, description) and carry no pubDate,
/// so they always fall inside the fetch window.
pub fn rss(items: &[(&str, &str, &str)]) -> String {
    let mut out = String::from(r#"<?xml version="1.0"?><rss version="2.0"><channel><title>fixture</title>"#);
    for (title, link, desc) in items {
        out.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link><description>{desc}</description></item>"
        ));
    }
    out.push_str("</channel></rss>");
    out
}

/// Forum listing body; posts are (title, permalink, score), all created now.
pub fn forum_listing(posts: &[(&str, &str, f64)]) -> String {
    let now = Utc::now().timestamp();
    let children: Vec<Value> = posts
        .iter()
        .enumerate()
        .map(|(i, (title, permalink, score))| {
            serde_json::json!({
                "kind": "t3",
                "data": {
                    "id": format!("p{i}"),
                    "title": title,
                    "selftext": "",
                    "permalink": permalink,
                    "created_utc": now,
                    "score": score,
                }
            })
        })
        .collect();
    serde_json::json!({ "data": { "children": children } }).to_string()
}

/// Twenty titles sharing no words with each other.
pub const DISTINCT_TITLES: [&str; 20] = [
    "alpha apple", "bravo banana", "charlie cherry", "delta date", "echo elderberry",
    "foxtrot fig", "golf grape", "hotel huckleberry", "india imbe", "juliet jackfruit",
    "kilo kiwi", "lima lemon", "mike mango", "november nectarine", "oscar olive",
    "papa papaya", "quebec quince", "romeo raspberry", "sierra strawberry", "tango tangerine",
];

/// `[pipelines.*]` entries of a TOML document, kept raw.
pub fn pipeline_entries(doc: &str) -> BTreeMap<String, Value> {
    toml::from_str::<DigestConfig>(doc)
        .expect("valid TOML")
        .pipelines
}

// ---------- context ----------

pub fn fast_eval_options() -> EvaluatorOptions {
    EvaluatorOptions {
        timeout: Duration::from_millis(200),
        max_attempts: 3,
        backoff: Duration::from_millis(5),
        schema_retries: 1,
        max_concurrency: 2,
    }
}

pub fn context(
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn DedupStore>,
    fixtures: Vec<(String, String)>,
) -> RunContext {
    let mut dedup = intel_digest::config::DedupSettings::default();
    dedup.similarity_threshold = 0.88;
    dedup.store_path = String::new();
    RunContext::new(llm, store, Arc::new(HashedEmbedder::new(384)))
        .with_fetcher(Fetcher::fixtures(fixtures))
        .with_evaluator(fast_eval_options())
        .with_dedup(dedup)
}

// ---------- LLM doubles ----------

fn title_of(prompt: &str) -> String {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix("Title: "))
        .unwrap_or_default()
        .trim()
        .to_string()
}

pub fn genai_reply(score: f64, why: &str) -> String {
    serde_json::json!({
        "relevance_score": score,
        "topic": "test",
        "why_it_matters": why,
        "target_audience": "developer",
        "decision": if score >= 0.6 { "include" } else { "exclude" },
    })
    .to_string()
}

/// Scores each candidate by its title; unknown titles get `default`.
pub struct ScoreByTitle {
    scores: HashMap<String, f64>,
    default: f64,
    pub calls: AtomicUsize,
    pub titles: Mutex<Vec<String>>,
}

impl ScoreByTitle {
    pub fn new(default: f64) -> Self {
        Self {
            scores: HashMap::new(),
            default,
            calls: AtomicUsize::new(0),
            titles: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, title: &str, score: f64) -> Self {
        self.scores.insert(title.to_string(), score);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScoreByTitle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let title = title_of(prompt);
        self.titles.lock().unwrap().push(title.clone());
        let score = self.scores.get(&title).copied().unwrap_or(self.default);
        Ok(genai_reply(score, &format!("about {title}")))
    }

    fn name(&self) -> &'static str {
        "score-by-title"
    }
}

/// First reply for every title violates the schema; the re-prompt succeeds.
#[derive(Default)]
pub struct SchemaOnSecondTry {
    pub calls: AtomicUsize,
    pub corrective_prompts: AtomicUsize,
}

#[async_trait]
impl LlmClient for SchemaOnSecondTry {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("previous answer was rejected") {
            self.corrective_prompts.fetch_add(1, Ordering::SeqCst);
            Ok(format!("```json\n{}\n```", genai_reply(0.8, "fixed")))
        } else {
            Ok(r#"{"relevance_score": "very high", "topic": "x"}"#.to_string())
        }
    }

    fn name(&self) -> &'static str {
        "schema-on-second-try"
    }
}

/// Times out `hangs` times, then answers.
pub struct SlowThenFast {
    hangs: usize,
    pub calls: AtomicUsize,
}

impl SlowThenFast {
    pub fn new(hangs: usize) -> Self {
        Self {
            hangs,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmClient for SlowThenFast {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(genai_reply(0.9, "eventually"))
    }

    fn name(&self) -> &'static str {
        "slow-then-fast"
    }
}

/// Cancels the run on its first call and never answers.
pub struct CancelOnCall {
    pub token: CancellationToken,
    pub calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for CancelOnCall {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
        std::future::pending::<()>().await;
        Err(DigestError::Inference("unreachable".into()))
    }

    fn name(&self) -> &'static str {
        "cancel-on-call"
    }
}

// ---------- delivery doubles ----------

#[derive(Default)]
pub struct RecordingSink {
    pub batches: Mutex<Vec<DigestBatch>>,
}

#[async_trait]
impl DeliverySink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, batch: &DigestBatch) -> anyhow::Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

pub struct FailingSink;

#[async_trait]
impl DeliverySink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn deliver(&self, _batch: &DigestBatch) -> anyhow::Result<()> {
        anyhow::bail!("smtp unreachable")
    }
}

// ---------- store doubles ----------

/// Every operation fails, as if the backing storage were gone.
pub struct UnavailableStore;

#[async_trait]
impl DedupStore for UnavailableStore {
    async fn status(&self, _pipeline: &str, _key: &str) -> Result<KeyStatus> {
        Err(DigestError::DedupStore("connection refused".into()))
    }

    async fn insert_if_absent(&self, _record: DedupRecord) -> Result<bool> {
        Err(DigestError::DedupStore("connection refused".into()))
    }

    async fn nearest(
        &self,
        _pipeline: &str,
        _embedding: &[f32],
        _since: DateTime<Utc>,
    ) -> Result<Option<(String, f32)>> {
        Err(DigestError::DedupStore("connection refused".into()))
    }

    async fn mark_evaluated(&self, _pipeline: &str, _key: &str) -> Result<()> {
        Err(DigestError::DedupStore("connection refused".into()))
    }

    async fn prune_older_than(&self, _pipeline: &str, _cutoff: DateTime<Utc>) -> Result<usize> {
        Err(DigestError::DedupStore("connection refused".into()))
    }

    async fn recent(&self, _pipeline: &str, _since: DateTime<Utc>) -> Result<Vec<DedupRecord>> {
        Err(DigestError::DedupStore("connection refused".into()))
    }
}
