// src/config/mod.rs
//! Run configuration document: shared services plus one raw entry per pipeline.
//!
//! Pipeline entries stay as raw values until the pipeline factory decodes
//! them, so one malformed pipeline cannot fail the whole load.

pub mod llm;
pub mod pipeline;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::evaluate::persona::PersonaSpec;
pub use llm::LlmSettings;
pub use pipeline::{PipelineConfig, SourceSpec};

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.88;
pub const DEFAULT_RETENTION_HOURS: u64 = 48;
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

fn default_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}
fn default_retention_hours() -> u64 {
    DEFAULT_RETENTION_HOURS
}
fn default_store_path() -> String {
    "data/dedup.json".to_string()
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    2
}
fn default_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_schema_retries() -> u32 {
    1
}
fn default_source_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    "intel-digest/0.1".to_string()
}
fn default_dim() -> usize {
    DEFAULT_EMBEDDING_DIM
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupSettings {
    /// Cosine similarity at or above which a candidate is a near-duplicate.
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Empty path means an in-memory store (nothing survives the process).
    #[serde(default = "default_store_path")]
    pub store_path: String,
    #[serde(default = "default_true")]
    pub prune_on_start: bool,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
            retention_hours: default_retention_hours(),
            store_path: default_store_path(),
            prune_on_start: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorSettings {
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,
    /// Attempts per candidate when the model call times out.
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    /// Base backoff, doubled after each timed-out attempt.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Corrective re-prompts after a schema violation.
    #[serde(default = "default_schema_retries")]
    pub schema_retries: u32,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            max_attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            schema_retries: default_schema_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_source_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    #[default]
    Hashed,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default)]
    pub kind: EmbeddingKind,
    #[serde(default = "default_dim")]
    pub dim: usize,
    /// Remote only; defaults to the LLM endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::Hashed,
            dim: default_dim(),
            base_url: None,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DigestConfig {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub dedup: DedupSettings,
    #[serde(default)]
    pub evaluator: EvaluatorSettings,
    #[serde(default)]
    pub sources: SourceSettings,
    #[serde(default)]
    pub personas: Vec<PersonaSpec>,
    /// Raw pipeline entries keyed by pipeline name.
    #[serde(default)]
    pub pipelines: BTreeMap<String, Value>,
}

impl DigestConfig {
    /// Clamp out-of-range values back to defaults and resolve secrets.
    pub fn sanitize(&mut self) -> Result<()> {
        self.llm.sanitize()?;

        let t = self.dedup.similarity_threshold;
        if !(t > 0.0 && t <= 1.0) {
            self.dedup.similarity_threshold = default_threshold();
        }
        if self.dedup.retention_hours == 0 {
            self.dedup.retention_hours = default_retention_hours();
        }
        if self.evaluator.max_concurrency == 0 {
            self.evaluator.max_concurrency = default_concurrency();
        }
        if self.evaluator.max_attempts == 0 {
            self.evaluator.max_attempts = 1;
        }
        if self.sources.timeout_secs == 0 {
            self.sources.timeout_secs = default_source_timeout();
        }
        if self.embedding.dim == 0 {
            self.embedding.dim = default_dim();
        }
        Ok(())
    }
}

/// Load the document from an explicit path. Supports TOML or JSON formats.
pub fn load_from(path: &Path) -> Result<DigestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_document(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?;
    cfg.sanitize()?;
    Ok(cfg)
}

/// Load the document using env var + fallbacks:
/// 1) $DIGEST_CONFIG_PATH
/// 2) config/digest.toml
/// 3) config/digest.json
pub fn load_default() -> Result<DigestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in ["config/digest.toml", "config/digest.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_from(&p);
        }
    }
    Err(anyhow!(
        "no config found (set {ENV_CONFIG_PATH} or create config/digest.toml)"
    ))
}

fn parse_document(s: &str, hint_ext: &str) -> Result<DigestConfig> {
    let looks_json = s.trim_start().starts_with('{');
    if hint_ext == "json" || (hint_ext != "toml" && looks_json) {
        return serde_json::from_str(s).context("invalid JSON config");
    }
    toml::from_str(s).context("invalid TOML config")
}
