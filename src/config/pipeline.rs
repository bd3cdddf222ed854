// src/config/pipeline.rs
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{DigestError, Result};
use crate::prefilter::PrefilterRules;

fn default_true() -> bool {
    true
}
fn default_fetch_hours() -> u32 {
    24
}
fn default_top_k() -> usize {
    10
}
fn default_audience() -> String {
    "developer".to_string()
}

/// One `sources = [...]` entry: a type tag plus type-specific parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SourceSpec {
    pub fn new(type_tag: &str, params: Value) -> Self {
        Self {
            type_tag: type_tag.to_string(),
            enabled: true,
            params: match params {
                Value::Object(m) => m,
                _ => Map::new(),
            },
        }
    }

    /// Decode the parameters into the adapter's own settings type.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.params.clone())).map_err(|e| {
            DigestError::config(format!("source type '{}': {e}", self.type_tag))
        })
    }
}

/// Declarative description of one pipeline, immutable for the run.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub persona: String,
    #[serde(default = "default_fetch_hours")]
    pub fetch_hours: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub min_engagement: Option<f64>,
    #[serde(default)]
    pub min_length: usize,
    #[serde(default = "default_audience")]
    pub default_audience: String,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
}

impl PipelineConfig {
    /// Decode one raw `[pipelines.<name>]` entry. A malformed entry is a
    /// configuration error for this pipeline only.
    pub fn from_value(name: &str, raw: &Value) -> Result<Self> {
        let mut cfg: PipelineConfig = serde_json::from_value(raw.clone())
            .map_err(|e| DigestError::config(format!("pipeline '{name}': {e}")))?;
        cfg.name = name.to_string();
        if cfg.persona.trim().is_empty() {
            return Err(DigestError::config(format!(
                "pipeline '{name}': persona must not be empty"
            )));
        }
        if cfg.top_k == 0 {
            return Err(DigestError::config(format!(
                "pipeline '{name}': top_k must be at least 1"
            )));
        }
        if cfg.fetch_hours == 0 {
            cfg.fetch_hours = default_fetch_hours();
        }
        Ok(cfg)
    }

    pub fn prefilter_rules(&self) -> PrefilterRules {
        PrefilterRules::new(self.keywords.clone(), self.min_engagement, self.min_length)
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceSpec> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
