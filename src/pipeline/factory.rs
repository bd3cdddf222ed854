// src/pipeline/factory.rs
//! Build a runnable pipeline from one declarative config entry.
//!
//! Persona and sources are resolved eagerly, so configuration errors surface
//! before any network call.

use serde_json::Value;

use super::Pipeline;
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::dedup::Deduplicator;
use crate::error::{DigestError, Result};
use crate::evaluate::Evaluator;

pub fn build(config: &PipelineConfig, ctx: &RunContext) -> Result<Pipeline> {
    let persona = ctx.personas.get(&config.persona).map_err(|e| match e {
        DigestError::Configuration(m) => {
            DigestError::config(format!("pipeline '{}': {m}", config.name))
        }
        other => other,
    })?;

    let mut adapters = Vec::new();
    for spec in config.enabled_sources() {
        let adapter = ctx.adapters.build(spec, &ctx.fetcher).map_err(|e| match e {
            DigestError::Configuration(m) => {
                DigestError::config(format!("pipeline '{}': {m}", config.name))
            }
            other => other,
        })?;
        adapters.push(adapter);
    }
    if adapters.is_empty() {
        return Err(DigestError::config(format!(
            "pipeline '{}': no enabled sources",
            config.name
        )));
    }

    let dedup = Deduplicator::new(
        &config.name,
        ctx.store.clone(),
        ctx.embedder.clone(),
        ctx.dedup.similarity_threshold,
        ctx.dedup.retention_hours,
    );
    let evaluator = Evaluator::new(
        ctx.llm.clone(),
        ctx.evaluator.clone(),
        ctx.eval_permits.clone(),
    );

    tracing::debug!(
        target: "pipeline",
        pipeline = %config.name,
        persona = %persona.name,
        sources = adapters.len(),
        "pipeline built"
    );

    Ok(Pipeline {
        rules: config.prefilter_rules(),
        config: config.clone(),
        persona,
        adapters,
        dedup,
        evaluator,
        source_timeout: ctx.source_timeout,
        prune_on_start: ctx.dedup.prune_on_start,
    })
}

/// Decode a raw `[pipelines.<name>]` entry and build it.
pub fn build_from_value(name: &str, raw: &Value, ctx: &RunContext) -> Result<Pipeline> {
    let config = PipelineConfig::from_value(name, raw)?;
    build(&config, ctx)
}
