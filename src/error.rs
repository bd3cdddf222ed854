// src/error.rs
//! Typed errors for the curation pipeline.
//!
//! Library code returns `DigestError`; the binary and config-file helpers
//! wrap it in `anyhow` with context.

use std::fmt;
use thiserror::Error;

pub type Result<T, E = DigestError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DigestError {
    /// Network or parse failure of a whole source. Recovered by the pipeline:
    /// that source contributes zero items.
    #[error("source '{source_name}' failed: {reason}")]
    SourceFetch { source_name: String, reason: String },

    /// Unknown persona or source type, or a missing/invalid field. Fails the
    /// construction of one pipeline only.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model response did not conform to the persona schema.
    #[error("schema validation failed: {0}")]
    SchemaValidation(SchemaViolation),

    /// Model call exceeded its deadline on every attempt.
    #[error("inference timed out after {attempts} attempt(s)")]
    InferenceTimeout { attempts: u32 },

    /// Model endpoint returned an error (non-2xx, bad body).
    #[error("inference error: {0}")]
    Inference(String),

    /// Embedding could not be computed for one candidate.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Dedup storage unavailable. Fatal for the affected pipeline run.
    #[error("dedup store error: {0}")]
    DedupStore(String),

    #[error("run cancelled")]
    Cancelled,
}

impl DigestError {
    pub fn source_fetch(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SourceFetch {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn store(err: impl fmt::Display) -> Self {
        Self::DedupStore(err.to_string())
    }
}

/// Every problem found while validating one model response.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub schema: String,
    pub problems: Vec<String>,
}

impl SchemaViolation {
    pub fn single(schema: &str, problem: impl Into<String>) -> Self {
        Self {
            schema: schema.to_string(),
            problems: vec![problem.into()],
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.schema, self.problems.join("; "))
    }
}
