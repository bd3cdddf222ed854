// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod context;
pub mod dedup;
pub mod delivery;
pub mod error;
pub mod evaluate;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod prefilter;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::context::RunContext;
pub use crate::delivery::{DeliverySink, LogDelivery};
pub use crate::error::{DigestError, Result};
pub use crate::pipeline::orchestrator::{Orchestrator, PipelineOutcome, RunSummary};
pub use crate::pipeline::{DigestBatch, DigestEntry, Pipeline, PipelineReport};
