// src/delivery.rs
//! Delivery boundary. Sinks receive a finished batch; rendering and transport
//! are entirely theirs.

use async_trait::async_trait;

use crate::pipeline::DigestBatch;

#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, batch: &DigestBatch) -> anyhow::Result<()>;
}

/// Writes each batch to the log. Default sink of the binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDelivery;

#[async_trait]
impl DeliverySink for LogDelivery {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, batch: &DigestBatch) -> anyhow::Result<()> {
        tracing::info!(
            target: "delivery",
            pipeline = %batch.pipeline,
            persona = %batch.persona,
            items = batch.len(),
            "digest ready"
        );
        for (rank, e) in batch.entries().iter().enumerate() {
            tracing::info!(
                target: "delivery",
                pipeline = %batch.pipeline,
                rank = rank + 1,
                score = e.score,
                title = %e.title,
                audience = %e.audience,
                url = e.source_url.as_deref().unwrap_or("-"),
                rationale = %e.rationale,
            );
        }
        Ok(())
    }
}
