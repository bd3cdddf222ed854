// src/context.rs
//! Process-scoped services shared by every pipeline of a run. Built once at
//! start and passed explicitly to the factory and orchestrator.

use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{DedupSettings, DigestConfig, EmbeddingKind};
use crate::dedup::embed::{Embedder, HashedEmbedder, RemoteEmbedder};
use crate::dedup::store::{DedupStore, JsonFileDedupStore, MemoryDedupStore};
use crate::evaluate::llm::{ChatCompletionsClient, DynLlm};
use crate::evaluate::persona::PersonaRegistry;
use crate::evaluate::EvaluatorOptions;
use crate::ingest::providers::Fetcher;
use crate::ingest::registry::AdapterRegistry;

pub struct RunContext {
    pub personas: PersonaRegistry,
    pub adapters: AdapterRegistry,
    pub fetcher: Fetcher,
    pub store: Arc<dyn DedupStore>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: DynLlm,
    pub evaluator: EvaluatorOptions,
    /// Bounds concurrent model calls across all pipelines.
    pub eval_permits: Arc<Semaphore>,
    pub dedup: DedupSettings,
    pub source_timeout: Duration,
}

impl RunContext {
    /// Defaults everywhere except the three external services. Sources read
    /// from an empty fixture set until `fetcher` is replaced.
    pub fn new(llm: DynLlm, store: Arc<dyn DedupStore>, embedder: Arc<dyn Embedder>) -> Self {
        let evaluator = EvaluatorOptions::default();
        Self {
            personas: PersonaRegistry::with_builtins(),
            adapters: AdapterRegistry::with_builtins(),
            fetcher: Fetcher::fixtures(Vec::<(String, String)>::new()),
            store,
            embedder,
            llm,
            eval_permits: Arc::new(Semaphore::new(evaluator.max_concurrency)),
            evaluator,
            dedup: DedupSettings::default(),
            source_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_evaluator(mut self, opts: EvaluatorOptions) -> Self {
        self.eval_permits = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        self.evaluator = opts;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupSettings) -> Self {
        self.dedup = dedup;
        self
    }

    /// Wire live services from a sanitized config document.
    pub async fn from_config(cfg: &DigestConfig) -> anyhow::Result<Self> {
        let mut personas = PersonaRegistry::with_builtins();
        personas
            .apply_specs(&cfg.personas)
            .context("applying [[personas]]")?;

        let source_timeout = Duration::from_secs(cfg.sources.timeout_secs);
        let fetcher = Fetcher::http(&cfg.sources.user_agent, source_timeout)
            .context("building source HTTP client")?;

        let store: Arc<dyn DedupStore> = if cfg.dedup.store_path.trim().is_empty() {
            tracing::warn!(target: "dedup", "no store_path configured; dedup history is in-memory only");
            Arc::new(MemoryDedupStore::new())
        } else {
            let path = Path::new(cfg.dedup.store_path.trim());
            Arc::new(
                JsonFileDedupStore::open(path)
                    .await
                    .with_context(|| format!("opening dedup store {}", path.display()))?,
            )
        };

        let embedder: Arc<dyn Embedder> = match cfg.embedding.kind {
            EmbeddingKind::Hashed => Arc::new(HashedEmbedder::new(cfg.embedding.dim)),
            EmbeddingKind::Remote => {
                let base = cfg
                    .embedding
                    .base_url
                    .as_deref()
                    .unwrap_or(cfg.llm.base_url.as_str());
                let model = cfg
                    .embedding
                    .model
                    .as_deref()
                    .context("[embedding] kind = \"remote\" requires a model")?;
                Arc::new(
                    RemoteEmbedder::new(
                        base,
                        model,
                        &cfg.llm.api_key,
                        Duration::from_secs(cfg.llm.timeout_secs),
                    )
                    .context("building embedding client")?,
                )
            }
        };

        let llm: DynLlm = Arc::new(
            ChatCompletionsClient::from_settings(&cfg.llm).context("building LLM client")?,
        );

        let evaluator = EvaluatorOptions::from_settings(&cfg.evaluator, &cfg.llm);
        tracing::info!(
            personas = ?personas.names(),
            embedder = embedder.name(),
            llm_model = %cfg.llm.model,
            max_concurrency = evaluator.max_concurrency,
            "run context ready"
        );

        Ok(Self {
            personas,
            adapters: AdapterRegistry::with_builtins(),
            fetcher,
            store,
            embedder,
            llm,
            eval_permits: Arc::new(Semaphore::new(evaluator.max_concurrency)),
            evaluator,
            dedup: cfg.dedup.clone(),
            source_timeout,
        })
    }
}
