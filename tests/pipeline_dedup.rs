// tests/pipeline_dedup.rs
mod common;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use common::*;
use intel_digest::dedup::store::{DedupStore, JsonFileDedupStore, KeyStatus, MemoryDedupStore};
use intel_digest::pipeline::factory;
use intel_digest::DigestError;

const FEED_URL: &str = "https://feeds.test/genai";

const DOC: &str = r#"
[pipelines.genai]
persona = "GENAI_NEWS"
top_k = 10
sources = [{ type = "rss", name = "genai_rss", feeds = ["https://feeds.test/genai"] }]
"#;

fn feed_fixture() -> Vec<(String, String)> {
    let body = rss(&[
        ("alpha apple", "https://news.test/a?utm_source=x", "first"),
        ("bravo banana", "https://news.test/b", "second"),
        ("charlie cherry", "https://news.test/c", "third"),
    ]);
    vec![(FEED_URL.to_string(), body)]
}

#[tokio::test]
async fn second_run_over_identical_data_accepts_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("dedup.json");
    let entries = pipeline_entries(DOC);

    let first = {
        let store = Arc::new(JsonFileDedupStore::open(&path).await.unwrap());
        let ctx = context(Arc::new(ScoreByTitle::new(0.9)), store, feed_fixture());
        let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
        p.run(&CancellationToken::new()).await.unwrap()
    };
    assert_eq!(first.report.accepted, 3);
    assert_eq!(first.batch.len(), 3);

    // Fresh process: reopen the store from disk.
    let llm = Arc::new(ScoreByTitle::new(0.9));
    let store = Arc::new(JsonFileDedupStore::open(&path).await.unwrap());
    let ctx = context(llm.clone(), store, feed_fixture());
    let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
    let second = p.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(second.report.fetched, 3);
    assert_eq!(second.report.accepted, 0);
    assert_eq!(second.report.exact_dups, 3);
    assert!(second.batch.is_empty());
    assert_eq!(llm.calls(), 0, "duplicates must never reach the model");
}

#[tokio::test]
async fn near_duplicates_with_distinct_keys_keep_only_the_first() {
    let body = rss(&[
        ("OpenAI ships a new reasoning model", "https://news.test/openai-model", "x"),
        ("OpenAI ships a new reasoning model!", "https://mirror.test/2025/openai", "x"),
        ("delta date", "https://news.test/d", "y"),
    ]);
    let store = Arc::new(MemoryDedupStore::new());
    let ctx = context(
        Arc::new(ScoreByTitle::new(0.9)),
        store.clone(),
        vec![(FEED_URL.to_string(), body)],
    );
    let entries = pipeline_entries(DOC);
    let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
    let run = p.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(run.report.semantic_dups, 1);
    assert_eq!(run.report.accepted, 2);
    let urls: Vec<_> = run
        .batch
        .items
        .iter()
        .filter_map(|i| i.candidate.url.clone())
        .collect();
    assert!(urls.contains(&"https://news.test/openai-model".to_string()));
    assert!(!urls.contains(&"https://mirror.test/2025/openai".to_string()));
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn cancelled_run_leaves_candidates_re_evaluable() {
    let store = Arc::new(MemoryDedupStore::new());
    let entries = pipeline_entries(DOC);
    let cancel = CancellationToken::new();

    let llm = Arc::new(CancelOnCall {
        token: cancel.clone(),
        calls: Default::default(),
    });
    let ctx = context(llm, store.clone(), feed_fixture());
    let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
    let err = p.run(&cancel).await.unwrap_err();
    assert!(matches!(err, DigestError::Cancelled));

    // Accepted but never evaluated.
    assert_eq!(store.len().await, 3);
    assert_eq!(
        store.status("genai", "url:news.test/b").await.unwrap(),
        KeyStatus::Pending
    );

    let llm = Arc::new(ScoreByTitle::new(0.9));
    let ctx = context(llm.clone(), store.clone(), feed_fixture());
    let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
    let run = p.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(run.report.resumed, 3);
    assert_eq!(run.report.accepted, 0);
    assert_eq!(run.batch.len(), 3);
    assert_eq!(llm.calls(), 3);
    assert_eq!(
        store.status("genai", "url:news.test/b").await.unwrap(),
        KeyStatus::Evaluated
    );
}

#[tokio::test]
async fn history_is_scoped_per_pipeline() {
    let doc = r#"
[pipelines.one]
persona = "GENAI_NEWS"
sources = [{ type = "rss", feeds = ["https://feeds.test/genai"] }]

[pipelines.two]
persona = "GENAI_NEWS"
sources = [{ type = "rss", feeds = ["https://feeds.test/genai"] }]
"#;
    let entries = pipeline_entries(doc);
    let store = Arc::new(MemoryDedupStore::new());
    let ctx = context(Arc::new(ScoreByTitle::new(0.9)), store.clone(), feed_fixture());

    for name in ["one", "two"] {
        let p = factory::build_from_value(name, &entries[name], &ctx).unwrap();
        let run = p.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(run.report.accepted, 3, "{name}");
    }
    assert_eq!(store.len().await, 6);
}

#[tokio::test]
async fn store_outage_fails_the_pipeline_run() {
    let ctx = context(
        Arc::new(ScoreByTitle::new(0.9)),
        Arc::new(UnavailableStore),
        feed_fixture(),
    );
    let entries = pipeline_entries(DOC);
    let p = factory::build_from_value("genai", &entries["genai"], &ctx).unwrap();
    let err = p.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, DigestError::DedupStore(_)));
}
