// src/ingest/mod.rs
pub mod providers;
pub mod registry;
pub mod types;

use crate::error::DigestError;
use crate::ingest::types::{Candidate, RawItem, SourceAdapter};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// One-time metrics registration (so series show up once a recorder is installed).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items parsed from sources.");
        describe_counter!(
            "ingest_skipped_total",
            "Malformed source entries skipped during parsing."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Whole-source fetch/parse failures."
        );
        describe_counter!(
            "ingest_cross_source_dups_total",
            "Candidates sharing a canonical key with an earlier source in the same run."
        );
        describe_histogram!("ingest_fetch_ms", "Per-source fetch time in milliseconds.");
    });
}

/// Normalize text: decode entities, strip tags, fold quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap: 4000 chars
    if out.chars().count() > 4000 {
        out = out.chars().take(4000).collect();
    }

    out
}

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "ref_src", "mc_cid", "mc_eid"];

/// Normalize a URL into a scheme-less, tracking-free identity string.
/// Returns `None` for anything that is not an absolute http(s) URL.
pub fn canonical_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw.trim()).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let mut path = parsed.path().to_string();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path == "/" {
        path.clear();
    }

    // Pairs come back percent-decoded; re-encode so `%26` never reads as `&`.
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&&**k))
    {
        query.append_pair(&k, &v);
    }
    let query = query.finish();

    let mut out = format!("{host}{path}");
    if !query.is_empty() {
        out.push('?');
        out.push_str(&query);
    }
    Some(out)
}

/// Canonical key: normalized URL when available, else a hash of title + timestamp.
pub fn canonical_key(url: Option<&str>, title: &str, published_at: Option<DateTime<Utc>>) -> String {
    if let Some(u) = url.and_then(canonical_url) {
        return format!("url:{u}");
    }
    let mut hasher = Sha256::new();
    hasher.update(title.trim().to_lowercase().as_bytes());
    hasher.update(b"\n");
    if let Some(ts) = published_at {
        hasher.update(ts.to_rfc3339().as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(5 + 64);
    out.push_str("hash:");
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Normalize per-source raw items into candidates.
///
/// Order: sources in the order given, engagement descending within a source
/// (stable). A canonical key already produced by an earlier item wins; later
/// ones are dropped. Returns (candidates, cross_source_dups).
pub fn normalize_batch(per_source: Vec<Vec<RawItem>>) -> (Vec<Candidate>, usize) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let mut dups = 0usize;

    for mut items in per_source {
        items.sort_by(|a, b| {
            let ea = a.engagement.unwrap_or(f64::NEG_INFINITY);
            let eb = b.engagement.unwrap_or(f64::NEG_INFINITY);
            eb.partial_cmp(&ea).unwrap_or(std::cmp::Ordering::Equal)
        });

        for raw in items {
            let title = normalize_text(&raw.title);
            if title.is_empty() {
                continue;
            }
            let summary = normalize_text(&raw.summary);
            let url = raw.url.filter(|u| !u.trim().is_empty());
            let key = canonical_key(url.as_deref(), &title, raw.published_at);
            if !seen.insert(key.clone()) {
                dups += 1;
                continue;
            }
            let idx = out.len();
            out.push(Candidate::new(
                key,
                title,
                summary,
                url,
                raw.published_at,
                raw.engagement,
                raw.kind,
                raw.source,
                idx,
            ));
        }
    }

    (out, dups)
}

/// Result of running every adapter of one pipeline.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub candidates: Vec<Candidate>,
    pub fetched: usize,
    pub skipped: usize,
    pub cross_source_dups: usize,
    pub source_errors: Vec<DigestError>,
}

/// Run all adapters concurrently, each under its own timeout.
///
/// A failing or timed-out adapter contributes zero items; its error is logged,
/// counted and returned in `source_errors`.
pub async fn fetch_all(
    adapters: &[Box<dyn SourceAdapter>],
    window_hours: u32,
    timeout: Duration,
) -> IngestReport {
    ensure_metrics_described();

    let futs = adapters.iter().map(|a| async move {
        let t0 = Instant::now();
        let res = match tokio::time::timeout(timeout, a.fetch(window_hours)).await {
            Ok(r) => r,
            Err(_) => Err(DigestError::source_fetch(
                a.name(),
                format!("timed out after {}s", timeout.as_secs()),
            )),
        };
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        (a.name().to_string(), res)
    });

    let mut report = IngestReport::default();
    let mut per_source = Vec::with_capacity(adapters.len());
    for (name, res) in join_all(futs).await {
        match res {
            Ok(fetched) => {
                tracing::debug!(
                    target: "ingest",
                    source = %name,
                    items = fetched.items.len(),
                    skipped = fetched.skipped,
                    "source fetched"
                );
                counter!("ingest_items_total").increment(fetched.items.len() as u64);
                counter!("ingest_skipped_total").increment(fetched.skipped as u64);
                report.fetched += fetched.items.len();
                report.skipped += fetched.skipped;
                per_source.push(fetched.items);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, source = %name, "source error");
                counter!("ingest_source_errors_total").increment(1);
                report.source_errors.push(e);
            }
        }
    }

    let (candidates, dups) = normalize_batch(per_source);
    counter!("ingest_cross_source_dups_total").increment(dups as u64);
    report.candidates = candidates;
    report.cross_source_dups = dups;
    report
}

/// Cutoff for a fetch window; items published before it are dropped by adapters.
pub fn window_cutoff(window_hours: u32) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(i64::from(window_hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    fn raw(source: &str, title: &str, url: Option<&str>, engagement: Option<f64>) -> RawItem {
        RawItem {
            kind: SourceKind::Forum,
            source: source.into(),
            external_id: None,
            title: title.into(),
            summary: String::new(),
            url: url.map(Into::into),
            published_at: None,
            engagement,
        }
    }

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "  <b>Hello</b>,&nbsp;&nbsp; “world”  ";
        assert_eq!(normalize_text(s), r#"Hello , "world""#);
    }

    #[test]
    fn canonical_url_drops_tracking_and_www() {
        let a = canonical_url("https://www.Example.com/post/1/?utm_source=x&id=7#top").unwrap();
        let b = canonical_url("http://example.com/post/1?id=7&fbclid=abc").unwrap();
        assert_eq!(a, "example.com/post/1?id=7");
        assert_eq!(a, b);
        assert!(canonical_url("mailto:someone@example.com").is_none());
        assert!(canonical_url("not a url").is_none());
    }

    #[test]
    fn canonical_url_keeps_encoded_separators_distinct() {
        let encoded = canonical_url("https://shop.test/search?q=a%26b%3Dc").unwrap();
        let split = canonical_url("https://shop.test/search?q=a&b=c").unwrap();
        assert_ne!(encoded, split);
        assert_eq!(encoded, "shop.test/search?q=a%26b%3Dc");
        assert_eq!(split, "shop.test/search?q=a&b=c");
        assert_eq!(canonical_url(&format!("https://{encoded}")).unwrap(), encoded);
    }

    #[test]
    fn canonical_key_falls_back_to_hash() {
        let k1 = canonical_key(None, "Some Title", None);
        let k2 = canonical_key(Some(""), "some title ", None);
        assert!(k1.starts_with("hash:"));
        assert_eq!(k1, k2);
        assert!(canonical_key(Some("https://a.test/x"), "t", None).starts_with("url:"));
    }

    #[test]
    fn batch_orders_by_source_then_engagement_and_drops_repeats() {
        let per_source = vec![
            vec![
                raw("a", "low", Some("https://a.test/1"), Some(1.0)),
                raw("a", "high", Some("https://a.test/2"), Some(50.0)),
            ],
            vec![
                raw("b", "same link", Some("https://www.a.test/2/"), Some(99.0)),
                raw("b", "", Some("https://b.test/empty"), None),
                raw("b", "other", Some("https://b.test/3"), None),
            ],
        ];
        let (cands, dups) = normalize_batch(per_source);
        let titles: Vec<_> = cands.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["high", "low", "other"]);
        assert_eq!(dups, 1);
        assert_eq!(
            cands.iter().map(|c| c.discovery_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }
}
