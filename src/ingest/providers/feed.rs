// src/ingest/providers/feed.rs
use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use super::{parse_rfc2822, parse_rfc3339, within_window, Fetcher};
use crate::error::{DigestError, Result};
use crate::ingest::types::{Fetched, RawItem, SourceAdapter, SourceKind};
use crate::ingest::window_cutoff;

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl AtomEntry {
    fn alternate_link(&self) -> Option<String> {
        self.link
            .iter()
            .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
            .or_else(|| self.link.first())
            .and_then(|l| l.href.clone())
    }
}

/// Entities that are valid HTML but undefined in XML; feeds leak them often.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn looks_like_atom(xml: &str) -> bool {
    match (xml.find("<feed"), xml.find("<rss")) {
        (Some(_), None) => true,
        (Some(f), Some(r)) => f < r,
        _ => false,
    }
}

/// Parse an RSS or Atom document into raw items. Entries without a title are
/// skipped and counted. Returns (items, skipped).
pub fn parse_feed(
    xml: &str,
    source: &str,
    kind: SourceKind,
) -> AnyResult<(Vec<RawItem>, usize)> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let mut out = Vec::new();
    let mut skipped = 0usize;

    if looks_like_atom(&xml_clean) {
        let atom: Atom = from_str(&xml_clean).context("parsing atom xml")?;
        for e in atom.entry {
            let title = e.title.as_ref().map(|t| t.value.trim()).unwrap_or_default();
            if title.is_empty() {
                skipped += 1;
                continue;
            }
            let summary = e
                .summary
                .as_ref()
                .or(e.content.as_ref())
                .map(|t| t.value.clone())
                .unwrap_or_default();
            let published_at = e
                .published
                .as_deref()
                .or(e.updated.as_deref())
                .and_then(parse_rfc3339);
            out.push(RawItem {
                kind,
                source: source.to_string(),
                external_id: None,
                title: title.to_string(),
                summary,
                url: e.alternate_link(),
                published_at,
                engagement: None,
            });
        }
    } else {
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
        for it in rss.channel.item {
            let title = it.title.as_deref().map(str::trim).unwrap_or_default();
            if title.is_empty() {
                skipped += 1;
                continue;
            }
            out.push(RawItem {
                kind,
                source: source.to_string(),
                external_id: None,
                title: title.to_string(),
                summary: it.description.unwrap_or_default(),
                url: it.link.map(|l| l.trim().to_string()),
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                engagement: None,
            });
        }
    }

    Ok((out, skipped))
}

/// `feed` adapter: one or more RSS/Atom URLs under one source label.
pub struct FeedAdapter {
    label: String,
    kind: SourceKind,
    urls: Vec<String>,
    fetcher: Fetcher,
}

impl FeedAdapter {
    pub fn new(label: impl Into<String>, urls: Vec<String>, fetcher: Fetcher) -> Self {
        Self {
            label: label.into(),
            kind: SourceKind::Feed,
            urls,
            fetcher,
        }
    }

    /// Single-document adapter over an in-memory body.
    pub fn from_fixture(label: &str, xml: &str) -> Self {
        let url = format!("fixture://{label}");
        Self::new(label, vec![url.clone()], Fetcher::fixtures([(url, xml)]))
    }

    pub(crate) fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    async fn fetch(&self, window_hours: u32) -> Result<Fetched> {
        let cutoff = window_cutoff(window_hours);
        let mut items = Vec::new();
        let mut skipped = 0usize;
        let mut failures = Vec::new();

        for url in &self.urls {
            let parsed = match self.fetcher.get_text(url).await {
                Ok(body) => parse_feed(&body, &self.label, self.kind).map_err(|e| format!("{e:#}")),
                Err(e) => Err(e),
            };
            match parsed {
                Ok((mut v, s)) => {
                    v.retain(|it| within_window(it.published_at, cutoff));
                    items.append(&mut v);
                    skipped += s;
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", source = %self.label, %url, error = %e, "feed failed");
                    failures.push(e);
                }
            }
        }

        if !self.urls.is_empty() && failures.len() == self.urls.len() {
            return Err(DigestError::source_fetch(&self.label, failures.join(" | ")));
        }
        Ok(Fetched::new(items, skipped))
    }

    fn name(&self) -> &str {
        &self.label
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>t</title>
<item><title>Quantization &ndash; a primer</title><link>https://blog.test/q</link>
<pubDate>Tue, 10 Jun 2025 12:00:00 +0000</pubDate><description>&lt;p&gt;Int4 inference&lt;/p&gt;</description></item>
<item><title></title><link>https://blog.test/empty</link></item>
<item><title>No date</title><link>https://blog.test/nodate</link></item>
</channel></rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"><title>Launches</title>
<entry><title>Tiny agent runtime</title>
<link rel="alternate" type="text/html" href="https://launch.test/posts/tiny"/>
<published>2025-06-10T12:00:00Z</published>
<content type="html">Run agents locally</content></entry>
</feed>"#;

    #[test]
    fn rss_items_parse_and_empty_titles_are_skipped() {
        let (items, skipped) = parse_feed(RSS, "blog", SourceKind::Feed).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(items[0].title, "Quantization - a primer");
        assert_eq!(items[0].url.as_deref(), Some("https://blog.test/q"));
        assert!(items[0].published_at.is_some());
        assert!(items[1].published_at.is_none());
        assert!(items.iter().all(|i| i.engagement.is_none()));
    }

    #[test]
    fn atom_entries_parse() {
        let (items, skipped) = parse_feed(ATOM, "ph", SourceKind::LaunchBoard).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url.as_deref(), Some("https://launch.test/posts/tiny"));
        assert_eq!(items[0].summary, "Run agents locally");
        assert_eq!(items[0].kind, SourceKind::LaunchBoard);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("<html><body>oops", "x", SourceKind::Feed).is_err());
    }

    #[tokio::test]
    async fn all_feeds_failing_fails_the_source() {
        let a = FeedAdapter::new(
            "blogs",
            vec!["https://a.test/rss".into(), "https://b.test/rss".into()],
            Fetcher::fixtures([("https://b.test/rss", RSS)]),
        );
        // One feed missing, one fine: still a contribution. The dated item is
        // outside a one-hour window, the undated one is kept.
        let got = a.fetch(1).await.unwrap();
        assert_eq!(got.items.len(), 1);
        assert_eq!(got.items[0].title, "No date");

        let b = FeedAdapter::new(
            "blogs",
            vec!["https://a.test/rss".into()],
            Fetcher::fixtures(Vec::<(String, String)>::new()),
        );
        let err = b.fetch(24).await.unwrap_err();
        assert!(matches!(err, DigestError::SourceFetch { .. }));
    }
}
