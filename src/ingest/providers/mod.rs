// src/ingest/providers/mod.rs
pub mod aggregator;
pub mod feed;
pub mod forum;
pub mod launch_board;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

/// Where adapters get response bodies from: live HTTP, or canned bodies keyed
/// by URL (tests, offline runs).
#[derive(Clone)]
pub enum Fetcher {
    Http(reqwest::Client),
    Fixtures(Arc<HashMap<String, String>>),
}

impl Fetcher {
    pub fn http(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self::Http(client))
    }

    pub fn fixtures<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::Fixtures(Arc::new(map))
    }

    /// GET `url` and return the body; non-2xx is an error.
    pub async fn get_text(&self, url: &str) -> Result<String, String> {
        match self {
            Fetcher::Http(client) => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| format!("GET {url}: {e}"))?;
                let resp = resp
                    .error_for_status()
                    .map_err(|e| format!("GET {url}: {e}"))?;
                resp.text().await.map_err(|e| format!("GET {url} body: {e}"))
            }
            Fetcher::Fixtures(map) => map
                .get(url)
                .cloned()
                .ok_or_else(|| format!("GET {url}: 404 (no fixture)")),
        }
    }
}

pub(crate) fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

pub(crate) fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

pub(crate) fn from_unix(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0)
}

/// Items without a timestamp are kept; everything else must be inside the window.
pub(crate) fn within_window(published: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    published.is_none_or(|ts| ts >= cutoff)
}
