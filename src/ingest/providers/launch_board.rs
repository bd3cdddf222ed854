// src/ingest/providers/launch_board.rs
//! `launch_board` adapter: the launch board publishes an Atom feed, so this is a
//! feed adapter with its own label and kind.

use async_trait::async_trait;

use super::feed::FeedAdapter;
use super::Fetcher;
use crate::error::Result;
use crate::ingest::types::{Fetched, SourceAdapter, SourceKind};

pub const DEFAULT_LAUNCH_BOARD_FEED: &str = "https://www.producthunt.com/feed";

pub struct LaunchBoardAdapter {
    inner: FeedAdapter,
}

impl LaunchBoardAdapter {
    pub fn new(feed_url: Option<&str>, fetcher: Fetcher) -> Self {
        let url = feed_url.unwrap_or(DEFAULT_LAUNCH_BOARD_FEED).to_string();
        Self {
            inner: FeedAdapter::new("producthunt", vec![url], fetcher)
                .with_kind(SourceKind::LaunchBoard),
        }
    }
}

#[async_trait]
impl SourceAdapter for LaunchBoardAdapter {
    async fn fetch(&self, window_hours: u32) -> Result<Fetched> {
        self.inner.fetch(window_hours).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::LaunchBoard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn items_are_labelled_as_launches() {
        let ts = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let atom = format!(
            r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry><title>Promptbook</title>
<link rel="alternate" href="https://launch.test/p/promptbook"/><published>{ts}</published>
<content type="html">Prompt versioning for teams</content></entry></feed>"#
        );
        let a = LaunchBoardAdapter::new(
            Some("https://launch.test/feed"),
            Fetcher::fixtures([("https://launch.test/feed", atom)]),
        );
        let got = a.fetch(24).await.unwrap();
        assert_eq!(got.items.len(), 1);
        assert_eq!(got.items[0].kind, SourceKind::LaunchBoard);
        assert_eq!(got.items[0].source, "producthunt");
        assert_eq!(a.name(), "producthunt");
    }
}
