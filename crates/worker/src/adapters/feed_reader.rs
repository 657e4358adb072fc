// RSS/Atom subscription reader

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use neofeed_core::subscription::MAX_ITEMS_PER_POLL;
use neofeed_core::telemetry::peer;
use neofeed_core::traits::FeedReader;
use neofeed_core::{FeedItem, FetchError};
use tracing::{debug, instrument, warn};
use url::Url;

use super::fetcher::html_to_text;
use super::is_transient;

pub struct HttpFeedReader {
    client: reqwest::Client,
}

impl HttpFeedReader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("neofeed-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    #[instrument(skip(self), fields(peer.service = peer::FEED_READER))]
    async fn read_feed(&self, source_url: &str) -> Result<Vec<FeedItem>, FetchError> {
        let url = Url::parse(source_url)
            .map_err(|e| FetchError::permanent(format!("malformed feed URL {source_url}: {e}")))?;

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(source_url, error = %e, "feed request failed");
            if is_transient(&e) {
                FetchError::transient(e.to_string())
            } else {
                FetchError::permanent(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), source_url));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::transient(format!("reading feed body: {e}")))?;

        let items = parse_feed(&body)?;
        debug!(source_url, items = items.len(), "feed read");
        Ok(items)
    }
}

/// Parse RSS/Atom into items, newest first, at most [`MAX_ITEMS_PER_POLL`]
pub(crate) fn parse_feed(body: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
    let feed = parser::parse(body)
        .map_err(|e| FetchError::permanent(format!("unparseable feed: {e}")))?;

    let mut items: Vec<FeedItem> = feed.entries.into_iter().filter_map(to_item).collect();
    // Stable sort keeps document order for undated entries
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    items.truncate(MAX_ITEMS_PER_POLL);
    Ok(items)
}

fn to_item(entry: Entry) -> Option<FeedItem> {
    let title = entry.title.map(|t| t.content.trim().to_string());
    let link = entry.links.first().map(|l| l.href.trim().to_string());
    let id = FeedItem::stable_id(Some(entry.id.as_str()), link.as_deref(), title.as_deref())?;

    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|raw| html_to_text(&raw))
        .filter(|s| !s.is_empty());
    let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);

    Some(FeedItem {
        id,
        title,
        link,
        summary,
        published_at,
    })
}
