// Content fetcher over HTTP
//
// Fetches a page, keeps text-like bodies and reduces HTML to readable text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use html_escape::decode_html_entities;
use neofeed_core::content::truncate_chars;
use neofeed_core::telemetry::peer;
use neofeed_core::traits::ContentFetcher;
use neofeed_core::{FetchError, FetchedContent};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};
use url::Url;

use super::is_transient;

const USER_AGENT: &str = concat!("neofeed-worker/", env!("CARGO_PKG_VERSION"));

static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"));
static RE_INVISIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template|svg|head)\b[^>]*>.*?</(script|style|noscript|template|svg|head)>")
        .expect("invisible element regex")
});
static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));
static RE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|article|section|blockquote|pre)\b[^>]*>")
        .expect("block element regex")
});
static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\x{a0}]+").expect("space regex"));

pub struct HttpContentFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl HttpContentFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, max_chars })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    #[instrument(skip(self), fields(peer.service = peer::FETCHER))]
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::permanent(format!("malformed URL {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::permanent(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            warn!(url, error = %e, "fetch request failed");
            if is_transient(&e) {
                FetchError::transient(e.to_string())
            } else {
                FetchError::permanent(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16(), url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type)
            .unwrap_or_else(|| "text/html".to_string());
        if !is_textual(&content_type) {
            return Err(FetchError::permanent(format!(
                "unsupported content type {content_type}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(format!("reading body: {e}")))?;

        let (title, text) = if content_type.contains("html") {
            (extract_title(&body), html_to_text(&body))
        } else {
            (None, body.trim().to_string())
        };
        debug!(url, %content_type, chars = text.len(), "fetched");

        Ok(FetchedContent {
            raw_content: truncate_chars(&text, self.max_chars),
            content_type,
            title,
        })
    }
}

/// `Text/HTML; charset=utf-8` -> `text/html`
fn normalize_content_type(raw: &str) -> String {
    raw.split(';').next().unwrap_or(raw).trim().to_lowercase()
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.ends_with("+xml")
        || content_type.ends_with("/xml")
        || content_type.ends_with("/json")
        || content_type == "application/xhtml+xml"
}

fn extract_title(html: &str) -> Option<String> {
    RE_TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| {
            decode_html_entities(m.as_str())
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|t| !t.is_empty())
}

/// Strip markup, keeping one line per block element
pub fn html_to_text(html: &str) -> String {
    let text = RE_INVISIBLE.replace_all(html, " ");
    let text = RE_COMMENT.replace_all(&text, " ");
    let text = RE_BLOCK.replace_all(&text, "\n");
    let text = RE_TAG.replace_all(&text, " ");
    let text = decode_html_entities(&text);

    text.lines()
        .map(|line| RE_SPACES.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
