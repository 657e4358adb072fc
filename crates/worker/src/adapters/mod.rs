// HTTP implementations of the external collaborators
//
// Each adapter classifies failures the same way: network errors, timeouts,
// 408/429 and 5xx are transient; other 4xx are permanent.

use std::time::Duration;

mod feed_reader;
mod fetcher;
mod notifier;
mod summarizer;

pub use feed_reader::HttpFeedReader;
pub use fetcher::{html_to_text, HttpContentFetcher};
pub use notifier::HttpNotifier;
pub use summarizer::OpenAiSummarizer;

/// Default summarizer endpoint and model, overridden per user by `AiConfig`
#[derive(Clone)]
pub struct SummarizerSettings {
    /// OpenAI-compatible base URL, without `/chat/completions`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl SummarizerSettings {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: Self::DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for SummarizerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummarizerSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Transactional email API (Brevo-compatible)
#[derive(Clone)]
pub struct EmailSettings {
    pub api_url: String,
    pub api_key: String,
    pub sender: String,
}

impl EmailSettings {
    pub const DEFAULT_API_URL: &'static str = "https://api.brevo.com/v3/smtp/email";
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("api_url", &self.api_url)
            .field("api_key", &"<redacted>")
            .field("sender", &self.sender)
            .finish()
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}
