// Capture inputs and collaborator payloads

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::feed::Category;

/// What a user submitted for capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureInput {
    /// A link to fetch
    Url { url: String },
    /// A text selection captured directly
    Text { text: String },
}

impl CaptureInput {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            CaptureInput::Url { url } => Some(url),
            CaptureInput::Text { .. } => None,
        }
    }
}

/// Output of the content fetcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedContent {
    /// Readable text, already truncated
    pub raw_content: String,
    /// Lowercased MIME type without parameters, e.g. `text/html`
    pub content_type: String,
    pub title: Option<String>,
}

impl FetchedContent {
    pub fn text(raw_content: impl Into<String>) -> Self {
        Self {
            raw_content: raw_content.into(),
            content_type: "text/plain".to_string(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title for a degraded record: the page title, else the first line
    pub fn fallback_title(&self) -> String {
        self.title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.raw_content
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(|l| truncate_chars(l, 80))
            })
            .unwrap_or_else(|| "Untitled".to_string())
    }
}

/// Output of the summarizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub takeaways: Vec<String>,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    pub reading_time_minutes: Option<u32>,
}

/// Per-user summarizer override. Unset fields fall back to the worker's defaults.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AiConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Replaces the default system prompt
    pub prompt: Option<String>,
    /// System prompt for the weekly narrative; falls back to `prompt`
    #[serde(default)]
    pub insight_prompt: Option<String>,
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("prompt", &self.prompt)
            .field("insight_prompt", &self.insight_prompt)
            .finish()
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Minutes to read at ~200 words per minute, at least 1
pub fn estimate_reading_time(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u32;
    words.div_ceil(200).max(1)
}
