// Summarizer over an OpenAI-compatible chat completions API
//
// Content analysis asks the model for a JSON object; the first JSON object
// in the reply (fenced or bare) is parsed leniently, field by field. Weekly
// narratives are taken as plain markdown.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use neofeed_core::content::truncate_chars;
use neofeed_core::telemetry::peer;
use neofeed_core::traits::Summarizer;
use neofeed_core::{AiConfig, Category, FeedRecord, Summary, SummarizeError};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{is_transient, SummarizerSettings};

const DEFAULT_PROMPT: &str = "You are a content analyst. Analyse the article the user provides \
and answer with a single JSON object and nothing else, using these fields:\n\
{\"title\": \"article title\", \"summary\": \"core summary in at most 300 words\", \
\"takeaways\": [\"point 1\", \"point 2\", \"point 3\"], \"tags\": [\"tag\"], \
\"category\": \"tech|life|idea|art|other\", \"reading_time\": minutes}\n\
Do not rewrite or return the full text.";

const DEFAULT_INSIGHT_PROMPT: &str = "You are NeoFeed Intelligence. The user gives you the items \
they saved this week. Write a short weekly briefing in markdown: group related items, name the \
themes that connect them and point out what deserves a second read. Do not use level-one \
headings and do not add a subject line.";

const MAX_TAGS: usize = 8;
const NARRATIVE_ITEM_CHARS: usize = 400;

static RE_FENCED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fenced json regex"));
static RE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("json object regex"));

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Model output. Fields of the wrong shape are dropped rather than failing
/// the whole reply.
#[derive(Debug, Default, Deserialize)]
struct Analysis {
    #[serde(default, deserialize_with = "lenient_text")]
    title: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_takeaways")]
    takeaways: Vec<String>,
    #[serde(default, deserialize_with = "lenient_tags")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient_minutes")]
    reading_time: Option<u32>,
}

fn lenient_text<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// `["a", "b"]` or `"a, b"`
fn lenient_tags<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    Ok(string_list(Value::deserialize(de)?, |s| {
        s.split(',').map(str::to_string).collect()
    }))
}

/// `["a", "b"]` or one point per line
fn lenient_takeaways<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    Ok(string_list(Value::deserialize(de)?, |s| {
        s.lines()
            .map(|l| l.trim().trim_start_matches(['-', '*', '\u{2022}']).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }))
}

fn string_list(value: Value, split: impl Fn(&str) -> Vec<String>) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => split(&s),
        _ => Vec::new(),
    }
}

/// `4`, `4.5`, `"5"` or `"5 min"`, rounded up to whole minutes
fn lenient_minutes<'de, D: Deserializer<'de>>(de: D) -> Result<Option<u32>, D::Error> {
    let minutes = match Value::deserialize(de)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<f64>().ok()),
        _ => None,
    };
    Ok(minutes
        .filter(|m| m.is_finite() && *m > 0.0 && *m < f64::from(u32::MAX))
        .map(|m| m.ceil() as u32))
}

pub struct OpenAiSummarizer {
    client: reqwest::Client,
    settings: SummarizerSettings,
}

impl OpenAiSummarizer {
    pub fn new(settings: SummarizerSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/chat/completions", base_url.trim().trim_end_matches('/'))
    }

    /// One chat completion with the user's overrides applied. Returns the
    /// reply text and the model that produced it.
    async fn complete(
        &self,
        config: &AiConfig,
        system: &str,
        user_message: &str,
        temperature: f32,
    ) -> Result<(String, String), SummarizeError> {
        let api_key = config
            .api_key
            .as_deref()
            .or(self.settings.api_key.as_deref())
            .ok_or_else(|| SummarizeError::Configuration("no summarizer API key".to_string()))?;
        let model = config.model.as_deref().unwrap_or(&self.settings.model);
        let base_url = config.base_url.as_deref().unwrap_or(&self.settings.base_url);

        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature,
        };

        let response = self
            .client
            .post(Self::endpoint(base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "summarizer request failed");
                if is_transient(&e) {
                    SummarizeError::Unavailable(e.to_string())
                } else {
                    SummarizeError::Configuration(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {status}: {}", truncate_chars(&body, 300));
            return Err(match status.as_u16() {
                408 | 429 | 500..=599 => SummarizeError::Unavailable(detail),
                _ => SummarizeError::Configuration(detail),
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::InvalidResponse(format!("decoding completion: {e}")))?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| SummarizeError::InvalidResponse("empty completion".to_string()))?;
        Ok((text, model.to_string()))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    #[instrument(skip(self, raw_content, config), fields(peer.service = peer::SUMMARIZER, chars = raw_content.len()))]
    async fn summarize(
        &self,
        raw_content: &str,
        config: Option<&AiConfig>,
    ) -> Result<Summary, SummarizeError> {
        let config = config.cloned().unwrap_or_default();
        let prompt = config.prompt.as_deref().unwrap_or(DEFAULT_PROMPT);
        let user_message = format!("Analyse the following content:\n\n{raw_content}");

        let (text, model) = self.complete(&config, prompt, &user_message, 0.3).await?;
        let analysis = parse_analysis(&text)?;
        debug!(%model, "content summarized");
        Ok(into_summary(analysis, raw_content))
    }

    #[instrument(skip(self, items, config), fields(peer.service = peer::SUMMARIZER, items = items.len()))]
    async fn narrate_week(
        &self,
        items: &[FeedRecord],
        config: Option<&AiConfig>,
    ) -> Result<String, SummarizeError> {
        let config = config.cloned().unwrap_or_default();
        let prompt = config
            .insight_prompt
            .as_deref()
            .or(config.prompt.as_deref())
            .unwrap_or(DEFAULT_INSIGHT_PROMPT);
        let user_message = format!(
            "Write this week's briefing from the items below:\n\n{}",
            narrative_context(items)
        );

        let (text, model) = self.complete(&config, prompt, &user_message, 0.7).await?;
        debug!(%model, "week narrated");
        Ok(text.trim().to_string())
    }
}

/// One line per item: `- [CATEGORY] title: summary`
fn narrative_context(items: &[FeedRecord]) -> String {
    items
        .iter()
        .map(|r| {
            format!(
                "- [{}] {}: {}",
                r.category.as_str().to_uppercase(),
                r.title,
                truncate_chars(r.summary.trim(), NARRATIVE_ITEM_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_analysis(reply: &str) -> Result<Analysis, SummarizeError> {
    let json = RE_FENCED
        .captures(reply)
        .and_then(|c| c.get(1))
        .or_else(|| RE_OBJECT.find(reply))
        .map(|m| m.as_str())
        .ok_or_else(|| SummarizeError::InvalidResponse("no JSON object in reply".to_string()))?;
    serde_json::from_str(json)
        .map_err(|e| SummarizeError::InvalidResponse(format!("malformed analysis JSON: {e}")))
}

fn into_summary(analysis: Analysis, raw_content: &str) -> Summary {
    let title = analysis
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| neofeed_core::FetchedContent::text(raw_content).fallback_title());
    let summary = analysis
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| truncate_chars(raw_content.trim(), 200));
    let mut seen = HashSet::new();
    let mut tags: Vec<String> = analysis
        .tags
        .into_iter()
        .map(|t| t.trim().trim_start_matches('#').to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();
    tags.truncate(MAX_TAGS);

    Summary {
        title,
        summary,
        takeaways: analysis.takeaways,
        category: analysis
            .category
            .as_deref()
            .map(Category::normalize)
            .unwrap_or(Category::Other),
        tags,
        reading_time_minutes: analysis.reading_time.filter(|&m| m > 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neofeed_core::{FeedSource, NewFeed};
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    fn summarizer(server: &MockServer) -> OpenAiSummarizer {
        OpenAiSummarizer::new(SummarizerSettings {
            base_url: format!("{}/v1/", server.uri()),
            api_key: Some("default-key".to_string()),
            model: "default-model".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_fenced_and_bare_json() {
        let fenced = "Here you go:\n```json\n{\"title\": \"T\", \"category\": \"Technology\"}\n```";
        let analysis = parse_analysis(fenced).unwrap();
        assert_eq!(analysis.title.as_deref(), Some("T"));

        let bare = "{\"summary\": \"S\", \"tags\": [\"#Rust\", \"rust\", \" \"]}";
        let summary = into_summary(parse_analysis(bare).unwrap(), "Body line\nmore");
        assert_eq!(summary.title, "Body line");
        assert_eq!(summary.tags, vec!["rust"]);
        assert_eq!(summary.category, Category::Other);

        assert!(matches!(
            parse_analysis("I cannot help with that"),
            Err(SummarizeError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_loosely_typed_fields_still_parse() {
        let reply = r#"{"title": "T", "summary": "A real summary", "category": "tech", "reading_time": "5", "tags": "Rust, async", "takeaways": "- first\n- second"}"#;
        let summary = into_summary(parse_analysis(reply).unwrap(), "body");
        assert_eq!(summary.summary, "A real summary");
        assert_eq!(summary.reading_time_minutes, Some(5));
        assert_eq!(summary.tags, vec!["rust", "async"]);
        assert_eq!(summary.takeaways, vec!["first", "second"]);

        let fractional = parse_analysis(r#"{"summary": "S", "reading_time": 4.5}"#).unwrap();
        assert_eq!(fractional.reading_time, Some(5));

        // Unusable values are dropped, the rest of the reply is kept
        let odd = parse_analysis(
            r#"{"summary": "S", "reading_time": "soon", "tags": {"a": 1}, "title": null, "category": ["tech"]}"#,
        )
        .unwrap();
        assert_eq!(odd.summary.as_deref(), Some("S"));
        assert_eq!(odd.reading_time, None);
        assert!(odd.tags.is_empty());
        assert_eq!(odd.title, None);
        assert_eq!(odd.category, None);
    }

    #[test]
    fn test_tags_dedupe_keeps_first_occurrence() {
        let reply = r##"{"tags": ["Rust", "async", "#rust", "Async", "tokio"]}"##;
        let summary = into_summary(parse_analysis(reply).unwrap(), "body");
        assert_eq!(summary.tags, vec!["rust", "async", "tokio"]);
    }

    #[tokio::test]
    async fn test_narrate_week_prefers_insight_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("default-key"))
            .and(body_partial_json(json!({"model": "default-model", "temperature": 0.7})))
            .and(body_string_contains("Be brief."))
            .and(body_string_contains("- [TECH] Ownership: Values have owners."))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("  A quiet week of Rust reading.\n")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let config = AiConfig {
            prompt: Some("Analyse things.".to_string()),
            insight_prompt: Some("Be brief.".to_string()),
            ..Default::default()
        };
        let item = NewFeed::enriched(
            None,
            "body".to_string(),
            Summary {
                title: "Ownership".to_string(),
                summary: "Values have owners.".to_string(),
                takeaways: Vec::new(),
                category: Category::Tech,
                tags: Vec::new(),
                reading_time_minutes: Some(1),
            },
            FeedSource::Capture,
            chrono::Utc::now(),
        )
        .into_record(uuid::Uuid::now_v7(), uuid::Uuid::now_v7(), "fp".to_string());
        let narrative = summarizer(&server)
            .narrate_week(&[item], Some(&config))
            .await
            .unwrap();
        assert_eq!(narrative, "A quiet week of Rust reading.");
    }

    #[tokio::test]
    async fn test_summarize_uses_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("default-key"))
            .and(body_partial_json(json!({"model": "default-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(
                r#"{"title": "Ownership", "summary": "Values have owners.", "takeaways": ["moves"], "tags": ["rust"], "category": "tech", "reading_time": 4}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let summary = summarizer(&server).summarize("body", None).await.unwrap();
        assert_eq!(summary.title, "Ownership");
        assert_eq!(summary.category, Category::Tech);
        assert_eq!(summary.takeaways, vec!["moves"]);
        assert_eq!(summary.reading_time_minutes, Some(4));
    }

    #[tokio::test]
    async fn test_user_config_overrides_model_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(bearer_token("user-key"))
            .and(body_partial_json(json!({"model": "user-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"title": "X"}"#)))
            .expect(1)
            .mount(&server)
            .await;

        let config = AiConfig {
            model: Some("user-model".to_string()),
            api_key: Some("user-key".to_string()),
            ..Default::default()
        };
        let summary = summarizer(&server)
            .summarize("body", Some(&config))
            .await
            .unwrap();
        assert_eq!(summary.title, "X");
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(bearer_token("busy"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(bearer_token("bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(bearer_token("rambling"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("no json here")))
            .mount(&server)
            .await;

        let s = summarizer(&server);
        let with_key = |key: &str| AiConfig {
            api_key: Some(key.to_string()),
            ..Default::default()
        };
        assert!(matches!(
            s.summarize("b", Some(&with_key("busy"))).await,
            Err(SummarizeError::Unavailable(_))
        ));
        assert!(matches!(
            s.summarize("b", Some(&with_key("bad"))).await,
            Err(SummarizeError::Configuration(_))
        ));
        assert!(matches!(
            s.summarize("b", Some(&with_key("rambling"))).await,
            Err(SummarizeError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_configuration_error() {
        let s = OpenAiSummarizer::new(SummarizerSettings::default()).unwrap();
        assert!(matches!(
            s.summarize("body", None).await,
            Err(SummarizeError::Configuration(_))
        ));
    }
}
