// Feed ingestion workflow
//
// feed.process -> fetch -> dedupe-check -> summarize -> persist
//
// A permanent fetch failure fails the run. An exhausted summarize step is
// caught and the record is persisted raw instead.

use async_trait::async_trait;
use neofeed_core::content::estimate_reading_time;
use neofeed_core::{content_fingerprint, CaptureInput, FetchedContent, NewFeed, Summary};
use neofeed_durable::{RetryPolicy, StepContext, StepError, Workflow, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::PipelineDeps;
use crate::events::FeedProcessRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// A new enriched record
    Created,
    /// The same content was already stored for this user
    Duplicate,
    /// A new record without summary fields
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutput {
    pub feed_id: Uuid,
    pub fingerprint: String,
    pub status: IngestStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DedupeCheck {
    fingerprint: String,
    existing: Option<Uuid>,
}

pub struct FeedIngestWorkflow {
    deps: PipelineDeps,
    retry: RetryPolicy,
}

impl FeedIngestWorkflow {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Workflow for FeedIngestWorkflow {
    const NAME: &'static str = "feed-ingest";
    type Input = FeedProcessRequest;
    type Output = IngestOutput;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(
        &self,
        ctx: &StepContext,
        input: FeedProcessRequest,
    ) -> Result<IngestOutput, WorkflowError> {
        let user_id = input.user_id;

        let fetcher = self.deps.fetcher.clone();
        let capture = input.capture.clone();
        let content: FetchedContent = ctx
            .step("fetch", |_| async move {
                let content = match capture {
                    CaptureInput::Url { url } => fetcher.fetch(&url).await?,
                    CaptureInput::Text { text } => FetchedContent::text(text),
                };
                if content.raw_content.trim().is_empty() {
                    return Err(StepError::permanent("no readable content"));
                }
                Ok(content)
            })
            .await?;

        let feeds = self.deps.feeds.clone();
        let raw = content.raw_content.clone();
        let check: DedupeCheck = ctx
            .step("dedupe-check", |_| async move {
                let fingerprint = content_fingerprint(&raw);
                let existing = feeds
                    .find_by_fingerprint(user_id, &fingerprint)
                    .await?
                    .map(|record| record.id);
                Ok(DedupeCheck {
                    fingerprint,
                    existing,
                })
            })
            .await?;

        if let Some(feed_id) = check.existing {
            info!(%user_id, %feed_id, "content already captured");
            return Ok(IngestOutput {
                feed_id,
                fingerprint: check.fingerprint,
                status: IngestStatus::Duplicate,
            });
        }

        let users = self.deps.users.clone();
        let summarizer = self.deps.summarizer.clone();
        let raw = content.raw_content.clone();
        let summary = ctx
            .step("summarize", |_| async move {
                let ai_config = users
                    .get_user(user_id)
                    .await?
                    .and_then(|profile| profile.ai_config);
                let mut summary: Summary = summarizer.summarize(&raw, ai_config.as_ref()).await?;
                summary
                    .reading_time_minutes
                    .get_or_insert_with(|| estimate_reading_time(&raw));
                Ok(summary)
            })
            .await;

        let url = input.capture.as_url().map(str::to_string);
        let created_at = ctx.event().emitted_at;
        let feed = match summary {
            Ok(summary) => NewFeed::enriched(
                url,
                content.raw_content.clone(),
                summary,
                input.source,
                created_at,
            ),
            Err(WorkflowError::StepFailed { error, .. }) => {
                warn!(%user_id, error = %error, "summarization exhausted, storing raw content");
                NewFeed::raw(
                    url,
                    content.fallback_title(),
                    content.raw_content.clone(),
                    input.source,
                    created_at,
                )
            }
            Err(other) => return Err(other),
        }
        .with_subscription(input.subscription_id);

        let feeds = self.deps.feeds.clone();
        let fingerprint = check.fingerprint;
        ctx.step("persist", |_| async move {
            let degraded = feed.enrichment == neofeed_core::Enrichment::Raw;
            let outcome = feeds.upsert_feed(user_id, &fingerprint, feed).await?;
            let status = match (outcome.was_created(), degraded) {
                (false, _) => IngestStatus::Duplicate,
                (true, true) => IngestStatus::Degraded,
                (true, false) => IngestStatus::Created,
            };
            Ok(IngestOutput {
                feed_id: outcome.record().id,
                fingerprint,
                status,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use neofeed_core::traits::FeedStore;
    use neofeed_core::{Enrichment, FetchError, SummarizeError};
    use neofeed_durable::RunOutcome;
    use serde_json::json;

    fn request(user_id: Uuid, url: &str) -> serde_json::Value {
        serde_json::to_value(FeedProcessRequest::capture(user_id, CaptureInput::url(url))).unwrap()
    }

    fn output(outcome: RunOutcome) -> IngestOutput {
        match outcome {
            RunOutcome::Completed { output } => serde_json::from_value(output).unwrap(),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_capture_creates_enriched_record() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.fetcher
            .set_page(
                "https://a.example/x",
                FetchedContent::text("Rust ownership explained in depth").with_title("Ownership"),
            )
            .await;

        let execution = h
            .executor
            .execute(FeedIngestWorkflow::NAME, request(user_id, "https://a.example/x"))
            .await
            .unwrap();
        let out = output(execution.outcome);

        assert_eq!(out.status, IngestStatus::Created);
        let record = h.feeds.get_feed(out.feed_id).await.unwrap().unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.url.as_deref(), Some("https://a.example/x"));
        assert_eq!(record.enrichment, Enrichment::Enriched);
        assert_eq!(record.fingerprint, out.fingerprint);
    }

    #[tokio::test]
    async fn test_text_capture_skips_fetcher() {
        let h = Harness::new().await;
        let payload = serde_json::to_value(FeedProcessRequest::capture(
            Uuid::now_v7(),
            CaptureInput::text("a thought worth keeping"),
        ))
        .unwrap();

        let out = output(
            h.executor
                .execute(FeedIngestWorkflow::NAME, payload)
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(out.status, IngestStatus::Created);
        let record = h.feeds.get_feed(out.feed_id).await.unwrap().unwrap();
        assert!(record.url.is_none());
        assert_eq!(record.content_raw, "a thought worth keeping");
    }

    #[tokio::test]
    async fn test_permanent_fetch_failure_fails_without_retry() {
        let h = Harness::new().await;
        h.fetcher
            .set_error("https://a.example/gone", FetchError::from_status(404, "https://a.example/gone"))
            .await;

        let execution = h
            .executor
            .execute(FeedIngestWorkflow::NAME, request(Uuid::now_v7(), "https://a.example/gone"))
            .await
            .unwrap();

        assert!(matches!(execution.outcome, RunOutcome::Failed { .. }));
        assert_eq!(h.fetcher.calls("https://a.example/gone").await, 1);
        assert_eq!(h.summarizer.calls().await, 0);
        assert_eq!(h.feeds.count().await, 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_is_retried() {
        let h = Harness::new().await;
        let url = "https://a.example/flaky";
        h.fetcher.set_page(url, FetchedContent::text("eventually here")).await;
        h.fetcher
            .fail_next(url, FetchError::transient("HTTP 503"), 2)
            .await;

        h.router_emit_capture(Uuid::now_v7(), url).await;
        h.executor.run_until_idle().await.unwrap();

        assert_eq!(h.fetcher.calls(url).await, 3);
        assert_eq!(h.feeds.count().await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_summarizer_degrades_to_raw_record() {
        let h = Harness::new().await;
        h.fetcher
            .set_page("https://a.example/x", FetchedContent::text("body").with_title("Page title"))
            .await;
        h.summarizer
            .fail_always(SummarizeError::Unavailable("HTTP 503".to_string()))
            .await;

        h.router_emit_capture(Uuid::now_v7(), "https://a.example/x").await;
        h.executor.run_until_idle().await.unwrap();

        let runs = h.finished_outputs(FeedIngestWorkflow::NAME).await;
        assert_eq!(runs.len(), 1);
        let out: IngestOutput = serde_json::from_value(runs[0].clone()).unwrap();
        assert_eq!(out.status, IngestStatus::Degraded);

        let record = h.feeds.get_feed(out.feed_id).await.unwrap().unwrap();
        assert_eq!(record.enrichment, Enrichment::Raw);
        assert_eq!(record.title, "Page title");
        assert!(record.summary.is_empty());
        assert_eq!(h.summarizer.calls().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_content_reuses_record() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        h.fetcher
            .set_page("https://a.example/x", FetchedContent::text("same body"))
            .await;
        h.fetcher
            .set_page("https://mirror.example/x", FetchedContent::text("same body"))
            .await;

        let first = output(
            h.executor
                .execute(FeedIngestWorkflow::NAME, request(user_id, "https://a.example/x"))
                .await
                .unwrap()
                .outcome,
        );
        let second = output(
            h.executor
                .execute(FeedIngestWorkflow::NAME, request(user_id, "https://mirror.example/x"))
                .await
                .unwrap()
                .outcome,
        );

        assert_eq!(second.status, IngestStatus::Duplicate);
        assert_eq!(second.feed_id, first.feed_id);
        assert_eq!(h.feeds.count().await, 1);
        assert_eq!(h.summarizer.calls().await, 1);
    }

    #[tokio::test]
    async fn test_user_ai_config_reaches_summarizer() {
        let h = Harness::new().await;
        let user_id = Uuid::now_v7();
        let config = neofeed_core::AiConfig {
            model: Some("custom-model".to_string()),
            ..Default::default()
        };
        h.users
            .upsert(neofeed_core::UserProfile::new(user_id).with_ai_config(config.clone()))
            .await;

        h.executor
            .execute(
                FeedIngestWorkflow::NAME,
                json!({
                    "user_id": user_id,
                    "capture": {"type": "text", "text": "hello"},
                    "source": "capture"
                }),
            )
            .await
            .unwrap();

        assert_eq!(h.summarizer.configs().await, vec![Some(config)]);
    }
}
