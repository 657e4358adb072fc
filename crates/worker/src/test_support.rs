// Shared fixtures for unit tests

use std::sync::Arc;

use neofeed_core::memory::{
    InMemoryFeedStore, InMemoryReportStore, InMemorySubscriptionStore, InMemoryUserDirectory,
    RecordingNotificationSender, StaticContentFetcher, StaticFeedReader, StaticSummarizer,
};
use neofeed_core::{CaptureInput, FeedItem};
use neofeed_durable::{
    Event, EventRouter, EventSink, InMemoryRunStore, RetryPolicy, RunFilter, RunStatus, RunStore,
    WorkflowExecutor,
};
use serde_json::Value;
use uuid::Uuid;

use crate::events::{FeedProcessRequest, FEED_PROCESS};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::workflows::PipelineDeps;

/// An in-memory pipeline with scripted collaborators. Retries are
/// immediate so `run_until_idle` drains them.
pub struct Harness {
    pub executor: Arc<WorkflowExecutor>,
    pub router: Arc<EventRouter>,
    pub store: Arc<dyn RunStore>,
    pub fetcher: StaticContentFetcher,
    pub reader: StaticFeedReader,
    pub summarizer: StaticSummarizer,
    pub notifier: RecordingNotificationSender,
    pub feeds: InMemoryFeedStore,
    pub subscriptions: InMemorySubscriptionStore,
    pub users: InMemoryUserDirectory,
    pub reports: InMemoryReportStore,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(PipelineSettings {
            worker_id: "test-worker".to_string(),
            retry_override: Some(RetryPolicy::immediate(3)),
            ..Default::default()
        })
        .await
    }

    pub async fn with_capacity(watermark_capacity: usize) -> Self {
        Self::with_settings(PipelineSettings {
            worker_id: "test-worker".to_string(),
            watermark_capacity,
            retry_override: Some(RetryPolicy::immediate(3)),
            ..Default::default()
        })
        .await
    }

    async fn with_settings(settings: PipelineSettings) -> Self {
        let fetcher = StaticContentFetcher::new();
        let reader = StaticFeedReader::new();
        let summarizer = StaticSummarizer::new();
        let notifier = RecordingNotificationSender::new();
        let feeds = InMemoryFeedStore::new();
        let subscriptions = InMemorySubscriptionStore::new();
        let users = InMemoryUserDirectory::new();
        let reports = InMemoryReportStore::new();

        let deps = PipelineDeps {
            fetcher: Arc::new(fetcher.clone()),
            feed_reader: Arc::new(reader.clone()),
            summarizer: Arc::new(summarizer.clone()),
            notifier: Arc::new(notifier.clone()),
            feeds: Arc::new(feeds.clone()),
            subscriptions: Arc::new(subscriptions.clone()),
            users: Arc::new(users.clone()),
            reports: Arc::new(reports.clone()),
        };
        let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
        let pipeline = Pipeline::build(store, deps, &settings).expect("pipeline wiring");

        Self {
            executor: pipeline.executor,
            router: pipeline.router,
            store: pipeline.store,
            fetcher,
            reader,
            summarizer,
            notifier,
            feeds,
            subscriptions,
            users,
            reports,
        }
    }

    /// Emit `feed.process` for a URL capture through the router
    pub async fn router_emit_capture(&self, user_id: Uuid, url: &str) {
        let request = FeedProcessRequest::capture(user_id, CaptureInput::url(url));
        let event = Event::from_data(FEED_PROCESS, &request).expect("capture payload");
        self.router.emit(event).await.expect("emit capture");
    }

    /// Outputs of the completed runs of `workflow`
    pub async fn finished_outputs(&self, workflow: &str) -> Vec<Value> {
        self.executor
            .list_runs(
                &RunFilter::default()
                    .workflow(workflow)
                    .status(RunStatus::Completed),
            )
            .await
            .expect("list runs")
            .into_iter()
            .filter_map(|run| run.output)
            .collect()
    }
}

/// Dependencies backed by fresh doubles
pub fn deps() -> PipelineDeps {
    PipelineDeps {
        fetcher: Arc::new(StaticContentFetcher::new()),
        feed_reader: Arc::new(StaticFeedReader::new()),
        summarizer: Arc::new(StaticSummarizer::new()),
        notifier: Arc::new(RecordingNotificationSender::new()),
        feeds: Arc::new(InMemoryFeedStore::new()),
        subscriptions: Arc::new(InMemorySubscriptionStore::new()),
        users: Arc::new(InMemoryUserDirectory::new()),
        reports: Arc::new(InMemoryReportStore::new()),
    }
}

pub fn item(id: &str, link: &str) -> FeedItem {
    FeedItem {
        id: id.to_string(),
        title: Some(format!("Item {id}")),
        link: Some(link.to_string()),
        summary: None,
        published_at: None,
    }
}
