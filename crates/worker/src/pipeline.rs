// Pipeline wiring
//
// Registers the six workflows, their event triggers and their cron
// triggers on one executor/router pair. The binary and the test harnesses
// both build through here so they run the same wiring.

use std::sync::Arc;
use std::time::Duration;

use neofeed_core::subscription::DEFAULT_WATERMARK_CAPACITY;
use neofeed_durable::{
    EventRouter, ExecutorConfig, RetryPolicy, RouterError, RunStore, Trigger, Workflow,
    WorkflowExecutor, WorkflowRegistry,
};
use tracing::info;

use crate::config::{DEFAULT_DISCOVERY_CLEANUP_CRON, DEFAULT_DISCOVERY_CRON, DEFAULT_WEEKLY_REPORT_CRON};
use crate::events::{FEED_PROCESS, REPORT_GENERATE, SUBSCRIPTION_POLL};
use crate::workflows::{
    DiscoveryCleanupWorkflow, DiscoveryTickWorkflow, FeedIngestWorkflow, PipelineDeps,
    SubscriptionPollWorkflow, WeeklyReportWorkflow, WeeklySchedulerWorkflow,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub worker_id: String,
    pub discovery_cron: String,
    pub discovery_cleanup_cron: String,
    pub weekly_report_cron: String,
    pub watermark_capacity: usize,
    pub retention: Duration,
    pub dedupe_window: Duration,
    /// Replaces every workflow's own retry policy when set
    pub retry_override: Option<RetryPolicy>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_id: format!("neofeed-worker-{}", std::process::id()),
            discovery_cron: DEFAULT_DISCOVERY_CRON.to_string(),
            discovery_cleanup_cron: DEFAULT_DISCOVERY_CLEANUP_CRON.to_string(),
            weekly_report_cron: DEFAULT_WEEKLY_REPORT_CRON.to_string(),
            watermark_capacity: DEFAULT_WATERMARK_CAPACITY,
            retention: Duration::from_secs(30 * 24 * 3600),
            dedupe_window: Duration::from_secs(24 * 3600),
            retry_override: None,
        }
    }
}

impl PipelineSettings {
    fn retry_or(&self, own: RetryPolicy) -> RetryPolicy {
        self.retry_override.clone().unwrap_or(own)
    }
}

/// A wired executor and router over one run store
#[derive(Clone)]
pub struct Pipeline {
    pub executor: Arc<WorkflowExecutor>,
    pub router: Arc<EventRouter>,
    pub store: Arc<dyn RunStore>,
}

impl Pipeline {
    pub fn build(
        store: Arc<dyn RunStore>,
        deps: PipelineDeps,
        settings: &PipelineSettings,
    ) -> Result<Self, RouterError> {
        let ingest = FeedIngestWorkflow::new(deps.clone());
        let ingest = ingest.with_retry_policy(settings.retry_or(RetryPolicy::default()));

        let tick = DiscoveryTickWorkflow::new(deps.clone())
            .with_retry_policy(settings.retry_or(RetryPolicy::default()));

        let poll = SubscriptionPollWorkflow::new(deps.clone(), settings.watermark_capacity);
        let poll = match &settings.retry_override {
            Some(retry) => poll.with_retry_policy(retry.clone()),
            None => poll,
        };

        let cleanup = DiscoveryCleanupWorkflow::new(
            deps.clone(),
            store.clone(),
            settings.retention,
            settings.watermark_capacity,
        )
        .with_retry_policy(settings.retry_or(RetryPolicy::default()));

        let scheduler = WeeklySchedulerWorkflow::new(deps.clone())
            .with_retry_policy(settings.retry_or(RetryPolicy::default()));
        let generator = WeeklyReportWorkflow::new(deps)
            .with_retry_policy(settings.retry_or(RetryPolicy::default()));

        let registry = Arc::new(
            WorkflowRegistry::new()
                .with(ingest)
                .with(tick)
                .with(poll)
                .with(cleanup)
                .with(scheduler)
                .with(generator),
        );

        let router = Arc::new(
            EventRouter::new(store.clone(), registry.clone())
                .with_dedupe_window(settings.dedupe_window),
        );
        router.register_trigger(Trigger::event(FEED_PROCESS), FeedIngestWorkflow::NAME)?;
        router.register_trigger(Trigger::event(SUBSCRIPTION_POLL), SubscriptionPollWorkflow::NAME)?;
        router.register_trigger(Trigger::event(REPORT_GENERATE), WeeklyReportWorkflow::NAME)?;
        router.register_trigger(
            Trigger::cron(settings.discovery_cron.as_str()),
            DiscoveryTickWorkflow::NAME,
        )?;
        router.register_trigger(
            Trigger::cron(settings.discovery_cleanup_cron.as_str()),
            DiscoveryCleanupWorkflow::NAME,
        )?;
        router.register_trigger(
            Trigger::cron(settings.weekly_report_cron.as_str()),
            WeeklySchedulerWorkflow::NAME,
        )?;

        let executor = Arc::new(WorkflowExecutor::new(
            store.clone(),
            registry.clone(),
            router.clone(),
            ExecutorConfig::default().with_worker_id(settings.worker_id.as_str()),
        ));

        info!(
            workflows = registry.len(),
            worker_id = %settings.worker_id,
            "pipeline wired"
        );
        Ok(Self {
            executor,
            router,
            store,
        })
    }
}
