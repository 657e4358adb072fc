// NeoFeed workflows
//
// Six workflows on the durable engine:
// - FeedIngestWorkflow: feed.process -> fetch, dedupe-check, summarize, persist
// - DiscoveryTickWorkflow: cron -> one subscription.poll per due subscription
// - SubscriptionPollWorkflow: subscription.poll -> read, diff, emit, advance watermark
// - DiscoveryCleanupWorkflow: cron -> retention and watermark maintenance
// - WeeklySchedulerWorkflow: cron -> one report.generate per eligible user
// - WeeklyReportWorkflow: report.generate -> digest, render, save, deliver

use std::sync::Arc;

use neofeed_core::traits::{
    ContentFetcher, FeedReader, FeedStore, NotificationSender, ReportStore, SubscriptionStore,
    Summarizer, UserDirectory,
};

pub mod cleanup;
pub mod discovery;
pub mod ingest;
pub mod weekly;

pub use cleanup::{CleanupReport, DiscoveryCleanupWorkflow};
pub use discovery::{DiscoveryTickWorkflow, PollOutput, SubscriptionPollWorkflow, TickOutput};
pub use ingest::{FeedIngestWorkflow, IngestOutput, IngestStatus};
pub use weekly::{
    ReportOutput, ReportSkipReason, SchedulerOutput, WeeklyReportWorkflow,
    WeeklySchedulerWorkflow,
};

/// Stores and external collaborators shared by the workflows
#[derive(Clone)]
pub struct PipelineDeps {
    pub fetcher: Arc<dyn ContentFetcher>,
    pub feed_reader: Arc<dyn FeedReader>,
    pub summarizer: Arc<dyn Summarizer>,
    pub notifier: Arc<dyn NotificationSender>,
    pub feeds: Arc<dyn FeedStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub reports: Arc<dyn ReportStore>,
}
