// Collaborator traits for pluggable backends
//
// The workflows only see these traits:
// - In-memory implementations for tests and local runs (memory.rs)
// - PostgreSQL implementations for production (neofeed-storage)
// - HTTP implementations of the external collaborators (neofeed-worker)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::content::{AiConfig, FetchedContent, Summary};
use crate::error::{DeliveryError, FetchError, Result, SummarizeError};
use crate::feed::{DateRange, FeedRecord, NewFeed, UpsertOutcome};
use crate::report::{RenderedReport, WeeklyReport};
use crate::subscription::{FeedItem, SubscriptionState};
use crate::user::{NotificationChannel, ReportTarget, UserProfile};

// ============================================================================
// External collaborators
// ============================================================================

/// Fetches a URL and extracts readable content
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedContent, FetchError>;
}

/// Reads a subscription source (RSS/Atom) into candidate items, newest first
#[async_trait]
pub trait FeedReader: Send + Sync {
    async fn read_feed(&self, source_url: &str) -> std::result::Result<Vec<FeedItem>, FetchError>;
}

/// Produces title, summary, category and tags for raw content
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        raw_content: &str,
        config: Option<&AiConfig>,
    ) -> std::result::Result<Summary, SummarizeError>;

    /// Write a short narrative of a user's week from its items, newest first
    async fn narrate_week(
        &self,
        items: &[FeedRecord],
        config: Option<&AiConfig>,
    ) -> std::result::Result<String, SummarizeError>;
}

/// Delivers a rendered report.
///
/// `idempotency_key` is stable across retries of the same delivery step;
/// implementations pass it on so a retried send is not delivered twice.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn deliver(
        &self,
        user_id: Uuid,
        channel: &NotificationChannel,
        report: &RenderedReport,
        idempotency_key: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

// ============================================================================
// FeedStore
// ============================================================================

/// Storage for FeedRecords
#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert a record unless one exists for `(user_id, fingerprint)`.
    ///
    /// Concurrent callers racing on the same key get one `Created` and the
    /// rest `Existing` with the winner's record.
    async fn upsert_feed(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        feed: NewFeed,
    ) -> Result<UpsertOutcome>;

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<FeedRecord>>;

    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<FeedRecord>>;

    /// Records created within `range`, oldest first
    async fn query_feeds(&self, user_id: Uuid, range: DateRange) -> Result<Vec<FeedRecord>>;
}

// ============================================================================
// SubscriptionStore
// ============================================================================

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn read_subscription(&self, subscription_id: Uuid) -> Result<Option<SubscriptionState>>;

    /// Insert or replace by subscription id
    async fn write_subscription(&self, state: &SubscriptionState) -> Result<()>;

    async fn list_active_subscriptions(&self) -> Result<Vec<SubscriptionState>>;

    /// Delete inactive subscriptions deactivated before `cutoff`
    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// Trim every watermark to `capacity`. Returns how many were trimmed.
    async fn trim_watermarks(&self, capacity: usize) -> Result<u64>;
}

// ============================================================================
// UserDirectory
// ============================================================================

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Users with weekly reports enabled and a notification channel
    async fn list_report_targets(&self) -> Result<Vec<ReportTarget>>;
}

// ============================================================================
// ReportStore
// ============================================================================

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Upsert by `(user_id, week_start)` and keep only the newest
    /// [`REPORTS_KEPT_PER_USER`](crate::report::REPORTS_KEPT_PER_USER) per user
    async fn save_report(&self, report: WeeklyReport) -> Result<WeeklyReport>;

    /// Newest first
    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<WeeklyReport>>;
}
