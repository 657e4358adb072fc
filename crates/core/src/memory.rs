// In-memory implementations for local runs and testing
//
// The stores are complete implementations of the storage traits and back
// the worker binary when no DATABASE_URL is set. The Static* collaborators
// are scripted stand-ins for the HTTP fetcher, feed reader, summarizer and
// notifier.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::content::{estimate_reading_time, truncate_chars, AiConfig, FetchedContent, Summary};
use crate::error::{DeliveryError, FetchError, Result, SummarizeError};
use crate::feed::{Category, DateRange, FeedRecord, NewFeed, UpsertOutcome};
use crate::report::{RenderedReport, WeeklyReport, REPORTS_KEPT_PER_USER};
use crate::subscription::{FeedItem, SubscriptionState};
use crate::traits::{
    ContentFetcher, FeedReader, FeedStore, NotificationSender, ReportStore, Summarizer,
    SubscriptionStore, UserDirectory,
};
use crate::user::{NotificationChannel, ReportTarget, UserProfile};

// ============================================================================
// InMemoryFeedStore
// ============================================================================

/// FeedRecords keyed by id, with a `(user_id, fingerprint)` unique index
#[derive(Debug, Default, Clone)]
pub struct InMemoryFeedStore {
    inner: Arc<RwLock<FeedTables>>,
}

#[derive(Debug, Default)]
struct FeedTables {
    records: HashMap<Uuid, FeedRecord>,
    by_fingerprint: HashMap<(Uuid, String), Uuid>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is (useful for seeding report tests)
    pub async fn seed(&self, record: FeedRecord) {
        let mut tables = self.inner.write().await;
        tables
            .by_fingerprint
            .insert((record.user_id, record.fingerprint.clone()), record.id);
        tables.records.insert(record.id, record);
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn all_for_user(&self, user_id: Uuid) -> Vec<FeedRecord> {
        let mut records: Vec<_> = self
            .inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl FeedStore for InMemoryFeedStore {
    async fn upsert_feed(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        feed: NewFeed,
    ) -> Result<UpsertOutcome> {
        let mut tables = self.inner.write().await;
        let key = (user_id, fingerprint.to_string());
        if let Some(existing) = tables
            .by_fingerprint
            .get(&key)
            .and_then(|id| tables.records.get(id))
        {
            return Ok(UpsertOutcome::Existing(existing.clone()));
        }

        let record = feed.into_record(Uuid::now_v7(), user_id, fingerprint.to_string());
        tables.by_fingerprint.insert(key, record.id);
        tables.records.insert(record.id, record.clone());
        Ok(UpsertOutcome::Created(record))
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<FeedRecord>> {
        let tables = self.inner.read().await;
        Ok(tables
            .by_fingerprint
            .get(&(user_id, fingerprint.to_string()))
            .and_then(|id| tables.records.get(id))
            .cloned())
    }

    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<FeedRecord>> {
        Ok(self.inner.read().await.records.get(&feed_id).cloned())
    }

    async fn query_feeds(&self, user_id: Uuid, range: DateRange) -> Result<Vec<FeedRecord>> {
        let mut records: Vec<_> = self
            .inner
            .read()
            .await
            .records
            .values()
            .filter(|r| r.user_id == user_id && range.contains(r.created_at))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

// ============================================================================
// InMemorySubscriptionStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<Uuid, SubscriptionState>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn read_subscription(&self, subscription_id: Uuid) -> Result<Option<SubscriptionState>> {
        Ok(self.subscriptions.read().await.get(&subscription_id).cloned())
    }

    async fn write_subscription(&self, state: &SubscriptionState) -> Result<()> {
        self.subscriptions
            .write()
            .await
            .insert(state.subscription_id, state.clone());
        Ok(())
    }

    async fn list_active_subscriptions(&self) -> Result<Vec<SubscriptionState>> {
        let mut active: Vec<_> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect();
        active.sort_by_key(|s| s.created_at);
        Ok(active)
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|_, s| s.active || s.deactivated_at.map_or(false, |at| at >= cutoff));
        Ok((before - subscriptions.len()) as u64)
    }

    async fn trim_watermarks(&self, capacity: usize) -> Result<u64> {
        let mut trimmed = 0;
        for state in self.subscriptions.write().await.values_mut() {
            if state.last_seen_item_ids.trim(capacity) > 0 {
                trimmed += 1;
            }
        }
        Ok(trimmed)
    }
}

// ============================================================================
// InMemoryUserDirectory
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<Uuid, UserProfile>>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: UserProfile) {
        self.users.write().await.insert(profile.id, profile);
    }

    pub async fn remove(&self, user_id: Uuid) {
        self.users.write().await.remove(&user_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn list_report_targets(&self) -> Result<Vec<ReportTarget>> {
        let mut targets: Vec<_> = self
            .users
            .read()
            .await
            .values()
            .filter_map(UserProfile::report_target)
            .collect();
        targets.sort_by_key(|t| t.user_id);
        Ok(targets)
    }
}

// ============================================================================
// InMemoryReportStore
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct InMemoryReportStore {
    reports: Arc<RwLock<HashMap<Uuid, Vec<WeeklyReport>>>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save_report(&self, report: WeeklyReport) -> Result<WeeklyReport> {
        let mut reports = self.reports.write().await;
        let user_reports = reports.entry(report.user_id).or_default();

        let stored = match user_reports
            .iter_mut()
            .find(|r| r.week_start == report.week_start)
        {
            Some(existing) => {
                // Keep the original id so links to it stay valid
                let id = existing.id;
                *existing = WeeklyReport { id, ..report };
                existing.clone()
            }
            None => {
                user_reports.push(report.clone());
                report
            }
        };

        user_reports.sort_by(|a, b| b.week_start.cmp(&a.week_start));
        user_reports.truncate(REPORTS_KEPT_PER_USER);
        Ok(stored)
    }

    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<WeeklyReport>> {
        Ok(self
            .reports
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// StaticContentFetcher
// ============================================================================

/// Serves registered pages. Queued responses for a URL are used before its
/// standing response; unknown URLs are a permanent 404.
#[derive(Debug, Default, Clone)]
pub struct StaticContentFetcher {
    inner: Arc<Mutex<Scripted<FetchedContent, FetchError>>>,
}

impl StaticContentFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_page(&self, url: &str, content: FetchedContent) {
        self.inner.lock().await.set(url, Ok(content));
    }

    pub async fn set_error(&self, url: &str, error: FetchError) {
        self.inner.lock().await.set(url, Err(error));
    }

    /// Fail the next `times` fetches of `url` before the standing response
    pub async fn fail_next(&self, url: &str, error: FetchError, times: usize) {
        self.inner.lock().await.queue(url, Err(error), times);
    }

    pub async fn calls(&self, url: &str) -> usize {
        self.inner.lock().await.calls(url)
    }
}

#[async_trait]
impl ContentFetcher for StaticContentFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedContent, FetchError> {
        self.inner
            .lock()
            .await
            .next(url)
            .unwrap_or_else(|| Err(FetchError::permanent(format!("{url} returned HTTP 404"))))
    }
}

// ============================================================================
// StaticFeedReader
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct StaticFeedReader {
    inner: Arc<Mutex<Scripted<Vec<FeedItem>, FetchError>>>,
}

impl StaticFeedReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_items(&self, source_url: &str, items: Vec<FeedItem>) {
        self.inner.lock().await.set(source_url, Ok(items));
    }

    pub async fn set_error(&self, source_url: &str, error: FetchError) {
        self.inner.lock().await.set(source_url, Err(error));
    }

    pub async fn calls(&self, source_url: &str) -> usize {
        self.inner.lock().await.calls(source_url)
    }
}

#[async_trait]
impl FeedReader for StaticFeedReader {
    async fn read_feed(&self, source_url: &str) -> std::result::Result<Vec<FeedItem>, FetchError> {
        self.inner.lock().await.next(source_url).unwrap_or_else(|| {
            Err(FetchError::permanent(format!(
                "{source_url} returned HTTP 404"
            )))
        })
    }
}

// ============================================================================
// StaticSummarizer
// ============================================================================

/// Extractive summarizer: first line as title, leading text as summary.
/// Failures can be queued to exercise retry and degradation.
#[derive(Debug, Default, Clone)]
pub struct StaticSummarizer {
    inner: Arc<Mutex<SummarizerScript>>,
}

#[derive(Debug, Default)]
struct SummarizerScript {
    failures: VecDeque<SummarizeError>,
    always: Option<SummarizeError>,
    category: Option<Category>,
    tags: Vec<String>,
    calls: usize,
    configs: Vec<Option<AiConfig>>,
    narration_failure: Option<SummarizeError>,
    narrations: Vec<Option<AiConfig>>,
}

impl StaticSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_labels(self, category: Category, tags: &[&str]) -> Self {
        {
            let mut script = self.inner.lock().await;
            script.category = Some(category);
            script.tags = tags.iter().map(|t| t.to_string()).collect();
        }
        self
    }

    pub async fn fail_next(&self, error: SummarizeError, times: usize) {
        let mut script = self.inner.lock().await;
        script.failures.extend(std::iter::repeat(error).take(times));
    }

    pub async fn fail_always(&self, error: SummarizeError) {
        self.inner.lock().await.always = Some(error);
    }

    pub async fn calls(&self) -> usize {
        self.inner.lock().await.calls
    }

    /// AI configs seen by each call, in order
    pub async fn configs(&self) -> Vec<Option<AiConfig>> {
        self.inner.lock().await.configs.clone()
    }

    /// Every weekly narration fails with `error`
    pub async fn fail_narration(&self, error: SummarizeError) {
        self.inner.lock().await.narration_failure = Some(error);
    }

    /// AI configs seen by each weekly narration, in order
    pub async fn narrations(&self) -> Vec<Option<AiConfig>> {
        self.inner.lock().await.narrations.clone()
    }
}

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(
        &self,
        raw_content: &str,
        config: Option<&AiConfig>,
    ) -> std::result::Result<Summary, SummarizeError> {
        let mut script = self.inner.lock().await;
        script.calls += 1;
        script.configs.push(config.cloned());

        if let Some(error) = script.failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &script.always {
            return Err(error.clone());
        }

        let title = FetchedContent::text(raw_content).fallback_title();
        Ok(Summary {
            title,
            summary: truncate_chars(raw_content.trim(), 200),
            takeaways: Vec::new(),
            category: script.category.unwrap_or(Category::Other),
            tags: script.tags.clone(),
            reading_time_minutes: Some(estimate_reading_time(raw_content)),
        })
    }

    async fn narrate_week(
        &self,
        items: &[FeedRecord],
        config: Option<&AiConfig>,
    ) -> std::result::Result<String, SummarizeError> {
        let mut script = self.inner.lock().await;
        script.narrations.push(config.cloned());
        if let Some(error) = &script.narration_failure {
            return Err(error.clone());
        }

        let titles: Vec<&str> = items.iter().map(|r| r.title.as_str()).collect();
        Ok(format!(
            "You saved {} items this week: {}.",
            items.len(),
            titles.join(", ")
        ))
    }
}

// ============================================================================
// RecordingNotificationSender
// ============================================================================

/// A delivered report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub subject: String,
    pub idempotency_key: String,
}

/// Records deliveries. Repeated idempotency keys are accepted but not
/// recorded twice, like a provider honouring an idempotency header.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotificationSender {
    inner: Arc<Mutex<SenderScript>>,
}

#[derive(Debug, Default)]
struct SenderScript {
    deliveries: Vec<Delivery>,
    seen_keys: HashSet<String>,
    failures: VecDeque<DeliveryError>,
    attempts: usize,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next(&self, error: DeliveryError, times: usize) {
        let mut script = self.inner.lock().await;
        script.failures.extend(std::iter::repeat(error).take(times));
    }

    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.inner.lock().await.deliveries.clone()
    }

    pub async fn attempts(&self) -> usize {
        self.inner.lock().await.attempts
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn deliver(
        &self,
        user_id: Uuid,
        channel: &NotificationChannel,
        report: &RenderedReport,
        idempotency_key: &str,
    ) -> std::result::Result<(), DeliveryError> {
        let mut script = self.inner.lock().await;
        script.attempts += 1;
        if let Some(error) = script.failures.pop_front() {
            return Err(error);
        }
        if script.seen_keys.insert(idempotency_key.to_string()) {
            script.deliveries.push(Delivery {
                user_id,
                channel: channel.clone(),
                subject: report.subject.clone(),
                idempotency_key: idempotency_key.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Scripted responses
// ============================================================================

#[derive(Debug)]
struct Scripted<T, E> {
    standing: HashMap<String, std::result::Result<T, E>>,
    queued: HashMap<String, VecDeque<std::result::Result<T, E>>>,
    calls: HashMap<String, usize>,
}

impl<T, E> Default for Scripted<T, E> {
    fn default() -> Self {
        Self {
            standing: HashMap::new(),
            queued: HashMap::new(),
            calls: HashMap::new(),
        }
    }
}

impl<T: Clone, E: Clone> Scripted<T, E> {
    fn set(&mut self, key: &str, response: std::result::Result<T, E>) {
        self.standing.insert(key.to_string(), response);
    }

    fn queue(&mut self, key: &str, response: std::result::Result<T, E>, times: usize) {
        self.queued
            .entry(key.to_string())
            .or_default()
            .extend(std::iter::repeat(response).take(times));
    }

    fn calls(&self, key: &str) -> usize {
        self.calls.get(key).copied().unwrap_or(0)
    }

    fn next(&mut self, key: &str) -> Option<std::result::Result<T, E>> {
        *self.calls.entry(key.to_string()).or_default() += 1;
        self.queued
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.standing.get(key).cloned())
    }
}
