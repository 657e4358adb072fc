// Subscription discovery state
//
// SubscriptionState is written only by the discovery workflows, one
// subscription per run, so updates are never contended.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::fingerprint::sha256_hex;

/// Default number of item ids remembered per subscription
pub const DEFAULT_WATERMARK_CAPACITY: usize = 500;

/// Newest items considered per poll
pub const MAX_ITEMS_PER_POLL: usize = 20;

/// How often a subscription is polled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PollFrequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl PollFrequency {
    pub fn interval(&self) -> chrono::Duration {
        match self {
            PollFrequency::Hourly => chrono::Duration::hours(1),
            PollFrequency::Daily => chrono::Duration::days(1),
            PollFrequency::Weekly => chrono::Duration::weeks(1),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PollFrequency::Hourly => "hourly",
            PollFrequency::Daily => "daily",
            PollFrequency::Weekly => "weekly",
        }
    }
}

impl fmt::Display for PollFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(PollFrequency::Hourly),
            "daily" => Ok(PollFrequency::Daily),
            "weekly" => Ok(PollFrequency::Weekly),
            other => Err(format!("unknown poll frequency: {other}")),
        }
    }
}

/// Rolling set of seen item ids, oldest first.
///
/// Insertion order is kept so eviction drops the oldest ids first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark {
    ids: VecDeque<String>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|seen| seen == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    /// Append ids not already present, then evict down to `capacity`
    pub fn record(&mut self, ids: impl IntoIterator<Item = String>, capacity: usize) {
        for id in ids {
            if !self.contains(&id) {
                self.ids.push_back(id);
            }
        }
        self.trim(capacity);
    }

    /// Evict oldest ids until at most `capacity` remain. Returns how many went.
    pub fn trim(&mut self, capacity: usize) -> usize {
        let excess = self.ids.len().saturating_sub(capacity);
        self.ids.drain(..excess);
        excess
    }
}

/// Per-subscription discovery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct SubscriptionState {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub source_url: String,
    pub title: Option<String>,
    pub active: bool,
    pub poll_frequency: PollFrequency,
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<String>))]
    pub last_seen_item_ids: Watermark,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Set when the subscription stops being active
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionState {
    pub fn new(user_id: Uuid, source_url: impl Into<String>) -> Self {
        Self {
            subscription_id: Uuid::now_v7(),
            user_id,
            source_url: source_url.into(),
            title: None,
            active: true,
            poll_frequency: PollFrequency::default(),
            last_seen_item_ids: Watermark::new(),
            last_polled_at: None,
            last_error: None,
            consecutive_failures: 0,
            deactivated_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_frequency(mut self, frequency: PollFrequency) -> Self {
        self.poll_frequency = frequency;
        self
    }

    /// Active and not polled within its frequency
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self
                .last_polled_at
                .map_or(true, |at| at + self.poll_frequency.interval() <= now)
    }

    /// Items from `candidates` whose ids are not in the watermark
    pub fn unseen<'a>(&self, candidates: &'a [FeedItem]) -> Vec<&'a FeedItem> {
        candidates
            .iter()
            .filter(|item| !self.last_seen_item_ids.contains(&item.id))
            .collect()
    }

    /// Advance the watermark after a successful poll
    pub fn record_poll(
        &mut self,
        ids: impl IntoIterator<Item = String>,
        capacity: usize,
        polled_at: DateTime<Utc>,
    ) {
        self.last_seen_item_ids.record(ids, capacity);
        self.last_polled_at = Some(polled_at);
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    /// Note a failed poll. Watermark and `last_polled_at` stay unchanged so
    /// the same items are reconsidered next tick.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.consecutive_failures += 1;
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.active = false;
        self.deactivated_at.get_or_insert(at);
    }
}

/// One entry parsed from a subscription source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable identifier, see [`FeedItem::stable_id`]
    pub id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

impl FeedItem {
    /// Entry id if present, else the link, else a hash of the title
    pub fn stable_id(guid: Option<&str>, link: Option<&str>, title: Option<&str>) -> Option<String> {
        let non_empty = |s: &&str| !s.trim().is_empty();
        guid.filter(non_empty)
            .or(link.filter(non_empty))
            .map(|s| s.trim().to_string())
            .or_else(|| {
                title
                    .filter(non_empty)
                    .map(|t| format!("title:{}", sha256_hex(t.trim())))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: std::ops::Range<usize>) -> Vec<String> {
        n.map(|i| format!("i{i}")).collect()
    }

    #[test]
    fn test_watermark_never_exceeds_capacity() {
        let mut wm = Watermark::new();
        for batch in 0..10 {
            wm.record(ids(batch * 7..batch * 7 + 7), 20);
            assert!(wm.len() <= 20);
        }
        assert_eq!(wm.len(), 20);
        // Oldest evicted first
        assert!(!wm.contains("i0"));
        assert!(wm.contains("i69"));
        assert!(wm.contains("i50"));
        assert!(!wm.contains("i49"));
    }

    #[test]
    fn test_watermark_record_skips_known_ids() {
        let mut wm = Watermark::from_ids(ids(0..2));
        wm.record(vec!["i1".to_string(), "i2".to_string()], 10);
        assert_eq!(wm.iter().cloned().collect::<Vec<_>>(), ids(0..3));
    }

    #[test]
    fn test_watermark_trim_reports_evictions() {
        let mut wm = Watermark::from_ids(ids(0..8));
        assert_eq!(wm.trim(5), 3);
        assert_eq!(wm.trim(5), 0);
        assert_eq!(wm.len(), 5);
    }

    #[test]
    fn test_is_due_by_frequency() {
        let now = Utc::now();
        let mut sub = SubscriptionState::new(Uuid::now_v7(), "https://blog.example/rss")
            .with_frequency(PollFrequency::Hourly);
        assert!(sub.is_due(now));

        sub.last_polled_at = Some(now - chrono::Duration::minutes(30));
        assert!(!sub.is_due(now));

        sub.last_polled_at = Some(now - chrono::Duration::minutes(61));
        assert!(sub.is_due(now));

        sub.deactivate(now);
        assert!(!sub.is_due(now));
    }

    #[test]
    fn test_unseen_filters_watermark() {
        let mut sub = SubscriptionState::new(Uuid::now_v7(), "https://blog.example/rss");
        sub.record_poll(vec!["i1".to_string()], 500, Utc::now());

        let item = |id: &str| FeedItem {
            id: id.to_string(),
            title: None,
            link: None,
            summary: None,
            published_at: None,
        };
        let candidates = vec![item("i1"), item("i2")];
        let unseen = sub.unseen(&candidates);
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].id, "i2");
    }

    #[test]
    fn test_failure_keeps_watermark_and_poll_time() {
        let polled = Utc::now() - chrono::Duration::days(2);
        let mut sub = SubscriptionState::new(Uuid::now_v7(), "https://blog.example/rss");
        sub.record_poll(vec!["i1".to_string()], 500, polled);

        sub.record_failure("HTTP 503");
        sub.record_failure("HTTP 503");

        assert_eq!(sub.consecutive_failures, 2);
        assert_eq!(sub.last_polled_at, Some(polled));
        assert_eq!(sub.last_seen_item_ids.len(), 1);

        sub.record_poll(Vec::new(), 500, Utc::now());
        assert_eq!(sub.consecutive_failures, 0);
        assert!(sub.last_error.is_none());
    }

    #[test]
    fn test_stable_id_fallbacks() {
        assert_eq!(
            FeedItem::stable_id(Some("guid-1"), Some("https://x"), Some("T")),
            Some("guid-1".to_string())
        );
        assert_eq!(
            FeedItem::stable_id(Some(" "), Some("https://x"), Some("T")),
            Some("https://x".to_string())
        );
        let by_title = FeedItem::stable_id(None, None, Some("Title")).unwrap();
        assert!(by_title.starts_with("title:"));
        assert_eq!(FeedItem::stable_id(None, None, Some("Title")), Some(by_title));
        assert_eq!(FeedItem::stable_id(None, None, None), None);
    }
}
