// Feed domain types
//
// A FeedRecord is one captured item after ingestion. Records are unique per
// (user_id, fingerprint); the ingestion workflow is the only writer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::content::Summary;

/// Topic category assigned by the summarizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tech,
    Life,
    Idea,
    Art,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Tech,
        Category::Life,
        Category::Idea,
        Category::Art,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Tech => "tech",
            Category::Life => "life",
            Category::Idea => "idea",
            Category::Art => "art",
            Category::Other => "other",
        }
    }

    /// Lenient parse for model output. Anything unrecognised is `Other`.
    pub fn normalize(raw: &str) -> Self {
        raw.parse().unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tech" | "technology" => Ok(Category::Tech),
            "life" | "lifestyle" => Ok(Category::Life),
            "idea" | "ideas" => Ok(Category::Idea),
            "art" | "arts" | "design" => Ok(Category::Art),
            "other" => Ok(Category::Other),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Whether summarization succeeded for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Enrichment {
    /// Summary, category and tags came from the summarizer
    Enriched,
    /// Summarization was exhausted; only raw content is stored
    Raw,
}

/// How a record entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Capture,
    Subscription,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::Capture => "capture",
            FeedSource::Subscription => "subscription",
        }
    }
}

impl FromStr for FeedSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(FeedSource::Capture),
            "subscription" => Ok(FeedSource::Subscription),
            other => Err(format!("unknown feed source: {other}")),
        }
    }
}

/// A stored, possibly summarized capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct FeedRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Absent for text selections
    pub url: Option<String>,
    pub fingerprint: String,
    pub title: String,
    pub content_raw: String,
    pub summary: String,
    #[serde(default)]
    pub takeaways: Vec<String>,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    pub reading_time_minutes: Option<u32>,
    pub enrichment: Enrichment,
    pub source: FeedSource,
    /// Subscription that discovered this item, if any
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a FeedRecord. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFeed {
    pub url: Option<String>,
    pub title: String,
    pub content_raw: String,
    pub summary: String,
    pub takeaways: Vec<String>,
    pub category: Category,
    pub tags: Vec<String>,
    pub reading_time_minutes: Option<u32>,
    pub enrichment: Enrichment,
    pub source: FeedSource,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl NewFeed {
    /// A record with summarizer output
    pub fn enriched(
        url: Option<String>,
        content_raw: String,
        summary: Summary,
        source: FeedSource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url,
            title: summary.title,
            content_raw,
            summary: summary.summary,
            takeaways: summary.takeaways,
            category: summary.category,
            tags: summary.tags,
            reading_time_minutes: summary.reading_time_minutes,
            enrichment: Enrichment::Enriched,
            source,
            subscription_id: None,
            created_at,
        }
    }

    /// A degraded record: raw content, empty summary fields
    pub fn raw(
        url: Option<String>,
        title: String,
        content_raw: String,
        source: FeedSource,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url,
            title,
            content_raw,
            summary: String::new(),
            takeaways: Vec::new(),
            category: Category::Other,
            tags: Vec::new(),
            reading_time_minutes: None,
            enrichment: Enrichment::Raw,
            source,
            subscription_id: None,
            created_at,
        }
    }

    pub fn with_subscription(mut self, subscription_id: Option<Uuid>) -> Self {
        self.subscription_id = subscription_id;
        self
    }

    pub fn into_record(self, id: Uuid, user_id: Uuid, fingerprint: String) -> FeedRecord {
        FeedRecord {
            id,
            user_id,
            url: self.url,
            fingerprint,
            title: self.title,
            content_raw: self.content_raw,
            summary: self.summary,
            takeaways: self.takeaways,
            category: self.category,
            tags: self.tags,
            reading_time_minutes: self.reading_time_minutes,
            enrichment: self.enrichment,
            source: self.source,
            subscription_id: self.subscription_id,
            created_at: self.created_at,
        }
    }
}

/// Result of an idempotent insert keyed by (user_id, fingerprint)
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(FeedRecord),
    /// Another writer got there first; this is their record
    Existing(FeedRecord),
}

impl UpsertOutcome {
    pub fn record(&self) -> &FeedRecord {
        match self {
            UpsertOutcome::Created(r) | UpsertOutcome::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> FeedRecord {
        match self {
            UpsertOutcome::Created(r) | UpsertOutcome::Existing(r) => r,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, UpsertOutcome::Created(_))
    }
}

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}
