// Database models (internal, may differ from domain types)

use chrono::{DateTime, Utc};
use neofeed_core::{
    AiConfig, Category, Digest, Enrichment, FeedRecord, FeedSource, NotificationChannel,
    PollFrequency, ReportPreferences, StorageError, SubscriptionState, UserProfile, Watermark,
    WeeklyReport,
};
use sqlx::FromRow;
use uuid::Uuid;

fn invalid(column: &str, value: &str) -> StorageError {
    StorageError::database(format!("invalid {column} value in database: {value}"))
}

// ============================================
// Feeds
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct FeedRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: Option<String>,
    pub fingerprint: String,
    pub title: String,
    pub content_raw: String,
    pub summary: String,
    pub takeaways: Vec<String>,
    pub category: String,
    pub tags: Vec<String>,
    pub reading_time_minutes: Option<i32>,
    pub enrichment: String,
    pub source: String,
    pub subscription_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<FeedRow> for FeedRecord {
    type Error = StorageError;

    fn try_from(row: FeedRow) -> Result<Self, Self::Error> {
        let enrichment = match row.enrichment.as_str() {
            "enriched" => Enrichment::Enriched,
            "raw" => Enrichment::Raw,
            other => return Err(invalid("enrichment", other)),
        };
        let source: FeedSource = row
            .source
            .parse()
            .map_err(|_| invalid("source", &row.source))?;

        Ok(FeedRecord {
            id: row.id,
            user_id: row.user_id,
            url: row.url,
            fingerprint: row.fingerprint,
            title: row.title,
            content_raw: row.content_raw,
            summary: row.summary,
            takeaways: row.takeaways,
            category: Category::normalize(&row.category),
            tags: row.tags,
            reading_time_minutes: row.reading_time_minutes.map(|m| m.max(0) as u32),
            enrichment,
            source,
            subscription_id: row.subscription_id,
            created_at: row.created_at,
        })
    }
}

pub fn enrichment_str(enrichment: Enrichment) -> &'static str {
    match enrichment {
        Enrichment::Enriched => "enriched",
        Enrichment::Raw => "raw",
    }
}

// ============================================
// Subscriptions
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub source_url: String,
    pub title: Option<String>,
    pub active: bool,
    pub poll_frequency: String,
    pub last_seen_item_ids: sqlx::types::JsonValue,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: i32,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionState {
    type Error = StorageError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let poll_frequency: PollFrequency = row
            .poll_frequency
            .parse()
            .map_err(|_| invalid("poll_frequency", &row.poll_frequency))?;
        let last_seen_item_ids: Watermark = serde_json::from_value(row.last_seen_item_ids)?;

        Ok(SubscriptionState {
            subscription_id: row.subscription_id,
            user_id: row.user_id,
            source_url: row.source_url,
            title: row.title,
            active: row.active,
            poll_frequency,
            last_seen_item_ids,
            last_polled_at: row.last_polled_at,
            last_error: row.last_error,
            consecutive_failures: row.consecutive_failures.max(0) as u32,
            deactivated_at: row.deactivated_at,
            created_at: row.created_at,
        })
    }
}

// ============================================
// User profiles
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct UserProfileRow {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub ai_config: Option<sqlx::types::JsonValue>,
    pub weekly_report_enabled: bool,
    pub notification_channel: Option<sqlx::types::JsonValue>,
}

impl TryFrom<UserProfileRow> for UserProfile {
    type Error = StorageError;

    fn try_from(row: UserProfileRow) -> Result<Self, Self::Error> {
        let ai_config: Option<AiConfig> = row.ai_config.map(serde_json::from_value).transpose()?;
        let channel: Option<NotificationChannel> = row
            .notification_channel
            .map(serde_json::from_value)
            .transpose()?;

        Ok(UserProfile {
            id: row.id,
            display_name: row.display_name,
            ai_config,
            report_preferences: ReportPreferences {
                weekly_report_enabled: row.weekly_report_enabled,
                channel,
            },
        })
    }
}

// ============================================
// Weekly reports
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WeeklyReportRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub digest: sqlx::types::JsonValue,
    pub subject: String,
    pub markdown: String,
    pub html: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WeeklyReportRow> for WeeklyReport {
    type Error = StorageError;

    fn try_from(row: WeeklyReportRow) -> Result<Self, Self::Error> {
        let digest: Digest = serde_json::from_value(row.digest)?;
        Ok(WeeklyReport {
            id: row.id,
            user_id: row.user_id,
            week_start: row.week_start,
            week_end: row.week_end,
            digest,
            subject: row.subject,
            markdown: row.markdown,
            html: row.html,
            created_at: row.created_at,
        })
    }
}
