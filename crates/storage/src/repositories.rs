// Repository layer for database operations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use neofeed_core::{NewFeed, SubscriptionState, UserProfile, WeeklyReport};
use neofeed_durable::PostgresRunStore;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

const FEED_COLUMNS: &str = "id, user_id, url, fingerprint, title, content_raw, summary, takeaways, \
     category, tags, reading_time_minutes, enrichment, source, subscription_id, created_at";

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, source_url, title, active, \
     poll_frequency, last_seen_item_ids, last_polled_at, last_error, consecutive_failures, \
     deactivated_at, created_at";

const REPORT_COLUMNS: &str =
    "id, user_id, week_start, week_end, digest, subject, markdown, html, created_at";

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the migrations bundled with this crate
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    /// Durable run store sharing this pool
    pub fn run_store(&self) -> PostgresRunStore {
        PostgresRunStore::new(self.pool.clone())
    }

    // ============================================
    // Feeds
    // ============================================

    /// Insert unless `(user_id, fingerprint)` exists. `None` means another
    /// writer holds the key.
    pub async fn insert_feed_if_absent(
        &self,
        id: Uuid,
        user_id: Uuid,
        fingerprint: &str,
        feed: &NewFeed,
    ) -> Result<Option<FeedRow>> {
        let sql = format!(
            r#"
            INSERT INTO feeds
                (id, user_id, url, fingerprint, title, content_raw, summary, takeaways,
                 category, tags, reading_time_minutes, enrichment, source, subscription_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (user_id, fingerprint) DO NOTHING
            RETURNING {FEED_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(&feed.url)
            .bind(fingerprint)
            .bind(&feed.title)
            .bind(&feed.content_raw)
            .bind(&feed.summary)
            .bind(&feed.takeaways)
            .bind(feed.category.as_str())
            .bind(&feed.tags)
            .bind(feed.reading_time_minutes.map(|m| m as i32))
            .bind(enrichment_str(feed.enrichment))
            .bind(feed.source.as_str())
            .bind(feed.subscription_id)
            .bind(feed.created_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn get_feed_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<FeedRow>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE user_id = $1 AND fingerprint = $2");
        let row = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(user_id)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn get_feed(&self, id: Uuid) -> Result<Option<FeedRow>> {
        let sql = format!("SELECT {FEED_COLUMNS} FROM feeds WHERE id = $1");
        let row = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn list_feeds_in_range(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<FeedRow>> {
        let sql = format!(
            r#"
            SELECT {FEED_COLUMNS} FROM feeds
            WHERE user_id = $1 AND created_at >= $2 AND created_at < $3
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query_as::<_, FeedRow>(&sql)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    // ============================================
    // Subscriptions
    // ============================================

    pub async fn get_subscription(&self, id: Uuid) -> Result<Option<SubscriptionRow>> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1");
        let row = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    pub async fn upsert_subscription(&self, state: &SubscriptionState) -> Result<()> {
        let watermark = serde_json::to_value(&state.last_seen_item_ids)?;
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (subscription_id, user_id, source_url, title, active, poll_frequency,
                 last_seen_item_ids, last_polled_at, last_error, consecutive_failures,
                 deactivated_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            ON CONFLICT (subscription_id) DO UPDATE SET
                source_url = EXCLUDED.source_url,
                title = EXCLUDED.title,
                active = EXCLUDED.active,
                poll_frequency = EXCLUDED.poll_frequency,
                last_seen_item_ids = EXCLUDED.last_seen_item_ids,
                last_polled_at = EXCLUDED.last_polled_at,
                last_error = EXCLUDED.last_error,
                consecutive_failures = EXCLUDED.consecutive_failures,
                deactivated_at = EXCLUDED.deactivated_at,
                updated_at = NOW()
            "#,
        )
        .bind(state.subscription_id)
        .bind(state.user_id)
        .bind(&state.source_url)
        .bind(&state.title)
        .bind(state.active)
        .bind(state.poll_frequency.as_str())
        .bind(watermark)
        .bind(state.last_polled_at)
        .bind(&state.last_error)
        .bind(state.consecutive_failures as i32)
        .bind(state.deactivated_at)
        .bind(state.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_active_subscriptions(&self) -> Result<Vec<SubscriptionRow>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE active ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, SubscriptionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn delete_inactive_subscriptions(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM subscriptions
            WHERE NOT active AND COALESCE(deactivated_at, updated_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Keep the newest `capacity` ids of every oversized watermark
    pub async fn trim_watermarks(&self, capacity: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_seen_item_ids = COALESCE((
                    SELECT jsonb_agg(t.value ORDER BY t.ord)
                    FROM jsonb_array_elements(last_seen_item_ids) WITH ORDINALITY AS t(value, ord)
                    WHERE t.ord > jsonb_array_length(last_seen_item_ids) - $1
                ), '[]'::jsonb),
                updated_at = NOW()
            WHERE jsonb_array_length(last_seen_item_ids) > $1
            "#,
        )
        .bind(capacity as i32)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // User profiles
    // ============================================

    pub async fn get_user_profile(&self, id: Uuid) -> Result<Option<UserProfileRow>> {
        let row = sqlx::query_as::<_, UserProfileRow>(
            r#"
            SELECT id, display_name, ai_config, weekly_report_enabled, notification_channel
            FROM user_profiles
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn upsert_user_profile(&self, profile: &UserProfile) -> Result<()> {
        let ai_config = profile
            .ai_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let channel = profile
            .report_preferences
            .channel
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO user_profiles
                (id, display_name, ai_config, weekly_report_enabled, notification_channel)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                ai_config = EXCLUDED.ai_config,
                weekly_report_enabled = EXCLUDED.weekly_report_enabled,
                notification_channel = EXCLUDED.notification_channel,
                updated_at = NOW()
            "#,
        )
        .bind(profile.id)
        .bind(&profile.display_name)
        .bind(ai_config)
        .bind(profile.report_preferences.weekly_report_enabled)
        .bind(channel)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Profiles with weekly reports enabled and a channel configured
    pub async fn list_report_target_profiles(&self) -> Result<Vec<UserProfileRow>> {
        let rows = sqlx::query_as::<_, UserProfileRow>(
            r#"
            SELECT id, display_name, ai_config, weekly_report_enabled, notification_channel
            FROM user_profiles
            WHERE weekly_report_enabled AND notification_channel IS NOT NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Weekly reports
    // ============================================

    /// Insert or replace the report for `(user_id, week_start)`; the
    /// existing id is kept on replace
    pub async fn upsert_report(&self, report: &WeeklyReport) -> Result<WeeklyReportRow> {
        let digest = serde_json::to_value(&report.digest)?;
        let sql = format!(
            r#"
            INSERT INTO weekly_reports
                (id, user_id, week_start, week_end, digest, subject, markdown, html, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, week_start) DO UPDATE SET
                week_end = EXCLUDED.week_end,
                digest = EXCLUDED.digest,
                subject = EXCLUDED.subject,
                markdown = EXCLUDED.markdown,
                html = EXCLUDED.html,
                updated_at = NOW()
            RETURNING {REPORT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, WeeklyReportRow>(&sql)
            .bind(report.id)
            .bind(report.user_id)
            .bind(report.week_start)
            .bind(report.week_end)
            .bind(digest)
            .bind(&report.subject)
            .bind(&report.markdown)
            .bind(&report.html)
            .bind(report.created_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(row)
    }

    /// Link a report to the feeds it covers; ids of deleted feeds are skipped
    pub async fn link_report_items(&self, report_id: Uuid, feed_ids: &[Uuid]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weekly_report_items (report_id, feed_id)
            SELECT $1, id FROM feeds WHERE id = ANY($2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(report_id)
        .bind(feed_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete all but the newest `keep` reports for a user
    pub async fn prune_reports(&self, user_id: Uuid, keep: usize) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM weekly_reports
            WHERE id IN (
                SELECT id FROM weekly_reports
                WHERE user_id = $1
                ORDER BY week_start DESC
                OFFSET $2
            )
            "#,
        )
        .bind(user_id)
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_reports(&self, user_id: Uuid) -> Result<Vec<WeeklyReportRow>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM weekly_reports WHERE user_id = $1 ORDER BY week_start DESC"
        );
        let rows = sqlx::query_as::<_, WeeklyReportRow>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
