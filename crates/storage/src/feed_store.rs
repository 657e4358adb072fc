// Database-backed FeedStore implementation
//
// Uniqueness of (user_id, fingerprint) is enforced by the feeds table;
// a losing concurrent insert reads back the winner's row.

use async_trait::async_trait;
use neofeed_core::{
    traits::FeedStore, DateRange, FeedRecord, NewFeed, Result, StorageError, UpsertOutcome,
};
use uuid::Uuid;

use crate::database_error;
use crate::repositories::Database;

// ============================================================================
// DbFeedStore
// ============================================================================

#[derive(Clone)]
pub struct DbFeedStore {
    db: Database,
}

impl DbFeedStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FeedStore for DbFeedStore {
    async fn upsert_feed(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        feed: NewFeed,
    ) -> Result<UpsertOutcome> {
        let inserted = self
            .db
            .insert_feed_if_absent(Uuid::now_v7(), user_id, fingerprint, &feed)
            .await
            .map_err(database_error)?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Created(row.try_into()?));
        }

        let existing = self
            .db
            .get_feed_by_fingerprint(user_id, fingerprint)
            .await
            .map_err(database_error)?
            .ok_or_else(|| {
                StorageError::database(format!(
                    "feed {fingerprint} for user {user_id} conflicted but is missing"
                ))
            })?;

        Ok(UpsertOutcome::Existing(existing.try_into()?))
    }

    async fn find_by_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<FeedRecord>> {
        self.db
            .get_feed_by_fingerprint(user_id, fingerprint)
            .await
            .map_err(database_error)?
            .map(FeedRecord::try_from)
            .transpose()
    }

    async fn get_feed(&self, feed_id: Uuid) -> Result<Option<FeedRecord>> {
        self.db
            .get_feed(feed_id)
            .await
            .map_err(database_error)?
            .map(FeedRecord::try_from)
            .transpose()
    }

    async fn query_feeds(&self, user_id: Uuid, range: DateRange) -> Result<Vec<FeedRecord>> {
        self.db
            .list_feeds_in_range(user_id, range.start, range.end)
            .await
            .map_err(database_error)?
            .into_iter()
            .map(FeedRecord::try_from)
            .collect()
    }
}

/// Create a database-backed feed store
pub fn create_db_feed_store(db: Database) -> DbFeedStore {
    DbFeedStore::new(db)
}
