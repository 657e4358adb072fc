// Database-backed SubscriptionStore implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neofeed_core::{traits::SubscriptionStore, Result, SubscriptionState};
use uuid::Uuid;

use crate::database_error;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbSubscriptionStore {
    db: Database,
}

impl DbSubscriptionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionStore for DbSubscriptionStore {
    async fn read_subscription(&self, subscription_id: Uuid) -> Result<Option<SubscriptionState>> {
        self.db
            .get_subscription(subscription_id)
            .await
            .map_err(database_error)?
            .map(SubscriptionState::try_from)
            .transpose()
    }

    async fn write_subscription(&self, state: &SubscriptionState) -> Result<()> {
        self.db
            .upsert_subscription(state)
            .await
            .map_err(database_error)
    }

    async fn list_active_subscriptions(&self) -> Result<Vec<SubscriptionState>> {
        self.db
            .list_active_subscriptions()
            .await
            .map_err(database_error)?
            .into_iter()
            .map(SubscriptionState::try_from)
            .collect()
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.db
            .delete_inactive_subscriptions(cutoff)
            .await
            .map_err(database_error)
    }

    async fn trim_watermarks(&self, capacity: usize) -> Result<u64> {
        self.db
            .trim_watermarks(capacity)
            .await
            .map_err(database_error)
    }
}

pub fn create_db_subscription_store(db: Database) -> DbSubscriptionStore {
    DbSubscriptionStore::new(db)
}
