// Postgres storage layer with sqlx
//
// This crate provides database implementations for the core store traits:
// - DbFeedStore: FeedStore over the feeds table
// - DbSubscriptionStore: SubscriptionStore with JSONB watermarks
// - DbUserDirectory: read access to user_profiles
// - DbReportStore: weekly_reports plus their item links
//
// Durable run state lives in the same database through
// `Database::run_store`, which hands out a neofeed-durable PostgresRunStore.

pub mod feed_store;
pub mod models;
pub mod report_store;
pub mod repositories;
pub mod subscription_store;
pub mod user_directory;

pub use feed_store::{create_db_feed_store, DbFeedStore};
pub use report_store::{create_db_report_store, DbReportStore};
pub use repositories::Database;
pub use subscription_store::{create_db_subscription_store, DbSubscriptionStore};
pub use user_directory::{create_db_user_directory, DbUserDirectory};

use neofeed_core::StorageError;

pub(crate) fn database_error(e: anyhow::Error) -> StorageError {
    StorageError::database(format!("{e:#}"))
}
