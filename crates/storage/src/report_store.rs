// Database-backed ReportStore implementation

use async_trait::async_trait;
use neofeed_core::{traits::ReportStore, Result, WeeklyReport, REPORTS_KEPT_PER_USER};
use uuid::Uuid;

use crate::database_error;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbReportStore {
    db: Database,
}

impl DbReportStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReportStore for DbReportStore {
    async fn save_report(&self, report: WeeklyReport) -> Result<WeeklyReport> {
        let row = self
            .db
            .upsert_report(&report)
            .await
            .map_err(database_error)?;
        let stored = WeeklyReport::try_from(row)?;

        self.db
            .link_report_items(stored.id, &stored.digest.feed_ids)
            .await
            .map_err(database_error)?;

        let pruned = self
            .db
            .prune_reports(stored.user_id, REPORTS_KEPT_PER_USER)
            .await
            .map_err(database_error)?;
        if pruned > 0 {
            tracing::debug!(user_id = %stored.user_id, pruned, "Pruned old weekly reports");
        }

        Ok(stored)
    }

    async fn list_reports(&self, user_id: Uuid) -> Result<Vec<WeeklyReport>> {
        self.db
            .list_reports(user_id)
            .await
            .map_err(database_error)?
            .into_iter()
            .map(WeeklyReport::try_from)
            .collect()
    }
}

pub fn create_db_report_store(db: Database) -> DbReportStore {
    DbReportStore::new(db)
}
