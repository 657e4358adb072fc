// Database-backed UserDirectory implementation
//
// Profiles are owned by the product database; the pipeline only reads
// them. `upsert_profile` exists for seeding and tests.

use async_trait::async_trait;
use neofeed_core::{traits::UserDirectory, ReportTarget, Result, UserProfile};
use uuid::Uuid;

use crate::database_error;
use crate::repositories::Database;

#[derive(Clone)]
pub struct DbUserDirectory {
    db: Database,
}

impl DbUserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        self.db
            .upsert_user_profile(profile)
            .await
            .map_err(database_error)
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        self.db
            .get_user_profile(user_id)
            .await
            .map_err(database_error)?
            .map(UserProfile::try_from)
            .transpose()
    }

    async fn list_report_targets(&self) -> Result<Vec<ReportTarget>> {
        let rows = self
            .db
            .list_report_target_profiles()
            .await
            .map_err(database_error)?;

        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let profile = UserProfile::try_from(row)?;
            if let Some(target) = profile.report_target() {
                targets.push(target);
            }
        }
        Ok(targets)
    }
}

pub fn create_db_user_directory(db: Database) -> DbUserDirectory {
    DbUserDirectory::new(db)
}
