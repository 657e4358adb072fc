//! PostgreSQL implementation of RunStore
//!
//! - Runs are leased with `FOR UPDATE SKIP LOCKED`, so many workers can
//!   poll the same table
//! - Dedupe on insert is serialized per (workflow, event, key) with a
//!   transaction-scoped advisory lock
//! - Step results are write-once via `ON CONFLICT DO NOTHING`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::router::Event;

const RUN_COLUMNS: &str = r#"
    id, workflow_name, event, status, current_step_index, current_step_attempts,
    wake_at, cancel_requested, output, error, lease_owner, heartbeat_at,
    created_at, updated_at, completed_at
"#;

const ACTIVE_STATUSES: &str = "('pending', 'running', 'sleeping')";
const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// PostgreSQL [`RunStore`]
///
/// Expects the `durable_runs` and `durable_step_results` tables from
/// `crates/storage/migrations`.
///
/// ```ignore
/// use neofeed_durable::PostgresRunStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/neofeed").await?;
/// let store = PostgresRunStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Distinguish "no such run" from "run already terminal" after an
    /// update touched zero rows.
    async fn transition_error(&self, run_id: Uuid, operation: &'static str) -> StoreError {
        match self.get_run(run_id).await {
            Ok(Some(run)) => StoreError::InvalidTransition {
                run_id,
                status: run.status,
                operation,
            },
            Ok(None) => StoreError::RunNotFound(run_id),
            Err(e) => e,
        }
    }

    async fn execute_transition(
        &self,
        run_id: Uuid,
        operation: &'static str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<(), StoreError> {
        let result = query.execute(&self.pool).await.map_err(|e| {
            error!(%run_id, operation, "Failed to update run: {}", e);
            StoreError::Database(e.to_string())
        })?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(run_id, operation).await);
        }
        Ok(())
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Database(e.to_string())
}

fn row_to_run(row: &PgRow) -> Result<WorkflowRun, StoreError> {
    let event: Value = row.get("event");
    let status: String = row.get("status");
    let step_index: i32 = row.get("current_step_index");
    let step_attempts: i32 = row.get("current_step_attempts");

    Ok(WorkflowRun {
        id: row.get("id"),
        workflow_name: row.get("workflow_name"),
        event: serde_json::from_value::<Event>(event)?,
        status: status.parse()?,
        current_step_index: step_index.max(0) as u32,
        current_step_attempts: step_attempts.max(0) as u32,
        wake_at: row.get("wake_at"),
        cancel_requested: row.get("cancel_requested"),
        output: row.get("output"),
        error: row.get("error"),
        lease_owner: row.get("lease_owner"),
        heartbeat_at: row.get("heartbeat_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn row_to_step(row: &PgRow) -> Result<StepRecord, StoreError> {
    let outcome: Value = row.get("outcome");
    let step_index: i32 = row.get("step_index");
    let attempts: i32 = row.get("attempts");

    Ok(StepRecord {
        run_id: row.get("run_id"),
        step_name: row.get("step_name"),
        step_index: step_index.max(0) as u32,
        outcome: serde_json::from_value(outcome)?,
        attempts: attempts.max(0) as u32,
        completed_at: row.get("completed_at"),
    })
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.id, workflow = %run.workflow_name))]
    async fn insert_run(
        &self,
        run: WorkflowRun,
        dedupe_window: Duration,
    ) -> Result<InsertOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        if let Some(key) = run.event.dedupe_key.as_deref() {
            let lock_key = format!("{}\u{1f}{}\u{1f}{}", run.workflow_name, run.event.name, key);
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                .bind(&lock_key)
                .execute(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to take dedupe lock", e))?;

            let window_start = Utc::now()
                - chrono::Duration::from_std(dedupe_window).unwrap_or(chrono::Duration::zero());
            let existing = sqlx::query(&format!(
                r#"
                SELECT id FROM durable_runs
                WHERE workflow_name = $1 AND event_name = $2 AND dedupe_key = $3
                  AND (status IN {ACTIVE_STATUSES}
                       OR (status = 'completed' AND completed_at >= $4))
                ORDER BY created_at DESC
                LIMIT 1
                "#
            ))
            .bind(&run.workflow_name)
            .bind(&run.event.name)
            .bind(key)
            .bind(window_start)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to check for duplicate run", e))?;

            if let Some(row) = existing {
                tx.commit()
                    .await
                    .map_err(|e| db_error("Failed to commit transaction", e))?;
                let id: Uuid = row.get("id");
                debug!(existing = %id, dedupe_key = key, "duplicate run suppressed");
                return Ok(InsertOutcome::Duplicate(id));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO durable_runs
                (id, workflow_name, event_name, dedupe_key, event, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
            "#,
        )
        .bind(run.id)
        .bind(&run.workflow_name)
        .bind(&run.event.name)
        .bind(&run.event.dedupe_key)
        .bind(serde_json::to_value(&run.event)?)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to insert run", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        debug!("created run");
        Ok(InsertOutcome::Created(run.id))
    }

    #[instrument(skip(self))]
    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM durable_runs WHERE id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to get run", e))?;

        row.as_ref().map(row_to_run).transpose()
    }

    #[instrument(skip(self))]
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let limit = filter.limit.unwrap_or(100) as i64;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM durable_runs
            WHERE ($1::text IS NULL OR workflow_name = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(filter.workflow_name.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list runs", e))?;

        rows.iter().map(row_to_run).collect()
    }

    #[instrument(skip(self))]
    async fn claim_due_runs(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE durable_runs
            SET status = 'running', lease_owner = $1, heartbeat_at = $2,
                wake_at = NULL, updated_at = $2
            WHERE id IN (
                SELECT id FROM durable_runs
                WHERE status = 'pending'
                   OR (status = 'sleeping' AND (wake_at IS NULL OR wake_at <= $2))
                ORDER BY COALESCE(wake_at, created_at), id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim runs", e))?;

        if !rows.is_empty() {
            debug!(count = rows.len(), "claimed runs");
        }
        rows.iter().map(row_to_run).collect()
    }

    #[instrument(skip(self))]
    async fn claim_run(
        &self,
        run_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE durable_runs
            SET status = 'running', lease_owner = $2, heartbeat_at = $3,
                wake_at = NULL, updated_at = $3
            WHERE id = $1
              AND (status = 'pending'
                   OR (status = 'sleeping' AND (wake_at IS NULL OR wake_at <= $3)))
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(worker_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to claim run", e))?;

        if let Some(row) = row {
            return row_to_run(&row).map(Some);
        }
        match self.get_run(run_id).await? {
            Some(_) => Ok(None),
            None => Err(StoreError::RunNotFound(run_id)),
        }
    }

    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE durable_runs SET heartbeat_at = $2
            WHERE status = 'running' AND lease_owner = $1
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to heartbeat runs", e))?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE durable_runs
            SET status = 'pending', lease_owner = NULL, heartbeat_at = NULL, updated_at = NOW()
            WHERE status = 'running' AND (heartbeat_at IS NULL OR heartbeat_at < $1)
            RETURNING id
            "#,
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to reclaim stale runs", e))?;

        Ok(rows.iter().map(|row| row.get("id")).collect())
    }

    #[instrument(skip(self, error))]
    async fn schedule_retry(
        &self,
        run_id: Uuid,
        attempts: u32,
        wake_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE durable_runs
            SET status = 'sleeping', lease_owner = NULL, heartbeat_at = NULL,
                current_step_attempts = $2, wake_at = $3, error = $4, updated_at = NOW()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#
        );
        let query = sqlx::query(&sql)
        .bind(run_id)
        .bind(attempts as i32)
        .bind(wake_at)
        .bind(error);

        self.execute_transition(run_id, "schedule retry", query).await
    }

    #[instrument(skip(self))]
    async fn suspend(&self, run_id: Uuid, wake_at: DateTime<Utc>) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE durable_runs
            SET status = 'sleeping', lease_owner = NULL, heartbeat_at = NULL,
                wake_at = $2, updated_at = NOW()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#
        );
        let query = sqlx::query(&sql)
        .bind(run_id)
        .bind(wake_at);

        self.execute_transition(run_id, "suspend", query).await
    }

    #[instrument(skip(self, output))]
    async fn complete_run(&self, run_id: Uuid, output: Value) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE durable_runs
            SET status = 'completed', lease_owner = NULL, heartbeat_at = NULL,
                output = $2, error = NULL, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#
        );
        let query = sqlx::query(&sql)
        .bind(run_id)
        .bind(output);

        self.execute_transition(run_id, "complete", query).await
    }

    #[instrument(skip(self, error))]
    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE durable_runs
            SET status = 'failed', lease_owner = NULL, heartbeat_at = NULL,
                error = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#
        );
        let query = sqlx::query(&sql)
        .bind(run_id)
        .bind(error);

        self.execute_transition(run_id, "fail", query).await
    }

    #[instrument(skip(self))]
    async fn cancel_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE durable_runs
            SET status = 'cancelled', cancel_requested = TRUE, lease_owner = NULL,
                heartbeat_at = NULL, wake_at = NULL, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#
        );
        let query = sqlx::query(&sql)
        .bind(run_id);

        self.execute_transition(run_id, "cancel", query).await
    }

    #[instrument(skip(self))]
    async fn request_cancel(&self, run_id: Uuid) -> Result<RunStatus, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE durable_runs
            SET cancel_requested = TRUE,
                status = CASE WHEN status IN ('pending', 'sleeping') THEN 'cancelled' ELSE status END,
                completed_at = CASE WHEN status IN ('pending', 'sleeping') THEN NOW() ELSE completed_at END,
                wake_at = CASE WHEN status IN ('pending', 'sleeping') THEN NULL ELSE wake_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to request cancellation", e))?
        .ok_or(StoreError::RunNotFound(run_id))?;

        let status: String = row.get("status");
        status.parse()
    }

    #[instrument(skip(self))]
    async fn load_steps(&self, run_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, step_name, step_index, outcome, attempts, completed_at
            FROM durable_step_results
            WHERE run_id = $1
            ORDER BY step_index
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load step results", e))?;

        rows.iter().map(row_to_step).collect()
    }

    #[instrument(skip(self, record), fields(run_id = %record.run_id, step = %record.step_name))]
    async fn save_step(&self, record: StepRecord) -> Result<StepRecord, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO durable_step_results
                (run_id, step_name, step_index, outcome, attempts, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (run_id, step_name) DO NOTHING
            "#,
        )
        .bind(record.run_id)
        .bind(&record.step_name)
        .bind(record.step_index as i32)
        .bind(serde_json::to_value(&record.outcome)?)
        .bind(record.attempts as i32)
        .bind(record.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to save step result", e))?
        .rows_affected()
            > 0;

        if !inserted {
            let row = sqlx::query(
                r#"
                SELECT run_id, step_name, step_index, outcome, attempts, completed_at
                FROM durable_step_results
                WHERE run_id = $1 AND step_name = $2
                "#,
            )
            .bind(record.run_id)
            .bind(&record.step_name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to read existing step result", e))?;
            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit transaction", e))?;
            return row_to_step(&row);
        }

        sqlx::query(
            r#"
            UPDATE durable_runs
            SET current_step_index = GREATEST(current_step_index, $2),
                current_step_attempts = 0, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.run_id)
        .bind(record.step_index as i32 + 1)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to advance step index", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        // durable_step_results rows go with the run (ON DELETE CASCADE)
        let result = sqlx::query(
            r#"
            DELETE FROM durable_runs
            WHERE status = 'completed' AND completed_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to purge completed runs", e))?;

        Ok(result.rows_affected())
    }
}
