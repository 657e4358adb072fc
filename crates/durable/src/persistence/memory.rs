//! In-memory implementation of RunStore

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::store::*;

/// In-memory [`RunStore`]
///
/// Same semantics as the PostgreSQL store, including dedupe and the
/// write-once rule for step results. Used by tests and by the worker when
/// no database is configured.
///
/// ```
/// use neofeed_durable::InMemoryRunStore;
///
/// let store = InMemoryRunStore::new();
/// assert_eq!(store.run_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
    steps: RwLock<HashMap<Uuid, Vec<StepRecord>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Test helpers

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    pub fn clear(&self) {
        self.runs.write().clear();
        self.steps.write().clear();
    }

    /// Force a run's heartbeat into the past, as if its worker died
    pub fn expire_lease(&self, run_id: Uuid, heartbeat_at: DateTime<Utc>) {
        if let Some(run) = self.runs.write().get_mut(&run_id) {
            run.heartbeat_at = Some(heartbeat_at);
        }
    }

    fn update<F>(&self, run_id: Uuid, operation: &'static str, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut WorkflowRun),
    {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if run.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                run_id,
                status: run.status,
                operation,
            });
        }
        f(run);
        run.updated_at = Utc::now();
        Ok(())
    }

    fn lease(run: &mut WorkflowRun, worker_id: &str, now: DateTime<Utc>) {
        run.status = RunStatus::Running;
        run.lease_owner = Some(worker_id.to_string());
        run.heartbeat_at = Some(now);
        run.wake_at = None;
        run.updated_at = now;
    }

    fn release(run: &mut WorkflowRun, status: RunStatus) {
        run.status = status;
        run.lease_owner = None;
        run.heartbeat_at = None;
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert_run(
        &self,
        run: WorkflowRun,
        dedupe_window: Duration,
    ) -> Result<InsertOutcome, StoreError> {
        let mut runs = self.runs.write();

        if let Some(key) = run.event.dedupe_key.as_deref() {
            let window_start = Utc::now()
                - chrono::Duration::from_std(dedupe_window).unwrap_or(chrono::Duration::zero());
            let existing = runs.values().find(|r| {
                r.workflow_name == run.workflow_name
                    && r.event.name == run.event.name
                    && r.event.dedupe_key.as_deref() == Some(key)
                    && r.blocks_duplicate(window_start)
            });
            if let Some(existing) = existing {
                return Ok(InsertOutcome::Duplicate(existing.id));
            }
        }

        let id = run.id;
        runs.insert(id, run);
        Ok(InsertOutcome::Created(id))
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.runs.read().get(&run_id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs: Vec<WorkflowRun> = self
            .runs
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn claim_due_runs(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowRun>, StoreError> {
        let mut runs = self.runs.write();
        let mut due: Vec<&mut WorkflowRun> = runs.values_mut().filter(|r| r.is_due(now)).collect();
        due.sort_by_key(|r| (r.wake_at.unwrap_or(r.created_at), r.id));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|run| {
                Self::lease(run, worker_id, now);
                run.clone()
            })
            .collect())
    }

    async fn claim_run(
        &self,
        run_id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkflowRun>, StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        if !run.is_due(now) {
            return Ok(None);
        }
        Self::lease(run, worker_id, now);
        Ok(Some(run.clone()))
    }

    async fn heartbeat(&self, worker_id: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut count = 0;
        for run in self.runs.write().values_mut() {
            if run.status == RunStatus::Running && run.lease_owner.as_deref() == Some(worker_id) {
                run.heartbeat_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut reclaimed = Vec::new();
        for run in self.runs.write().values_mut() {
            let stale = run.status == RunStatus::Running
                && run.heartbeat_at.map_or(true, |at| at < stale_before);
            if stale {
                Self::release(run, RunStatus::Pending);
                run.updated_at = Utc::now();
                reclaimed.push(run.id);
            }
        }
        Ok(reclaimed)
    }

    async fn schedule_retry(
        &self,
        run_id: Uuid,
        attempts: u32,
        wake_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        self.update(run_id, "schedule retry", |run| {
            Self::release(run, RunStatus::Sleeping);
            run.current_step_attempts = attempts;
            run.wake_at = Some(wake_at);
            run.error = Some(error.to_string());
        })
    }

    async fn suspend(&self, run_id: Uuid, wake_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(run_id, "suspend", |run| {
            Self::release(run, RunStatus::Sleeping);
            run.wake_at = Some(wake_at);
        })
    }

    async fn complete_run(&self, run_id: Uuid, output: Value) -> Result<(), StoreError> {
        self.update(run_id, "complete", |run| {
            Self::release(run, RunStatus::Completed);
            run.output = Some(output);
            run.error = None;
            run.completed_at = Some(Utc::now());
        })
    }

    async fn fail_run(&self, run_id: Uuid, error: &str) -> Result<(), StoreError> {
        self.update(run_id, "fail", |run| {
            Self::release(run, RunStatus::Failed);
            run.error = Some(error.to_string());
            run.completed_at = Some(Utc::now());
        })
    }

    async fn cancel_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update(run_id, "cancel", |run| {
            Self::release(run, RunStatus::Cancelled);
            run.cancel_requested = true;
            run.wake_at = None;
            run.completed_at = Some(Utc::now());
        })
    }

    async fn request_cancel(&self, run_id: Uuid) -> Result<RunStatus, StoreError> {
        let mut runs = self.runs.write();
        let run = runs.get_mut(&run_id).ok_or(StoreError::RunNotFound(run_id))?;
        match run.status {
            RunStatus::Pending | RunStatus::Sleeping => {
                Self::release(run, RunStatus::Cancelled);
                run.cancel_requested = true;
                run.wake_at = None;
                run.completed_at = Some(Utc::now());
            }
            RunStatus::Running => run.cancel_requested = true,
            _ => {}
        }
        Ok(run.status)
    }

    async fn load_steps(&self, run_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let mut steps = self.steps.read().get(&run_id).cloned().unwrap_or_default();
        steps.sort_by_key(|s| s.step_index);
        Ok(steps)
    }

    async fn save_step(&self, record: StepRecord) -> Result<StepRecord, StoreError> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&record.run_id)
            .ok_or(StoreError::RunNotFound(record.run_id))?;

        let mut steps = self.steps.write();
        let entries = steps.entry(record.run_id).or_default();
        if let Some(existing) = entries.iter().find(|s| s.step_name == record.step_name) {
            return Ok(existing.clone());
        }

        run.current_step_index = run.current_step_index.max(record.step_index + 1);
        run.current_step_attempts = 0;
        run.updated_at = Utc::now();
        entries.push(record.clone());
        Ok(record)
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut runs = self.runs.write();
        let expired: Vec<Uuid> = runs
            .values()
            .filter(|r| {
                r.status == RunStatus::Completed && r.completed_at.is_some_and(|at| at < before)
            })
            .map(|r| r.id)
            .collect();

        let mut steps = self.steps.write();
        for id in &expired {
            runs.remove(id);
            steps.remove(id);
        }
        Ok(expired.len() as u64)
    }
}
