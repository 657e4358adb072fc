//! Event router: trigger matching, dedupe and cron scheduling

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::{scheduled_tick, CronTick, EmitReceipt, Event, Trigger, TriggeredRun};
use crate::engine::WorkflowRegistry;
use crate::persistence::{InsertOutcome, RunStore, StoreError, WorkflowRun};

/// Runs completed less than this long ago still suppress duplicates
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Anything events can be emitted into. Fan-out steps depend on this
/// rather than on the router itself.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn emit(&self, event: Event) -> Result<EmitReceipt, RouterError>;
}

/// Routes events to workflows
///
/// - Event triggers match the event name exactly
/// - Cron triggers are driven by `tokio-cron-scheduler` once
///   [`start_cron`](Self::start_cron) is called
/// - No ordering is guaranteed between events; each match becomes an
///   independent pending run
pub struct EventRouter {
    store: Arc<dyn RunStore>,
    registry: Arc<WorkflowRegistry>,
    triggers: RwLock<Vec<(Trigger, String)>>,
    dedupe_window: Duration,
    wakeup: Arc<Notify>,
    scheduler: tokio::sync::Mutex<Option<JobScheduler>>,
}

impl EventRouter {
    pub fn new(store: Arc<dyn RunStore>, registry: Arc<WorkflowRegistry>) -> Self {
        Self {
            store,
            registry,
            triggers: RwLock::new(Vec::new()),
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            wakeup: Arc::new(Notify::new()),
            scheduler: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_dedupe_window(mut self, window: Duration) -> Self {
        self.dedupe_window = window;
        self
    }

    /// Notified whenever a new run is created
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    pub fn register_trigger(&self, trigger: Trigger, workflow: &str) -> Result<(), RouterError> {
        if !self.registry.contains(workflow) {
            return Err(RouterError::UnknownWorkflow(workflow.to_string()));
        }
        trigger.validate().map_err(RouterError::InvalidTrigger)?;

        let mut triggers = self.triggers.write();
        let entry = (trigger, workflow.to_string());
        if !triggers.contains(&entry) {
            debug!(workflow, trigger = ?entry.0, "registered trigger");
            triggers.push(entry);
        }
        Ok(())
    }

    pub fn triggers(&self) -> Vec<(Trigger, String)> {
        self.triggers.read().clone()
    }

    /// Workflows whose event trigger matches `event_name`
    pub fn workflows_for(&self, event_name: &str) -> Vec<String> {
        self.triggers
            .read()
            .iter()
            .filter(|(trigger, _)| trigger.matches_event(event_name))
            .map(|(_, workflow)| workflow.clone())
            .collect()
    }

    /// Create a pending run of `workflow` for `event`, bypassing trigger
    /// matching. Dedupe still applies.
    #[instrument(skip(self, event), fields(event = %event.name))]
    pub async fn start_run(
        &self,
        workflow: &str,
        event: Event,
    ) -> Result<InsertOutcome, RouterError> {
        if !self.registry.contains(workflow) {
            return Err(RouterError::UnknownWorkflow(workflow.to_string()));
        }

        let run = WorkflowRun::new(Uuid::now_v7(), workflow, event);
        let outcome = self.store.insert_run(run, self.dedupe_window).await?;
        match outcome {
            InsertOutcome::Created(run_id) => {
                debug!(%run_id, workflow, "run created");
                self.wakeup.notify_one();
            }
            InsertOutcome::Duplicate(run_id) => {
                debug!(%run_id, workflow, "duplicate emission collapsed into existing run");
            }
        }
        Ok(outcome)
    }

    /// Emit the synthetic cron event for `workflow` at `scheduled_at`.
    /// The dedupe key is `"{workflow}:{tick}"`, so every node firing the
    /// same tick starts one run between them.
    pub async fn fire_cron_at(
        &self,
        workflow: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<EmitReceipt, RouterError> {
        let scheduled_at = scheduled_at.with_nanosecond(0).unwrap_or(scheduled_at);
        let event = Event::from_data(Trigger::cron_event_name(workflow), &CronTick { scheduled_at })
            .map_err(|e| RouterError::InvalidTrigger(e.to_string()))?
            .with_dedupe_key(format!("{workflow}:{}", scheduled_at.to_rfc3339()));
        let event_id = event.id;

        let outcome = self.start_run(workflow, event).await?;
        Ok(EmitReceipt {
            event_id,
            runs: vec![TriggeredRun {
                workflow: workflow.to_string(),
                run_id: outcome.run_id(),
                duplicate: matches!(outcome, InsertOutcome::Duplicate(_)),
            }],
        })
    }

    /// Fire a cron-triggered workflow now, outside its schedule
    pub async fn fire_cron(&self, workflow: &str) -> Result<EmitReceipt, RouterError> {
        self.fire_cron_at(workflow, Utc::now()).await
    }

    /// Fire the tick of `schedule` that is due at `now`
    pub async fn fire_scheduled(
        &self,
        workflow: &str,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Result<EmitReceipt, RouterError> {
        let tick = scheduled_tick(schedule, now).unwrap_or(now);
        self.fire_cron_at(workflow, tick).await
    }

    /// Start the cron scheduler for every registered cron trigger
    pub async fn start_cron(self: &Arc<Self>) -> Result<(), RouterError> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| RouterError::Scheduler(e.to_string()))?;

        for (trigger, workflow) in self.triggers() {
            let Trigger::Cron(expression) = trigger else {
                continue;
            };

            let schedule = Arc::new(
                Schedule::from_str(&expression)
                    .map_err(|e| RouterError::InvalidTrigger(format!("{expression}: {e}")))?,
            );
            let router = Arc::clone(self);
            let job_workflow = workflow.clone();
            let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
                let router = Arc::clone(&router);
                let schedule = Arc::clone(&schedule);
                let workflow = job_workflow.clone();
                Box::pin(async move {
                    if let Err(e) = router.fire_scheduled(&workflow, &schedule, Utc::now()).await {
                        error!(workflow = %workflow, "Cron trigger failed: {}", e);
                    }
                })
            })
            .map_err(|e| RouterError::InvalidTrigger(format!("{expression}: {e}")))?;

            scheduler
                .add(job)
                .await
                .map_err(|e| RouterError::Scheduler(e.to_string()))?;
            info!(workflow = %workflow, cron = %expression, "scheduled workflow");
        }

        scheduler
            .start()
            .await
            .map_err(|e| RouterError::Scheduler(e.to_string()))?;
        *guard = Some(scheduler);
        Ok(())
    }

    pub async fn shutdown_cron(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            if let Err(e) = scheduler.shutdown().await {
                error!("Failed to stop cron scheduler: {}", e);
            }
        }
    }
}

#[async_trait]
impl EventSink for EventRouter {
    /// Start one run per matching event trigger. An event nothing listens
    /// to is accepted and dropped.
    #[instrument(skip(self, event), fields(event = %event.name, event_id = %event.id))]
    async fn emit(&self, event: Event) -> Result<EmitReceipt, RouterError> {
        let workflows = self.workflows_for(&event.name);
        if workflows.is_empty() {
            debug!("no trigger matches event");
        }

        let mut receipt = EmitReceipt {
            event_id: event.id,
            runs: Vec::with_capacity(workflows.len()),
        };
        for workflow in workflows {
            let outcome = self.start_run(&workflow, event.clone()).await?;
            receipt.runs.push(TriggeredRun {
                workflow,
                run_id: outcome.run_id(),
                duplicate: matches!(outcome, InsertOutcome::Duplicate(_)),
            });
        }
        Ok(receipt)
    }
}
