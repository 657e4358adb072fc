//! # Durable Step Executor
//!
//! Embedded workflow orchestration for the NeoFeed background pipeline.
//!
//! ## Features
//!
//! - **Memoized steps**: every step result is stored under `(run_id, step_name)`;
//!   a resumed run replays its body and completed steps return their stored
//!   output instead of running again
//! - **Durable retries**: transient step failures are rescheduled with bounded
//!   exponential backoff; the worker is released while waiting
//! - **Suspension**: `ctx.sleep` parks a run until a wake-up time
//! - **Event routing**: exact-name and cron triggers, dedupe by `(event, key)`
//! - **Fan-out**: a step can emit many events, each starting its own run
//!
//! ## Architecture
//!
//! ```text
//!   API calls / cron ticks / fan-out steps
//!                  │ Event
//!                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        EventRouter                           │
//! │   (trigger matching, dedupe, tokio-cron-scheduler jobs)      │
//! └─────────────────────────────────────────────────────────────┘
//!                  │ pending run
//!                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         RunStore                             │
//! │   (durable_runs, durable_step_results; memory or Postgres)   │
//! └─────────────────────────────────────────────────────────────┘
//!                  │ lease
//!                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              WorkerPool → WorkflowExecutor                   │
//! │   (replays the body through StepContext, settles the run)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use neofeed_durable::prelude::*;
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl Workflow for Greet {
//!     const NAME: &'static str = "greet";
//!     type Input = String;
//!     type Output = String;
//!
//!     async fn run(&self, ctx: &StepContext, name: String) -> Result<String, WorkflowError> {
//!         ctx.step("greet", |_| async move { Ok(format!("hello {name}")) }).await
//!     }
//! }
//!
//! let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());
//! let registry = Arc::new(WorkflowRegistry::new().with(Greet));
//! let router = Arc::new(EventRouter::new(store.clone(), registry.clone()));
//! router.register_trigger(Trigger::event("user.greeted"), Greet::NAME)?;
//!
//! let executor = Arc::new(WorkflowExecutor::new(store, registry, router.clone(), ExecutorConfig::default()));
//! router.emit(Event::new("user.greeted", json!("ada"))).await?;
//! executor.run_until_idle().await?;
//! ```

pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod router;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        Execution, ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor, WorkflowRegistry,
    };
    pub use crate::persistence::{
        InMemoryRunStore, PostgresRunStore, RunFilter, RunStatus, RunStore, StoreError,
        WorkflowRun,
    };
    pub use crate::reliability::RetryPolicy;
    pub use crate::router::{CronTick, EmitReceipt, Event, EventRouter, EventSink, Trigger};
    pub use crate::worker::{WorkerPool, WorkerPoolConfig};
    pub use crate::workflow::{
        FanOut, StepAttempt, StepContext, StepError, Workflow, WorkflowError,
    };
}

pub use engine::{
    Execution, ExecutorConfig, ExecutorError, RunOutcome, WorkflowExecutor, WorkflowRegistry,
};
pub use persistence::{
    InMemoryRunStore, InsertOutcome, PostgresRunStore, RunFilter, RunStatus, RunStore,
    StepOutcome, StepRecord, StoreError, WorkflowRun,
};
pub use reliability::RetryPolicy;
pub use router::{
    scheduled_tick, CronTick, EmitReceipt, Event, EventRouter, EventSink, RouterError, Trigger,
    TriggeredRun,
};
pub use worker::{PollerConfig, WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
pub use workflow::{
    FanOut, Interrupt, StepAttempt, StepContext, StepError, StepErrorKind, Workflow,
    WorkflowError,
};
