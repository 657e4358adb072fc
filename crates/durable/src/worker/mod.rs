//! Worker pool for run execution
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       WorkerPool                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │  RunPoller  │  │  Heartbeat  │  │  Stale Reclaimer │  │
//! │  │ (backoff +  │  │    (5s)     │  │      (30s)       │  │
//! │  │  wakeups)   │  └─────────────┘  └──────────────────┘  │
//! │  └──────┬──────┘                                          │
//! │         ▼                                                 │
//! │  ┌────────────────────────────────────────────────────┐  │
//! │  │   WorkflowExecutor::process_claimed (Semaphore)    │  │
//! │  │   [run 1] [run 2] ... [run N]                      │  │
//! │  └────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod poller;
mod pool;

pub use poller::{PollerConfig, RunPoller};
pub use pool::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStatus};
