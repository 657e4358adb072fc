//! Persistence layer for durable execution
//!
//! This module provides:
//! - [`RunStore`] trait for workflow runs and memoized step results
//! - [`InMemoryRunStore`] for tests and database-less runs
//! - [`PostgresRunStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;
pub use store::{
    InsertOutcome, RunFilter, RunStatus, RunStore, StepOutcome, StepRecord, StoreError,
    WorkflowRun,
};
