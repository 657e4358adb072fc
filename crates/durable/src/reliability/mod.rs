//! Reliability primitives for step execution
//!
//! - [`RetryPolicy`] - bounded exponential backoff for transient step failures

mod retry;

pub use retry::RetryPolicy;
