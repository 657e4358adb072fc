//! NeoFeed pipeline worker
//!
//! The background pipeline built on `neofeed-durable`: capture ingestion,
//! subscription discovery with watermarks, discovery cleanup and weekly
//! reports, plus the HTTP collaborators and the trigger API in front of it.

pub mod adapters;
pub mod api;
pub mod config;
pub mod events;
pub mod http;
pub mod pipeline;
pub mod workflows;

#[cfg(test)]
mod test_support;

pub use api::{ApiError, CaptureAccepted, PipelineApi, ReportTriggered, RunDetail, RunQuery, RunView};
pub use config::WorkerConfig;
pub use events::{
    FeedProcessRequest, ReportGenerateRequest, SubscriptionPollRequest, FEED_PROCESS,
    REPORT_GENERATE, SUBSCRIPTION_POLL,
};
pub use pipeline::{Pipeline, PipelineSettings};
pub use workflows::PipelineDeps;
