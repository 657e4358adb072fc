// Pipeline event names and payloads
//
// Payloads are the `Input` types of the event-triggered workflows. Cron
// workflows receive a `CronTick` instead.

use chrono::{DateTime, Utc};
use neofeed_core::{CaptureInput, FeedSource, WeekWindow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A capture or a discovered item to ingest
pub const FEED_PROCESS: &str = "feed.process";
/// One subscription to poll
pub const SUBSCRIPTION_POLL: &str = "subscription.poll";
/// One user's weekly report to generate
pub const REPORT_GENERATE: &str = "report.generate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedProcessRequest {
    pub user_id: Uuid,
    pub capture: CaptureInput,
    pub source: FeedSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<Uuid>,
}

impl FeedProcessRequest {
    pub fn capture(user_id: Uuid, capture: CaptureInput) -> Self {
        Self {
            user_id,
            capture,
            source: FeedSource::Capture,
            subscription_id: None,
        }
    }

    pub fn discovered(user_id: Uuid, subscription_id: Uuid, capture: CaptureInput) -> Self {
        Self {
            user_id,
            capture,
            source: FeedSource::Subscription,
            subscription_id: Some(subscription_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPollRequest {
    pub subscription_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportGenerateRequest {
    pub user_id: Uuid,
    pub week_start: DateTime<Utc>,
}

impl ReportGenerateRequest {
    pub fn window(&self) -> WeekWindow {
        WeekWindow::starting(self.week_start)
    }

    /// `<userId>:<weekStart>`
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.user_id, self.window().label())
    }
}
