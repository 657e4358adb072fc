// Subscription discovery workflows
//
// The cron tick fans out one subscription.poll run per due subscription,
// so each subscription fails and retries on its own. A poll reads the
// source, emits feed.process for items missing from the watermark, then
// advances the watermark.

use async_trait::async_trait;
use neofeed_core::subscription::MAX_ITEMS_PER_POLL;
use neofeed_core::{CaptureInput, FeedItem, SubscriptionState};
use neofeed_durable::{
    CronTick, Event, FanOut, RetryPolicy, StepContext, Workflow, WorkflowError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::PipelineDeps;
use crate::events::{FeedProcessRequest, SubscriptionPollRequest, FEED_PROCESS, SUBSCRIPTION_POLL};

fn event_error(e: serde_json::Error) -> WorkflowError {
    WorkflowError::Unexpected(format!("event payload: {e}"))
}

// ============================================================================
// Tick
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickOutput {
    pub due: usize,
    pub fan_out: FanOut,
}

pub struct DiscoveryTickWorkflow {
    deps: PipelineDeps,
    retry: RetryPolicy,
}

impl DiscoveryTickWorkflow {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            deps,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Workflow for DiscoveryTickWorkflow {
    const NAME: &'static str = "discovery-tick";
    type Input = CronTick;
    type Output = TickOutput;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(&self, ctx: &StepContext, tick: CronTick) -> Result<TickOutput, WorkflowError> {
        let subscriptions = self.deps.subscriptions.clone();
        let at = tick.scheduled_at;
        let due: Vec<Uuid> = ctx
            .step("list-due", |_| async move {
                Ok(subscriptions
                    .list_active_subscriptions()
                    .await?
                    .into_iter()
                    .filter(|s| s.is_due(at))
                    .map(|s| s.subscription_id)
                    .collect())
            })
            .await?;

        let tick_label = at.to_rfc3339();
        let events = due
            .iter()
            .map(|&subscription_id| {
                Event::from_data(SUBSCRIPTION_POLL, &SubscriptionPollRequest { subscription_id })
                    .map(|e| e.with_dedupe_key(format!("{subscription_id}:{tick_label}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(event_error)?;

        let fan_out = ctx.send_events("fan-out", events).await?;
        info!(due = due.len(), started = fan_out.started, "discovery tick fanned out");
        Ok(TickOutput {
            due: due.len(),
            fan_out,
        })
    }
}

// ============================================================================
// Poll
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOutput {
    pub subscription_id: Uuid,
    /// Missing or inactive subscription
    pub skipped: bool,
    pub candidates: usize,
    pub new_items: usize,
    pub started: usize,
    pub deduplicated: usize,
    pub watermark_len: usize,
}

pub struct SubscriptionPollWorkflow {
    deps: PipelineDeps,
    watermark_capacity: usize,
    retry: RetryPolicy,
}

impl SubscriptionPollWorkflow {
    pub fn new(deps: PipelineDeps, watermark_capacity: usize) -> Self {
        Self {
            deps,
            watermark_capacity,
            retry: RetryPolicy::exponential().with_max_attempts(3),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What to ingest for a discovered item: its link, else its text
fn capture_for(item: &FeedItem) -> Option<CaptureInput> {
    let non_empty = |s: &&String| !s.trim().is_empty();
    if let Some(link) = item.link.as_ref().filter(non_empty) {
        return Some(CaptureInput::url(link.trim()));
    }
    item.summary
        .as_ref()
        .filter(non_empty)
        .or(item.title.as_ref().filter(non_empty))
        .map(|text| CaptureInput::text(text.clone()))
}

#[async_trait]
impl Workflow for SubscriptionPollWorkflow {
    const NAME: &'static str = "subscription-poll";
    type Input = SubscriptionPollRequest;
    type Output = PollOutput;

    fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone()
    }

    async fn run(
        &self,
        ctx: &StepContext,
        input: SubscriptionPollRequest,
    ) -> Result<PollOutput, WorkflowError> {
        let subscription_id = input.subscription_id;

        let subscriptions = self.deps.subscriptions.clone();
        let state: Option<SubscriptionState> = ctx
            .step("load-subscription", |_| async move {
                Ok(subscriptions.read_subscription(subscription_id).await?)
            })
            .await?;
        let Some(state) = state.filter(|s| s.active) else {
            debug!(%subscription_id, "subscription missing or inactive");
            return Ok(PollOutput {
                subscription_id,
                skipped: true,
                ..Default::default()
            });
        };

        let reader = self.deps.feed_reader.clone();
        let source_url = state.source_url.clone();
        let read = ctx
            .step("read-feed", |_| async move {
                let mut items = reader.read_feed(&source_url).await?;
                items.truncate(MAX_ITEMS_PER_POLL);
                Ok(items)
            })
            .await;

        let items: Vec<FeedItem> = match read {
            Ok(items) => items,
            Err(WorkflowError::StepFailed { step, error }) => {
                warn!(%subscription_id, error = %error, "subscription poll failed");
                let subscriptions = self.deps.subscriptions.clone();
                let message = error.message().to_string();
                ctx.step("record-failure", |_| async move {
                    if let Some(mut fresh) = subscriptions.read_subscription(subscription_id).await? {
                        fresh.record_failure(message);
                        subscriptions.write_subscription(&fresh).await?;
                    }
                    Ok(())
                })
                .await?;
                return Err(WorkflowError::StepFailed { step, error });
            }
            Err(other) => return Err(other),
        };

        // Newest first from the reader; record oldest first so eviction drops old ids
        let unseen = state.unseen(&items);
        let unseen_ids: Vec<String> = unseen.iter().rev().map(|item| item.id.clone()).collect();

        let user_id = state.user_id;
        let events = unseen
            .iter()
            .filter_map(|item| {
                let capture = capture_for(item)?;
                let request = FeedProcessRequest::discovered(user_id, subscription_id, capture);
                Some(
                    Event::from_data(FEED_PROCESS, &request)
                        .map(|e| e.with_dedupe_key(format!("{subscription_id}:{}", item.id))),
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(event_error)?;

        let fan_out = ctx.send_events("emit-items", events).await?;

        let subscriptions = self.deps.subscriptions.clone();
        let capacity = self.watermark_capacity;
        let watermark_len: usize = ctx
            .step("advance-watermark", |_| async move {
                let Some(mut fresh) = subscriptions.read_subscription(subscription_id).await? else {
                    return Ok(0);
                };
                fresh.record_poll(unseen_ids, capacity, chrono::Utc::now());
                subscriptions.write_subscription(&fresh).await?;
                Ok(fresh.last_seen_item_ids.len())
            })
            .await?;

        info!(
            %subscription_id,
            candidates = items.len(),
            new_items = unseen.len(),
            started = fan_out.started,
            "subscription polled"
        );

        Ok(PollOutput {
            subscription_id,
            skipped: false,
            candidates: items.len(),
            new_items: unseen.len(),
            started: fan_out.started,
            deduplicated: fan_out.deduplicated,
            watermark_len,
        })
    }
}
