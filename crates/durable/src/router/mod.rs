//! Event routing
//!
//! Producers (API calls, cron ticks, fan-out steps) emit [`Event`]s. The
//! [`EventRouter`] matches them against registered [`Trigger`]s and creates
//! one pending run per matching workflow, collapsing duplicates that carry
//! the same dedupe key.

mod event;
#[allow(clippy::module_inception)]
mod router;
mod trigger;

pub use event::{CronTick, EmitReceipt, Event, TriggeredRun};
pub use router::{EventRouter, EventSink, RouterError, DEFAULT_DEDUPE_WINDOW};
pub use trigger::{scheduled_tick, Trigger};
