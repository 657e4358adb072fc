//! Workflow triggers

use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};

/// What starts a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// Exact event name match
    Event(String),

    /// Six-field cron expression (`sec min hour day-of-month month day-of-week`)
    Cron(String),
}

impl Trigger {
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron(expression.into())
    }

    pub fn matches_event(&self, event_name: &str) -> bool {
        matches!(self, Self::Event(name) if name == event_name)
    }

    /// Name of the synthetic event a cron trigger emits for `workflow`
    pub fn cron_event_name(workflow: &str) -> String {
        format!("cron/{workflow}")
    }

    /// Shallow check that a cron expression has six or seven fields. The
    /// scheduler validates the fields themselves when it starts.
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            Self::Event(name) if name.trim().is_empty() => Err("empty event name".to_string()),
            Self::Event(_) => Ok(()),
            Self::Cron(expr) => {
                let fields = expr.split_whitespace().count();
                if (6..=7).contains(&fields) {
                    Ok(())
                } else {
                    Err(format!(
                        "cron expression '{expr}' has {fields} fields, expected 6 or 7"
                    ))
                }
            }
        }
    }
}

/// The latest tick of `schedule` at or before `at`: the tick a scheduler
/// callback running at `at` belongs to.
pub fn scheduled_tick(schedule: &Schedule, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let whole_second = at.with_nanosecond(0).unwrap_or(at);
    // prev_from is strict, so start one second past `at`
    schedule.after(&(whole_second + Duration::seconds(1))).next_back()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_name_match() {
        let trigger = Trigger::event("feed.process");
        assert!(trigger.matches_event("feed.process"));
        assert!(!trigger.matches_event("feed.process.v2"));
        assert!(!trigger.matches_event("feed"));
        assert!(!Trigger::cron("0 * * * * *").matches_event("feed.process"));
    }

    #[test]
    fn test_scheduled_tick_ignores_callback_lateness() {
        use chrono::TimeZone;
        use std::str::FromStr;

        let hourly = Schedule::from_str("0 0 * * * *").unwrap();
        let tick = Utc.with_ymd_and_hms(2026, 10, 12, 10, 0, 0).unwrap();
        for late_ms in [0, 998, 1_003, 59_000] {
            let fired = tick + Duration::milliseconds(late_ms);
            assert_eq!(scheduled_tick(&hourly, fired), Some(tick), "{late_ms}ms late");
        }
        assert_eq!(
            scheduled_tick(&hourly, tick - Duration::milliseconds(1)),
            Some(tick - Duration::hours(1))
        );
    }

    #[test]
    fn test_validate() {
        assert!(Trigger::cron("0 */30 * * * *").validate().is_ok());
        assert!(Trigger::cron("0 0 9 * * MON").validate().is_ok());
        assert!(Trigger::cron("*/30 * * * *").validate().is_err());
        assert!(Trigger::event(" ").validate().is_err());
    }
}
