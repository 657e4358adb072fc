//! Event and emission types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A named occurrence with an opaque JSON payload. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    /// Caller-supplied identity; duplicate emissions with the same
    /// (name, dedupe_key) collapse into one run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_key: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            payload,
            dedupe_key: None,
            emitted_at: Utc::now(),
        }
    }

    /// Build an event from a typed payload
    pub fn from_data<T: Serialize>(
        name: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, serde_json::to_value(data)?))
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Identity used for at-least-once delivery: the dedupe key when given,
    /// otherwise the generated id
    pub fn identity(&self) -> String {
        self.dedupe_key
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Payload of the synthetic event a cron trigger emits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronTick {
    pub scheduled_at: DateTime<Utc>,
}

/// One workflow matched by an emitted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredRun {
    pub workflow: String,
    pub run_id: Uuid,
    /// True if an existing run was reused instead of starting a new one
    pub duplicate: bool,
}

/// What an emission did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitReceipt {
    pub event_id: Uuid,
    pub runs: Vec<TriggeredRun>,
}

impl EmitReceipt {
    pub fn started(&self) -> impl Iterator<Item = &TriggeredRun> {
        self.runs.iter().filter(|r| !r.duplicate)
    }

    pub fn deduplicated(&self) -> impl Iterator<Item = &TriggeredRun> {
        self.runs.iter().filter(|r| r.duplicate)
    }

    pub fn run_ids(&self) -> Vec<Uuid> {
        self.runs.iter().map(|r| r.run_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_prefers_dedupe_key() {
        let event = Event::new("feed.process", json!({}));
        assert_eq!(event.identity(), event.id.to_string());
        assert_eq!(event.with_dedupe_key("item-1").identity(), "item-1");
    }

    #[test]
    fn test_missing_dedupe_key_deserializes() {
        let event: Event = serde_json::from_value(json!({
            "id": Uuid::now_v7(),
            "name": "x",
            "payload": null,
            "emitted_at": Utc::now(),
        }))
        .unwrap();
        assert!(event.dedupe_key.is_none());
    }

    #[test]
    fn test_receipt_partitions_runs() {
        let receipt = EmitReceipt {
            event_id: Uuid::now_v7(),
            runs: vec![
                TriggeredRun {
                    workflow: "a".into(),
                    run_id: Uuid::now_v7(),
                    duplicate: false,
                },
                TriggeredRun {
                    workflow: "b".into(),
                    run_id: Uuid::now_v7(),
                    duplicate: true,
                },
            ],
        };
        assert_eq!(receipt.started().count(), 1);
        assert_eq!(receipt.deduplicated().count(), 1);
        assert_eq!(receipt.run_ids().len(), 2);
    }
}
