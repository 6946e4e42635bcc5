//! Job events -- the append-only timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{EventLevel, EventType};

/// A single immutable event on a job's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub job_id: String,

    #[serde(default)]
    pub event_type: EventType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub level: EventLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Timeline projection of an event, oldest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    /// The event type string as stored (transition entries carry the raw
    /// status name, e.g. `"running"`).
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub level: EventLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_defaults() {
        let json = r#"{"job_id":"j1","event_type":"progress"}"#;
        let ev: JobEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.level, EventLevel::Info);
        assert_eq!(ev.event_type, EventType::Progress);
        assert!(ev.message.is_none());
    }
}
