//! Request types submitted by external callers.
//!
//! Updates are typed partial structs: `Some` fields are applied, `None`
//! fields are left unchanged.

use chrono::NaiveDate;

use crate::enums::{ArtifactType, EventLevel, EventType, JobStatus, JobType};

/// Input for creating a job. Jobs always start `pending`.
#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    /// Caller-supplied id; a v4 UUID is assigned when absent.
    pub id: Option<String>,
    pub job_type: JobType,
    pub title: String,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub params: Option<Box<serde_json::value::RawValue>>,
    pub metadata: Option<Box<serde_json::value::RawValue>>,
    pub parent_job_id: Option<String>,
}

/// Partial update for a job.
#[derive(Debug, Clone, Default)]
pub struct UpdateJobRequest {
    pub status: Option<JobStatus>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub metadata: Option<Box<serde_json::value::RawValue>>,
}

impl UpdateJobRequest {
    /// Shorthand for a bare status transition.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Input for storing an artifact.
#[derive(Debug, Clone, Default)]
pub struct CreateArtifactRequest {
    pub id: Option<String>,
    pub job_id: String,
    pub artifact_type: ArtifactType,
    pub name: String,
    /// The artifact bytes. Hashed (chunked) and stored content-addressed.
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub metadata: Option<Box<serde_json::value::RawValue>>,
}

/// Partial update for artifact metadata. Only the name and the opaque
/// metadata document are mutable; content is immutable by construction.
#[derive(Debug, Clone, Default)]
pub struct UpdateArtifactRequest {
    pub name: Option<String>,
    pub metadata: Option<Box<serde_json::value::RawValue>>,
}

/// Input for appending an event.
#[derive(Debug, Clone, Default)]
pub struct CreateEventRequest {
    pub id: Option<String>,
    pub job_id: String,
    pub event_type: EventType,
    pub message: Option<String>,
    /// Defaults to `info`.
    pub level: Option<EventLevel>,
    pub data: Option<Box<serde_json::value::RawValue>>,
    pub metadata: Option<Box<serde_json::value::RawValue>>,
}

/// Input for registering a cost rate.
#[derive(Debug, Clone)]
pub struct CreateCostRateRequest {
    pub provider: String,
    pub model: String,
    /// Currency units per 1 000 input tokens.
    pub input_token_rate: f64,
    /// Currency units per 1 000 output tokens.
    pub output_token_rate: f64,
    pub currency: Option<String>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}
