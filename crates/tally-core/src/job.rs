//! Job struct -- the central domain model for the tally system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{JobStatus, JobType};

/// A tracked AI job with its token/cost accounting.
///
/// `params` and `metadata` are opaque JSON documents preserved byte-for-byte;
/// callers attach whatever they need and tally never reifies the contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    // ===== Identification =====
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub job_type: JobType,

    #[serde(default)]
    pub status: JobStatus,

    // ===== Content =====
    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // ===== Provider accounting =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub input_tokens: i64,

    #[serde(default)]
    pub output_tokens: i64,

    #[serde(default)]
    pub total_cost: f64,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,

    // ===== Failure details =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    // ===== Opaque documents =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Box<serde_json::value::RawValue>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    // ===== Hierarchy =====
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<String>,

    // ===== Timestamps =====
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

pub(crate) fn default_currency() -> String {
    "USD".to_string()
}

impl Job {
    /// Returns `true` if the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Total token count across input and output.
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// Builder for constructing jobs in tests and callers that assemble jobs
/// directly rather than going through `CreateJobRequest`.
#[derive(Debug, Default)]
pub struct JobBuilder {
    job: Job,
}

impl Default for Job {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            job_type: JobType::default(),
            status: JobStatus::default(),
            title: String::new(),
            description: None,
            provider: None,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            total_cost: 0.0,
            currency: default_currency(),
            duration_ms: None,
            error_message: None,
            stack_trace: None,
            params: None,
            metadata: None,
            parent_job_id: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

impl JobBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        let mut job = Job::default();
        job.title = title.into();
        Self { job }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.job.id = id.into();
        self
    }

    pub fn job_type(mut self, t: JobType) -> Self {
        self.job.job_type = t;
        self
    }

    pub fn status(mut self, s: JobStatus) -> Self {
        self.job.status = s;
        self
    }

    pub fn provider(mut self, p: impl Into<String>) -> Self {
        self.job.provider = Some(p.into());
        self
    }

    pub fn model(mut self, m: impl Into<String>) -> Self {
        self.job.model = Some(m.into());
        self
    }

    pub fn tokens(mut self, input: i64, output: i64) -> Self {
        self.job.input_tokens = input;
        self.job.output_tokens = output;
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.job.completed_at = Some(at);
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}
