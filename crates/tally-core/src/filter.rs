//! Filter types for list queries.

use chrono::{DateTime, NaiveDate, Utc};

use crate::enums::{
    ArtifactType, EventLevel, EventType, JobSortField, JobStatus, JobType, SortDirection,
};

/// Filter for job queries. All fields AND together.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub title_contains: Option<String>,

    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,

    pub duration_min_ms: Option<i64>,
    pub duration_max_ms: Option<i64>,
    pub cost_min: Option<f64>,
    pub cost_max: Option<f64>,

    pub parent_job_id: Option<String>,

    /// `Some(true)` = only jobs with an error message, `Some(false)` = only
    /// jobs without one.
    pub has_error: Option<bool>,
}

/// Sort order for job queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobSort {
    pub field: JobSortField,
    pub direction: SortDirection,
}

/// Filter for artifact queries.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFilter {
    pub job_id: Option<String>,
    pub artifact_type: Option<ArtifactType>,
    pub name_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Soft-deleted rows are hidden unless set.
    pub include_deleted: bool,
}

/// Filter for event queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub job_id: Option<String>,
    pub event_type: Option<EventType>,
    pub level: Option<EventLevel>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Filter for cost-rate listings.
#[derive(Debug, Clone, Default)]
pub struct CostRateFilter {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Only rates whose window covers this date.
    pub active_on: Option<NaiveDate>,
}

/// Filter for usage-stat reads.
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub date_after: Option<NaiveDate>,
    pub date_before: Option<NaiveDate>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub job_type: Option<JobType>,
    /// Include `_weekly_` rollup rows (excluded by default).
    pub include_weekly: bool,
}

/// Bucket granularity for usage trends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendGrouping {
    Day,
    Week,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_filter_defaults() {
        let f = JobFilter::default();
        assert!(f.status.is_none());
        assert!(f.has_error.is_none());
        assert!(f.parent_job_id.is_none());
    }

    #[test]
    fn job_sort_defaults_to_created_desc() {
        let s = JobSort::default();
        assert_eq!(s.field.column(), "created_at");
        assert_eq!(s.direction.as_sql(), "DESC");
    }
}
