//! Cost rates and derived usage rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A time-versioned price for one (provider, model) pair.
///
/// Rates are USD (or `currency`) per 1 000 tokens. At most one rate is
/// effective for a pair on any given date; the effective rate is the one
/// whose window contains the date, latest `effective_from` winning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRate {
    pub id: String,
    pub provider: String,
    pub model: String,
    pub input_token_rate: f64,
    pub output_token_rate: f64,
    #[serde(default = "crate::job::default_currency")]
    pub currency: String,
    pub effective_from: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<NaiveDate>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CostRate {
    /// Whether this rate's window contains `date`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.is_none_or(|to| to >= date)
    }
}

/// One aggregated usage row, keyed by
/// `"<date>_<provider>_<model>_<job_type>"` (weekly rows are prefixed with
/// `_weekly_` and `date` is the week start).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub id: String,
    pub date: NaiveDate,
    pub provider: String,
    pub model: String,
    pub job_type: String,
    pub total_jobs: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost: f64,
    pub average_duration_ms: f64,
    /// Percentage 0-100.
    pub success_rate: f64,
    #[serde(default = "crate::job::default_currency")]
    pub currency: String,
}

impl UsageStats {
    /// Composite id for a daily row.
    pub fn daily_id(date: NaiveDate, provider: &str, model: &str, job_type: &str) -> String {
        format!("{}_{provider}_{model}_{job_type}", date.format("%Y-%m-%d"))
    }

    /// Composite id for a weekly row (week starting `week_start`).
    pub fn weekly_id(week_start: NaiveDate, provider: &str, model: &str, job_type: &str) -> String {
        format!(
            "_weekly_{}_{provider}_{model}_{job_type}",
            week_start.format("%Y-%m-%d")
        )
    }

    /// Whether this row came from a weekly rollup.
    pub fn is_weekly(&self) -> bool {
        self.id.starts_with("_weekly_")
    }
}
