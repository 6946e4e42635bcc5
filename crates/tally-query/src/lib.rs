//! Dashboard projections and usage aggregation with a TTL cache.
//!
//! Expensive aggregates are memoized for five minutes in a bounded
//! process-local cache; the facade evicts it on writes that could change
//! the numbers.

mod dashboard;
mod usage;

pub use dashboard::{ActivityEntry, DashboardStats};
pub use usage::{CostBreakdownRow, TrendPoint};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use tally_core::filter::{TrendGrouping, UsageFilter};
use tally_core::usage::UsageStats;
use tally_storage::{DatabaseManager, Result, UsageStatsRepository};

/// Memoization window for aggregate queries.
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on distinct memoized query shapes.
const CACHE_CAPACITY: u64 = 1000;

/// Read-side query layer over the shared database handle.
#[derive(Clone)]
pub struct QueryLayer {
    db: Arc<DatabaseManager>,
    stats_rows: UsageStatsRepository,
    cache: moka::sync::Cache<String, String>,
}

impl QueryLayer {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self {
            stats_rows: UsageStatsRepository::new(db.clone()),
            db,
            cache: moka::sync::Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }

    /// Drops every memoized aggregate. Called by the facade after writes.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    /// Aggregate snapshot for the dashboard over the trailing `days`.
    pub fn get_dashboard_stats(&self, days: u32) -> Result<DashboardStats> {
        self.cached(format!("dashboard:{days}"), || {
            dashboard::compute(&self.db, days)
        })
    }

    /// Usage rows matching the filter, each carrying its true grouping date.
    pub fn get_usage_stats(&self, filter: &UsageFilter) -> Result<Vec<UsageStats>> {
        self.cached(format!("usage_stats:{filter:?}"), || {
            self.stats_rows.get_usage_stats(filter)
        })
    }

    /// Per-(provider, model) spend over an explicit date range, most
    /// expensive first.
    pub fn get_cost_breakdown(
        &self,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Vec<CostBreakdownRow>> {
        self.cached(
            format!("cost_breakdown:{start}:{end}:{provider:?}:{model:?}"),
            || usage::cost_breakdown(&self.db, start, end, provider, model),
        )
    }

    /// Job volume/cost/token trend buckets over the trailing `days`, by
    /// calendar day or ISO week.
    pub fn get_usage_trends(&self, days: u32, group_by: TrendGrouping) -> Result<Vec<TrendPoint>> {
        self.cached(format!("trends:{days}:{group_by:?}"), || {
            usage::trends(&self.db, days, group_by)
        })
    }

    /// Runs `compute` through the TTL cache under `key`.
    fn cached<T>(&self, key: String, compute: impl FnOnce() -> Result<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(hit) = self.cache.get(&key) {
            if let Ok(value) = serde_json::from_str(&hit) {
                debug!(key, "aggregate cache hit");
                return Ok(value);
            }
            // A stale envelope that no longer deserializes falls through to
            // recompute.
        }
        let value = compute()?;
        if let Ok(json) = serde_json::to_string(&value) {
            self.cache.insert(key, json);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::enums::JobStatus;
    use tally_core::requests::{CreateJobRequest, UpdateJobRequest};
    use tally_storage::{JobRepository, MigrationEngine};

    fn setup() -> (Arc<DatabaseManager>, JobRepository, QueryLayer) {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        let jobs = JobRepository::new(db.clone(), true, true);
        let query = QueryLayer::new(db.clone());
        (db, jobs, query)
    }

    #[test]
    fn dashboard_is_cached_until_invalidated() {
        let (_db, jobs, query) = setup();
        jobs.create_job(CreateJobRequest {
            title: "a".into(),
            ..Default::default()
        })
        .unwrap();

        let first = query.get_dashboard_stats(30).unwrap();
        assert_eq!(first.total_jobs, 1);

        jobs.create_job(CreateJobRequest {
            title: "b".into(),
            ..Default::default()
        })
        .unwrap();

        // Cached: still 1 until eviction.
        let cached = query.get_dashboard_stats(30).unwrap();
        assert_eq!(cached.total_jobs, 1);

        query.invalidate();
        let fresh = query.get_dashboard_stats(30).unwrap();
        assert_eq!(fresh.total_jobs, 2);
    }

    #[test]
    fn dashboard_counts_statuses_and_cost() {
        let (_db, jobs, query) = setup();
        let a = jobs
            .create_job(CreateJobRequest {
                title: "a".into(),
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .unwrap();
        jobs.update_job(
            &a.id,
            UpdateJobRequest {
                status: Some(JobStatus::Completed),
                total_cost: Some(0.25),
                input_tokens: Some(100),
                output_tokens: Some(50),
                ..Default::default()
            },
        )
        .unwrap();
        let b = jobs
            .create_job(CreateJobRequest {
                title: "b".into(),
                ..Default::default()
            })
            .unwrap();
        jobs.update_job(&b.id, UpdateJobRequest::status(JobStatus::Failed))
            .unwrap();

        let stats = query.get_dashboard_stats(7).unwrap();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.completed_jobs, 1);
        assert_eq!(stats.failed_jobs, 1);
        assert!((stats.total_cost - 0.25).abs() < 1e-9);
        assert_eq!(stats.total_tokens, 150);
        assert_eq!(stats.jobs_by_status.get("completed"), Some(&1));
        assert_eq!(stats.cost_by_provider.get("openai"), Some(&0.25));
        // created + completed + created + failed
        assert_eq!(stats.recent_activity.len(), 4);
    }
}
