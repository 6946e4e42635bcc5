//! Daily and weekly usage rollups.
//!
//! Rollups re-derive `usage_stats` rows from finished jobs and upsert on the
//! composite id, so they are idempotent and supersede any single-job capture
//! rows for the same key.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use tally_core::usage::UsageStats;
use tally_storage::sql::format_date;
use tally_storage::{
    DatabaseCode, DatabaseManager, Result, StoreError, UsageStatsRepository,
};

/// One aggregated (provider, model, type) combination.
struct Combo {
    provider: String,
    model: String,
    job_type: String,
    total_jobs: i64,
    input_tokens: i64,
    output_tokens: i64,
    total_cost: f64,
    average_duration_ms: f64,
    completed: i64,
    currency: String,
}

/// Re-aggregates finished jobs into `usage_stats` rows.
#[derive(Clone)]
pub struct RollupEngine {
    db: Arc<DatabaseManager>,
    stats: UsageStatsRepository,
}

impl RollupEngine {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self {
            stats: UsageStatsRepository::new(db.clone()),
            db,
        }
    }

    /// Rolls up all finished jobs created on `date`. Returns the number of
    /// rows upserted. Per-combination failures are logged, not propagated.
    pub fn perform_daily_rollup(&self, date: NaiveDate) -> Result<usize> {
        let combos = self.aggregate(&format_date(date), &format_date(date))?;
        let mut written = 0;
        for combo in combos {
            let id = UsageStats::daily_id(date, &combo.provider, &combo.model, &combo.job_type);
            let row = combo.into_stats(id, date);
            match self.stats.upsert(&row) {
                Ok(()) => written += 1,
                Err(e) => warn!(id = %row.id, "daily rollup upsert failed: {e}"),
            }
        }
        info!(%date, rows = written, "daily rollup complete");
        Ok(written)
    }

    /// Rolls up the Sun-Sat week starting at `week_start`. Row ids carry the
    /// `_weekly_` prefix.
    pub fn perform_weekly_rollup(&self, week_start: NaiveDate) -> Result<usize> {
        let week_end = week_start + chrono::Duration::days(6);
        let combos = self.aggregate(&format_date(week_start), &format_date(week_end))?;
        let mut written = 0;
        for combo in combos {
            let id = UsageStats::weekly_id(
                week_start,
                &combo.provider,
                &combo.model,
                &combo.job_type,
            );
            let row = combo.into_stats(id, week_start);
            match self.stats.upsert(&row) {
                Ok(()) => written += 1,
                Err(e) => warn!(id = %row.id, "weekly rollup upsert failed: {e}"),
            }
        }
        info!(%week_start, rows = written, "weekly rollup complete");
        Ok(written)
    }

    /// Deletes usage rows older than `retention_days`.
    pub fn cleanup_old_stats(&self, retention_days: u32) -> Result<usize> {
        self.stats.cleanup_old_stats(retention_days)
    }

    /// Distinct (provider, model, type) aggregates over finished jobs
    /// created in the inclusive date range.
    fn aggregate(&self, start: &str, end: &str) -> Result<Vec<Combo>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT COALESCE(provider, 'unknown'), COALESCE(model, 'unknown'), type,
                            COUNT(*),
                            COALESCE(SUM(input_tokens), 0),
                            COALESCE(SUM(output_tokens), 0),
                            COALESCE(SUM(total_cost), 0),
                            COALESCE(AVG(duration_ms), 0),
                            COALESCE(SUM(status = 'completed'), 0),
                            MAX(currency)
                     FROM jobs
                     WHERE date(created_at) >= ?1 AND date(created_at) <= ?2
                       AND status IN ('completed', 'failed')
                     GROUP BY 1, 2, 3",
                )
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map([start, end], |row| {
                    Ok(Combo {
                        provider: row.get(0)?,
                        model: row.get(1)?,
                        job_type: row.get(2)?,
                        total_jobs: row.get(3)?,
                        input_tokens: row.get(4)?,
                        output_tokens: row.get(5)?,
                        total_cost: row.get(6)?,
                        average_duration_ms: row.get(7)?,
                        completed: row.get(8)?,
                        currency: row.get(9)?,
                    })
                })
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut combos = Vec::new();
            for row in rows {
                combos.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(combos)
        })
    }
}

impl Combo {
    fn into_stats(self, id: String, date: NaiveDate) -> UsageStats {
        let success_rate = if self.total_jobs > 0 {
            self.completed as f64 / self.total_jobs as f64 * 100.0
        } else {
            0.0
        };
        UsageStats {
            id,
            date,
            provider: self.provider,
            model: self.model,
            job_type: self.job_type,
            total_jobs: self.total_jobs,
            total_input_tokens: self.input_tokens,
            total_output_tokens: self.output_tokens,
            total_cost: self.total_cost,
            average_duration_ms: self.average_duration_ms,
            success_rate,
            currency: self.currency,
        }
    }
}
