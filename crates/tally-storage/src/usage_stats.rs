//! Row-level access to the derived `usage_stats` table.
//!
//! Rows are written by the usage tracker (single-job captures) and the
//! rollup engine (aggregates); both upsert on the composite id, so rollups
//! deterministically supersede captures.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Row, params};
use tracing::debug;

use tally_core::filter::UsageFilter;
use tally_core::usage::UsageStats;

use crate::error::{DatabaseCode, Result, StoreError};
use crate::manager::DatabaseManager;
use crate::sql::{SqlWhere, format_date, parse_date};

const STATS_COLUMNS: &str = r#"
    id, date, provider, model, job_type, total_jobs,
    total_input_tokens, total_output_tokens, total_cost,
    average_duration_ms, success_rate, currency
"#;

pub(crate) fn scan_stats(row: &Row<'_>) -> rusqlite::Result<UsageStats> {
    let date: String = row.get("date")?;
    Ok(UsageStats {
        id: row.get("id")?,
        date: parse_date(&date),
        provider: row.get("provider")?,
        model: row.get("model")?,
        job_type: row.get("job_type")?,
        total_jobs: row.get("total_jobs")?,
        total_input_tokens: row.get("total_input_tokens")?,
        total_output_tokens: row.get("total_output_tokens")?,
        total_cost: row.get("total_cost")?,
        average_duration_ms: row.get("average_duration_ms")?,
        success_rate: row.get("success_rate")?,
        currency: row.get("currency")?,
    })
}

/// Upserts and reads `usage_stats` rows.
#[derive(Clone)]
pub struct UsageStatsRepository {
    db: Arc<DatabaseManager>,
}

impl UsageStatsRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Writes one row, replacing any row with the same composite id.
    pub fn upsert(&self, stats: &UsageStats) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO usage_stats
                     (id, date, provider, model, job_type, total_jobs,
                      total_input_tokens, total_output_tokens, total_cost,
                      average_duration_ms, success_rate, currency)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                     date = excluded.date,
                     provider = excluded.provider,
                     model = excluded.model,
                     job_type = excluded.job_type,
                     total_jobs = excluded.total_jobs,
                     total_input_tokens = excluded.total_input_tokens,
                     total_output_tokens = excluded.total_output_tokens,
                     total_cost = excluded.total_cost,
                     average_duration_ms = excluded.average_duration_ms,
                     success_rate = excluded.success_rate,
                     currency = excluded.currency",
                params![
                    stats.id,
                    format_date(stats.date),
                    stats.provider,
                    stats.model,
                    stats.job_type,
                    stats.total_jobs,
                    stats.total_input_tokens,
                    stats.total_output_tokens,
                    stats.total_cost,
                    stats.average_duration_ms,
                    stats.success_rate,
                    stats.currency,
                ],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            Ok(())
        })
    }

    /// Reads rows matching the filter, ordered by date then key.
    pub fn get_usage_stats(&self, filter: &UsageFilter) -> Result<Vec<UsageStats>> {
        let mut w = SqlWhere::new();
        if !filter.include_weekly {
            w.push("id NOT LIKE ? ESCAPE '\\'", "\\_weekly\\_%".to_string());
        }
        if let Some(after) = filter.date_after {
            w.push("date >= ?", format_date(after));
        }
        if let Some(before) = filter.date_before {
            w.push("date <= ?", format_date(before));
        }
        if let Some(ref provider) = filter.provider {
            w.push("provider = ?", provider.clone());
        }
        if let Some(ref model) = filter.model {
            w.push("model = ?", model.clone());
        }
        if let Some(ref job_type) = filter.job_type {
            w.push("job_type = ?", job_type.as_str().to_string());
        }

        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM usage_stats {}
             ORDER BY date DESC, provider, model, job_type",
            w.sql()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(w.params().as_slice(), scan_stats)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut stats = Vec::new();
            for row in rows {
                stats.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(stats)
        })
    }

    /// Reads one row by composite id.
    pub fn get_by_id(&self, id: &str) -> Result<Option<UsageStats>> {
        let sql = format!("SELECT {STATS_COLUMNS} FROM usage_stats WHERE id = ?1");
        self.db.with_conn(|conn| {
            match conn.query_row(&sql, params![id], scan_stats) {
                Ok(stats) => Ok(Some(stats)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(StoreError::db(DatabaseCode::QueryFailed, e)),
            }
        })
    }

    /// Deletes rows older than `retention_days`. Returns rows removed.
    pub fn cleanup_old_stats(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = format_date(cutoff.date_naive());
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM usage_stats WHERE date < ?1",
                params![cutoff_str],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
        })?;
        if removed > 0 {
            debug!(removed, retention_days, "pruned old usage stats");
        }
        Ok(removed)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationEngine;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn repo() -> UsageStatsRepository {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        UsageStatsRepository::new(db)
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn row(date: &str, provider: &str, total_jobs: i64) -> UsageStats {
        UsageStats {
            id: UsageStats::daily_id(d(date), provider, "m", "chat"),
            date: d(date),
            provider: provider.into(),
            model: "m".into(),
            job_type: "chat".into(),
            total_jobs,
            total_input_tokens: 100,
            total_output_tokens: 50,
            total_cost: 0.5,
            average_duration_ms: 1200.0,
            success_rate: 100.0,
            currency: "USD".into(),
        }
    }

    #[test]
    fn upsert_replaces_on_same_id() {
        let repo = repo();
        repo.upsert(&row("2024-08-01", "openai", 1)).unwrap();
        repo.upsert(&row("2024-08-01", "openai", 12)).unwrap();

        let all = repo.get_usage_stats(&UsageFilter::default()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].total_jobs, 12);
    }

    #[test]
    fn filter_by_date_range_and_provider() {
        let repo = repo();
        repo.upsert(&row("2024-07-01", "openai", 1)).unwrap();
        repo.upsert(&row("2024-08-01", "openai", 2)).unwrap();
        repo.upsert(&row("2024-08-01", "anthropic", 3)).unwrap();

        let filter = UsageFilter {
            date_after: Some(d("2024-07-15")),
            provider: Some("openai".into()),
            ..Default::default()
        };
        let rows = repo.get_usage_stats(&filter).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_jobs, 2);
        // Each row reports its true grouping date.
        assert_eq!(rows[0].date, d("2024-08-01"));
    }

    #[test]
    fn weekly_rows_hidden_by_default() {
        let repo = repo();
        repo.upsert(&row("2024-08-01", "openai", 2)).unwrap();
        let mut weekly = row("2024-07-28", "openai", 9);
        weekly.id = UsageStats::weekly_id(d("2024-07-28"), "openai", "m", "chat");
        repo.upsert(&weekly).unwrap();

        let daily_only = repo.get_usage_stats(&UsageFilter::default()).unwrap();
        assert_eq!(daily_only.len(), 1);

        let with_weekly = repo
            .get_usage_stats(&UsageFilter {
                include_weekly: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(with_weekly.len(), 2);
    }

    #[test]
    fn cleanup_prunes_by_date() {
        let repo = repo();
        repo.upsert(&row("2020-01-01", "openai", 1)).unwrap();
        let today = Utc::now().date_naive();
        repo.upsert(&row(&format_date(today), "openai", 2)).unwrap();

        let removed = repo.cleanup_old_stats(90).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.get_usage_stats(&UsageFilter::default()).unwrap().len(), 1);
    }
}
