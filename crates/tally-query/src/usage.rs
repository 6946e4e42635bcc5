//! Cost breakdown and trend aggregations over the jobs table.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use tally_core::filter::TrendGrouping;
use tally_storage::{DatabaseCode, DatabaseManager, Result, StoreError};

/// Spend for one (provider, model) pair over a range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdownRow {
    pub provider: String,
    pub model: String,
    pub total_cost: f64,
    pub total_jobs: i64,
    pub total_tokens: i64,
    pub currency: String,
}

/// One trend bucket (a calendar day `2024-08-01` or ISO week `2024-W31`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket: String,
    pub total_jobs: i64,
    pub total_cost: f64,
    pub total_tokens: i64,
}

/// Per-(provider, model) spend between `start` and `end` inclusive, most
/// expensive first.
pub(crate) fn cost_breakdown(
    db: &Arc<DatabaseManager>,
    start: NaiveDate,
    end: NaiveDate,
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<Vec<CostBreakdownRow>> {
    let start_str = start.format("%Y-%m-%d").to_string();
    let end_str = end.format("%Y-%m-%d").to_string();

    let mut sql = String::from(
        "SELECT COALESCE(provider, 'unknown'), COALESCE(model, 'unknown'),
                SUM(total_cost), COUNT(*),
                COALESCE(SUM(input_tokens + output_tokens), 0),
                MAX(currency)
         FROM jobs
         WHERE date(created_at) >= ?1 AND date(created_at) <= ?2",
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(start_str), Box::new(end_str)];
    if let Some(provider) = provider {
        sql.push_str(" AND provider = ?3");
        params.push(Box::new(provider.to_string()));
    }
    if let Some(model) = model {
        sql.push_str(&format!(" AND model = ?{}", params.len() + 1));
        params.push(Box::new(model.to_string()));
    }
    sql.push_str(" GROUP BY 1, 2 ORDER BY SUM(total_cost) DESC");

    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), |row| {
                Ok(CostBreakdownRow {
                    provider: row.get(0)?,
                    model: row.get(1)?,
                    total_cost: row.get(2)?,
                    total_jobs: row.get(3)?,
                    total_tokens: row.get(4)?,
                    currency: row.get(5)?,
                })
            })
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?);
        }
        Ok(out)
    })
}

/// Per-day job volume over the trailing `days`, optionally folded into ISO
/// weeks.
pub(crate) fn trends(
    db: &Arc<DatabaseManager>,
    days: u32,
    group_by: TrendGrouping,
) -> Result<Vec<TrendPoint>> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(i64::from(days)))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string();

    let daily: Vec<(String, i64, f64, i64)> = db.with_conn(|conn| {
        let mut stmt = conn
            .prepare(
                "SELECT date(created_at), COUNT(*),
                        COALESCE(SUM(total_cost), 0),
                        COALESCE(SUM(input_tokens + output_tokens), 0)
                 FROM jobs
                 WHERE date(created_at) >= ?1
                 GROUP BY 1 ORDER BY 1",
            )
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let rows = stmt
            .query_map([&cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?);
        }
        Ok(out)
    })?;

    match group_by {
        TrendGrouping::Day => Ok(daily
            .into_iter()
            .map(|(bucket, total_jobs, total_cost, total_tokens)| TrendPoint {
                bucket,
                total_jobs,
                total_cost,
                total_tokens,
            })
            .collect()),
        TrendGrouping::Week => {
            // Fold calendar days into ISO weeks, preserving order.
            let mut points: Vec<TrendPoint> = Vec::new();
            for (day, jobs, cost, tokens) in daily {
                let Ok(date) = day.parse::<NaiveDate>() else {
                    continue;
                };
                let week = date.iso_week();
                let bucket = format!("{}-W{:02}", week.year(), week.week());
                match points.last_mut() {
                    Some(last) if last.bucket == bucket => {
                        last.total_jobs += jobs;
                        last.total_cost += cost;
                        last.total_tokens += tokens;
                    }
                    _ => points.push(TrendPoint {
                        bucket,
                        total_jobs: jobs,
                        total_cost: cost,
                        total_tokens: tokens,
                    }),
                }
            }
            Ok(points)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_storage::MigrationEngine;

    fn db_with_jobs() -> Arc<DatabaseManager> {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        db.exec(
            "INSERT INTO jobs (id, type, status, title, provider, model,
                               input_tokens, output_tokens, total_cost, created_at, updated_at)
             VALUES
             ('j1', 'chat', 'completed', 't', 'openai', 'gpt-4o',
              1000, 500, 0.0075, '2024-08-01T10:00:00.000Z', '2024-08-01T10:00:00.000Z'),
             ('j2', 'chat', 'completed', 't', 'openai', 'gpt-4o',
              2000, 1000, 0.015, '2024-08-02T10:00:00.000Z', '2024-08-02T10:00:00.000Z'),
             ('j3', 'vision', 'failed', 't', 'anthropic', 'claude-3-5-sonnet',
              500, 0, 0.0015, '2024-08-02T11:00:00.000Z', '2024-08-02T11:00:00.000Z')",
        )
        .unwrap();
        db
    }

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn breakdown_orders_by_cost_desc() {
        let db = db_with_jobs();
        let rows = cost_breakdown(&db, d("2024-08-01"), d("2024-08-31"), None, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].model, "gpt-4o");
        assert!((rows[0].total_cost - 0.0225).abs() < 1e-9);
        assert_eq!(rows[0].total_jobs, 2);
        assert_eq!(rows[1].provider, "anthropic");
    }

    #[test]
    fn breakdown_respects_provider_filter() {
        let db = db_with_jobs();
        let rows =
            cost_breakdown(&db, d("2024-08-01"), d("2024-08-31"), Some("anthropic"), None)
                .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].provider, "anthropic");
    }

    #[test]
    fn breakdown_respects_range() {
        let db = db_with_jobs();
        let rows = cost_breakdown(&db, d("2024-08-02"), d("2024-08-02"), None, None).unwrap();
        let jobs: i64 = rows.iter().map(|r| r.total_jobs).sum();
        assert_eq!(jobs, 2);
    }

    #[test]
    fn daily_trends_bucket_by_calendar_day() {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        let today = chrono::Utc::now().date_naive();
        let yesterday = today - chrono::Duration::days(1);
        db.exec(&format!(
            "INSERT INTO jobs (id, title, status, total_cost, created_at, updated_at) VALUES
             ('t1', 'a', 'completed', 0.1, '{today}T08:00:00.000Z', '{today}T08:00:00.000Z'),
             ('t2', 'b', 'completed', 0.2, '{today}T09:00:00.000Z', '{today}T09:00:00.000Z'),
             ('t3', 'c', 'failed',    0.0, '{yesterday}T09:00:00.000Z', '{yesterday}T09:00:00.000Z')"
        ))
        .unwrap();

        let points = trends(&db, 7, TrendGrouping::Day).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].bucket, yesterday.format("%Y-%m-%d").to_string());
        assert_eq!(points[1].total_jobs, 2);

        let weekly = trends(&db, 7, TrendGrouping::Week).unwrap();
        let total: i64 = weekly.iter().map(|p| p.total_jobs).sum();
        assert_eq!(total, 3);
    }
}
