//! The dashboard projection: one query bundle the UI polls.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_storage::sql::{format_datetime, parse_datetime};
use tally_storage::{DatabaseCode, DatabaseManager, Result, StoreError};

/// One line of the recent-activity tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub job_id: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate dashboard snapshot over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub total_cost: f64,
    pub total_tokens: i64,
    pub average_duration_ms: f64,
    pub jobs_by_type: HashMap<String, i64>,
    pub jobs_by_status: HashMap<String, i64>,
    pub cost_by_provider: HashMap<String, f64>,
    pub recent_activity: Vec<ActivityEntry>,
}

pub(crate) fn compute(db: &Arc<DatabaseManager>, days: u32) -> Result<DashboardStats> {
    let cutoff = format_datetime(&(Utc::now() - chrono::Duration::days(i64::from(days))));

    db.with_conn(|conn| {
        let (total, completed, failed, cost, tokens, avg_duration) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(status = 'completed'), 0),
                        COALESCE(SUM(status = 'failed'), 0),
                        COALESCE(SUM(total_cost), 0),
                        COALESCE(SUM(input_tokens + output_tokens), 0),
                        COALESCE(AVG(duration_ms), 0)
                 FROM jobs WHERE created_at >= ?1",
                [&cutoff],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                },
            )
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;

        let jobs_by_type = grouped_counts(conn, "type", &cutoff)?;
        let jobs_by_status = grouped_counts(conn, "status", &cutoff)?;

        let mut cost_by_provider = HashMap::new();
        let mut stmt = conn
            .prepare(
                "SELECT COALESCE(provider, 'unknown'), SUM(total_cost)
                 FROM jobs WHERE created_at >= ?1 GROUP BY 1",
            )
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let rows = stmt
            .query_map([&cutoff], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        for row in rows {
            let (provider, cost) =
                row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
            cost_by_provider.insert(provider, cost);
        }

        let mut recent_activity = Vec::with_capacity(10);
        let mut stmt = conn
            .prepare(
                "SELECT job_id, event_type, message, created_at FROM job_events
                 ORDER BY created_at DESC, rowid DESC LIMIT 10",
            )
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        for row in rows {
            let (job_id, event, message, created_at) =
                row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
            recent_activity.push(ActivityEntry {
                job_id,
                event,
                message,
                timestamp: parse_datetime(&created_at),
            });
        }

        Ok(DashboardStats {
            total_jobs: total,
            completed_jobs: completed,
            failed_jobs: failed,
            total_cost: cost,
            total_tokens: tokens,
            average_duration_ms: avg_duration,
            jobs_by_type,
            jobs_by_status,
            cost_by_provider,
            recent_activity,
        })
    })
}

fn grouped_counts(
    conn: &rusqlite::Connection,
    column: &str,
    cutoff: &str,
) -> Result<HashMap<String, i64>> {
    let sql =
        format!("SELECT {column}, COUNT(*) FROM jobs WHERE created_at >= ?1 GROUP BY {column}");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
    let rows = stmt
        .query_map([cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, count) = row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        map.insert(key, count);
    }
    Ok(map)
}
