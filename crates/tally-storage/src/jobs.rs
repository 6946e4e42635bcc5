//! Job CRUD and queries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use tally_core::cursor::Cursor;
use tally_core::enums::{JobSortField, JobStatus, SortDirection};
use tally_core::filter::{JobFilter, JobSort};
use tally_core::job::Job;
use tally_core::page::{Page, clamp_limit};
use tally_core::requests::{CreateJobRequest, UpdateJobRequest};
use tally_core::validation::{validate_create_job, validate_update_job};

use crate::error::{DatabaseCode, Result, StoreError};
use crate::events::emit_event_on_conn;
use crate::manager::DatabaseManager;
use crate::sql::{SqlWhere, contains_pattern, format_datetime, parse_datetime};

// ---------------------------------------------------------------------------
// Column list (shared between INSERT and SELECT)
// ---------------------------------------------------------------------------

/// All job columns in a deterministic order for SELECT queries.
pub(crate) const JOB_COLUMNS: &str = r#"
    id, type, status, title, description,
    provider, model, input_tokens, output_tokens, total_cost, currency,
    duration_ms, error_message, stack_trace, params, metadata,
    parent_job_id, created_at, updated_at, started_at, completed_at
"#;

// ---------------------------------------------------------------------------
// Row scanning
// ---------------------------------------------------------------------------

/// Deserialises a row into a [`Job`]. Column order MUST match [`JOB_COLUMNS`].
pub(crate) fn scan_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let status: String = row.get("status")?;
    let job_type: String = row.get("type")?;

    Ok(Job {
        id: row.get("id")?,
        job_type: job_type.into(),
        status: status.into(),
        title: row.get("title")?,
        description: row.get("description")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        total_cost: row.get("total_cost")?,
        currency: row.get("currency")?,
        duration_ms: row.get("duration_ms")?,
        error_message: row.get("error_message")?,
        stack_trace: row.get("stack_trace")?,
        params: raw_json(row.get::<_, Option<String>>("params")?),
        metadata: raw_json(row.get::<_, Option<String>>("metadata")?),
        parent_job_id: row.get("parent_job_id")?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
        started_at: started_at.as_deref().map(parse_datetime),
        completed_at: completed_at.as_deref().map(parse_datetime),
    })
}

/// Turns stored JSON TEXT back into a raw document; `{}`/empty collapse to
/// `None`.
pub(crate) fn raw_json(
    stored: Option<String>,
) -> Option<Box<serde_json::value::RawValue>> {
    let s = stored?;
    if s.is_empty() || s == "{}" {
        return None;
    }
    serde_json::value::RawValue::from_string(s).ok()
}

/// JSON document as stored TEXT; absent documents store as `{}`.
pub(crate) fn json_text(doc: &Option<Box<serde_json::value::RawValue>>) -> String {
    doc.as_ref()
        .map(|d| d.get().to_string())
        .unwrap_or_else(|| "{}".to_string())
}

// ---------------------------------------------------------------------------
// Aggregate projections
// ---------------------------------------------------------------------------

/// Counts and totals across the jobs table.
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub total_jobs: i64,
    pub by_status: HashMap<String, i64>,
    pub by_type: HashMap<String, i64>,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cost: f64,
    pub average_duration_ms: f64,
}

/// Result of [`JobRepository::update_job`]; the previous status lets the
/// caller detect terminal transitions.
#[derive(Debug)]
pub struct JobUpdated {
    pub job: Job,
    pub previous_status: JobStatus,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// Typed CRUD over the `jobs` table.
#[derive(Clone)]
pub struct JobRepository {
    db: Arc<DatabaseManager>,
    validate: bool,
    events: bool,
}

impl JobRepository {
    pub fn new(db: Arc<DatabaseManager>, validate: bool, events: bool) -> Self {
        Self {
            db,
            validate,
            events,
        }
    }

    /// Creates a job in `pending` state and appends its `created` event.
    pub fn create_job(&self, req: CreateJobRequest) -> Result<Job> {
        if self.validate {
            validate_create_job(&req)?;
        }

        let id = req
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let now_str = format_datetime(&now);

        self.db.execute_in_transaction(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (
                        ?1, ?2, 'pending', ?3, ?4,
                        ?5, ?6, 0, 0, 0, 'USD',
                        NULL, NULL, NULL, ?7, ?8,
                        ?9, ?10, ?10, NULL, NULL
                    )"
                ),
                params![
                    id,
                    req.job_type.as_str(),
                    req.title,
                    req.description,
                    req.provider,
                    req.model,
                    json_text(&req.params),
                    json_text(&req.metadata),
                    req.parent_job_id,
                    now_str,
                ],
            )
            .map_err(|e| match (&req.parent_job_id, constraint_violation(&e)) {
                (Some(parent), true) => StoreError::job_not_found(parent),
                _ => StoreError::db(DatabaseCode::CreateJobFailed, e),
            })?;

            if self.events {
                emit_event_on_conn(conn, &id, "created", None, "info", None, &now_str)
                    .map_err(|e| StoreError::db(DatabaseCode::CreateEventFailed, e))?;
            }
            get_job_on_conn(conn, &id)
        })
    }

    /// Retrieves a job by id.
    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.db.with_conn(|conn| get_job_on_conn(conn, id))
    }

    /// Applies a partial update, stamping status-transition timestamps.
    ///
    /// `pending -> running` sets `started_at`; any transition into a terminal
    /// state sets `completed_at`. Both stamps are monotonic: an existing
    /// timestamp is never overwritten.
    pub fn update_job(&self, id: &str, req: UpdateJobRequest) -> Result<JobUpdated> {
        if self.validate {
            validate_update_job(&req)?;
        }

        let now = Utc::now();
        let now_str = format_datetime(&now);

        self.db.execute_in_transaction(|conn| {
            let current = get_job_on_conn(conn, id)?;
            let previous_status = current.status.clone();

            let mut set: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            macro_rules! set_field {
                ($field:ident, $col:expr) => {
                    if let Some(ref val) = req.$field {
                        set.push(format!("{} = ?", $col));
                        values.push(Box::new(val.clone()));
                    }
                };
            }

            set_field!(title, "title");
            set_field!(description, "description");
            set_field!(error_message, "error_message");
            set_field!(stack_trace, "stack_trace");

            if let Some(v) = req.input_tokens {
                set.push("input_tokens = ?".into());
                values.push(Box::new(v));
            }
            if let Some(v) = req.output_tokens {
                set.push("output_tokens = ?".into());
                values.push(Box::new(v));
            }
            if let Some(v) = req.total_cost {
                set.push("total_cost = ?".into());
                values.push(Box::new(v));
            }
            if let Some(v) = req.duration_ms {
                set.push("duration_ms = ?".into());
                values.push(Box::new(v));
            }
            if let Some(ref doc) = req.metadata {
                set.push("metadata = ?".into());
                values.push(Box::new(doc.get().to_string()));
            }

            let mut status_changed_to: Option<JobStatus> = None;
            if let Some(ref status) = req.status {
                if *status != current.status {
                    set.push("status = ?".into());
                    values.push(Box::new(status.as_str().to_string()));

                    if *status == JobStatus::Running && current.started_at.is_none() {
                        set.push("started_at = ?".into());
                        values.push(Box::new(now_str.clone()));
                    }
                    if status.is_terminal() && current.completed_at.is_none() {
                        set.push("completed_at = ?".into());
                        values.push(Box::new(now_str.clone()));
                    }
                    status_changed_to = Some(status.clone());
                }
            }

            if set.is_empty() {
                // Nothing to change; still a successful update.
                return Ok(JobUpdated {
                    job: current,
                    previous_status,
                });
            }

            set.push("updated_at = ?".into());
            values.push(Box::new(now_str.clone()));

            let sql = format!("UPDATE jobs SET {} WHERE id = ?", set.join(", "));
            values.push(Box::new(id.to_string()));
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();

            conn.execute(&sql, refs.as_slice())
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;

            if let Some(new_status) = &status_changed_to {
                if self.events {
                    let data = format!(
                        r#"{{"from":"{}","to":"{}"}}"#,
                        previous_status.as_str(),
                        new_status.as_str()
                    );
                    emit_event_on_conn(
                        conn,
                        id,
                        new_status.as_str(),
                        None,
                        "info",
                        Some(&data),
                        &now_str,
                    )
                    .map_err(|e| StoreError::db(DatabaseCode::CreateEventFailed, e))?;
                }
            }

            Ok(JobUpdated {
                job: get_job_on_conn(conn, id)?,
                previous_status,
            })
        })
    }

    /// Soft delete marks the job `cancelled`; hard delete removes the row and
    /// cascades artifact and event rows.
    pub fn delete_job(&self, id: &str, hard: bool) -> Result<()> {
        let now = Utc::now();
        let now_str = format_datetime(&now);

        if hard {
            return self.db.execute_in_transaction(|conn| {
                let affected = conn
                    .execute("DELETE FROM jobs WHERE id = ?1", params![id])
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
                if affected == 0 {
                    return Err(StoreError::job_not_found(id));
                }
                debug!(id, "hard-deleted job");
                Ok(())
            });
        }

        self.db.execute_in_transaction(|conn| {
            let affected = conn
                .execute(
                    "UPDATE jobs SET status = 'cancelled',
                         completed_at = COALESCE(completed_at, ?1),
                         updated_at = ?1
                     WHERE id = ?2",
                    params![now_str, id],
                )
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            if affected == 0 {
                return Err(StoreError::job_not_found(id));
            }
            if self.events {
                emit_event_on_conn(conn, id, "cancelled", None, "info", None, &now_str)
                    .map_err(|e| StoreError::db(DatabaseCode::CreateEventFailed, e))?;
            }
            Ok(())
        })
    }

    /// Cursor-paginated query over the filter.
    pub fn query_jobs(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<Job>> {
        let limit = clamp_limit(limit);
        let col = sort.field.column();

        let mut paged = filter_where(filter);
        if let Some(cursor) = cursor {
            let cursor = Cursor::decode(cursor)?;
            push_cursor_predicate(&mut paged, col, sort.direction, &cursor);
        }

        let dir = sort.direction.as_sql();
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs {} ORDER BY {col} {dir}, id {dir} LIMIT {}",
            paged.sql(),
            limit + 1
        );

        let mut items = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(paged.params().as_slice(), scan_job)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(items)
        })?;

        let has_more = items.len() as i64 > limit;
        if has_more {
            items.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            items
                .last()
                .map(|job| Cursor::new(sort_value(job, sort.field), job.id.clone()).encode())
        } else {
            None
        };

        // Count reuses the WHERE minus the cursor predicate.
        let unpaged = filter_where(filter);
        let total = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM jobs {}", unpaged.sql()),
                unpaged.params().as_slice(),
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
        })?;

        Ok(Page {
            items,
            next_cursor,
            has_more,
            total,
        })
    }

    /// Text search across title, description, and error message.
    pub fn search_jobs(
        &self,
        query: &str,
        filter: &JobFilter,
        limit: Option<i64>,
    ) -> Result<Vec<Job>> {
        let mut w = filter_where(filter);
        if !query.is_empty() {
            let pattern = contains_pattern(query);
            w.push_many(
                "(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\' \
                 OR error_message LIKE ? ESCAPE '\\')",
                vec![
                    Box::new(pattern.clone()),
                    Box::new(pattern.clone()),
                    Box::new(pattern),
                ],
            );
        }
        let limit = clamp_limit(limit);
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT {limit}",
            w.sql()
        );

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(w.params().as_slice(), scan_job)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(jobs)
        })
    }

    /// Child jobs of `parent_id`, newest first.
    pub fn get_jobs_by_parent(&self, parent_id: &str) -> Result<Vec<Job>> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE parent_job_id = ?1
                 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(params![parent_id], scan_job)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
            }
            Ok(jobs)
        })
    }

    /// Counts and totals across all jobs.
    pub fn get_job_stats(&self) -> Result<JobStats> {
        self.db.with_conn(|conn| {
            let (total_jobs, total_input_tokens, total_output_tokens, total_cost, avg_duration) =
                conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(input_tokens), 0),
                            COALESCE(SUM(output_tokens), 0),
                            COALESCE(SUM(total_cost), 0),
                            COALESCE(AVG(duration_ms), 0)
                     FROM jobs",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, f64>(3)?,
                            row.get::<_, f64>(4)?,
                        ))
                    },
                )
                .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;

            let by_status = count_grouped(conn, "status")?;
            let by_type = count_grouped(conn, "type")?;

            Ok(JobStats {
                total_jobs,
                by_status,
                by_type,
                total_input_tokens,
                total_output_tokens,
                total_cost,
                average_duration_ms: avg_duration,
            })
        })
    }
}

fn count_grouped(conn: &Connection, column: &str) -> Result<HashMap<String, i64>> {
    let sql = format!("SELECT {column}, COUNT(*) FROM jobs GROUP BY {column}");
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
    let mut map = HashMap::new();
    for row in rows {
        let (key, count) = row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
        map.insert(key, count);
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Connection-level helpers
// ---------------------------------------------------------------------------

/// Retrieves a single job by id on the given connection.
pub(crate) fn get_job_on_conn(conn: &Connection, id: &str) -> Result<Job> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_job)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::job_not_found(id),
            other => StoreError::db(DatabaseCode::QueryFailed, other),
        })
}

/// Compiles a [`JobFilter`] into WHERE clauses.
pub(crate) fn filter_where(filter: &JobFilter) -> SqlWhere {
    let mut w = SqlWhere::new();
    if let Some(ref t) = filter.job_type {
        w.push("type = ?", t.as_str().to_string());
    }
    if let Some(ref s) = filter.status {
        w.push("status = ?", s.as_str().to_string());
    }
    if let Some(ref p) = filter.provider {
        w.push("provider = ?", p.clone());
    }
    if let Some(ref m) = filter.model {
        w.push("model = ?", m.clone());
    }
    if let Some(ref t) = filter.title_contains {
        w.push("title LIKE ? ESCAPE '\\'", contains_pattern(t));
    }
    if let Some(ref after) = filter.created_after {
        w.push("created_at >= ?", format_datetime(after));
    }
    if let Some(ref before) = filter.created_before {
        w.push("created_at <= ?", format_datetime(before));
    }
    if let Some(min) = filter.duration_min_ms {
        w.push("duration_ms >= ?", min);
    }
    if let Some(max) = filter.duration_max_ms {
        w.push("duration_ms <= ?", max);
    }
    if let Some(min) = filter.cost_min {
        w.push("total_cost >= ?", min);
    }
    if let Some(max) = filter.cost_max {
        w.push("total_cost <= ?", max);
    }
    if let Some(ref parent) = filter.parent_job_id {
        w.push("parent_job_id = ?", parent.clone());
    }
    match filter.has_error {
        Some(true) => w.push_raw("error_message IS NOT NULL"),
        Some(false) => w.push_raw("error_message IS NULL"),
        None => {}
    }
    w
}

/// Adds the keyset predicate for a decoded cursor: rows strictly past the
/// (sort value, id) pair in the given direction.
pub(crate) fn push_cursor_predicate(
    w: &mut SqlWhere,
    col: &str,
    direction: SortDirection,
    cursor: &Cursor,
) {
    let (cmp, id_cmp) = match direction {
        SortDirection::Desc => ("<", "<"),
        SortDirection::Asc => (">", ">"),
    };
    match json_to_sql(&cursor.v) {
        Some(value) => {
            let second = json_to_sql(&cursor.v).expect("same value converts twice");
            w.push_many(
                format!("({col} {cmp} ? OR ({col} = ? AND id {id_cmp} ?))"),
                vec![value, second, Box::new(cursor.id.clone())],
            );
        }
        // NULL sort values: SQLite orders NULLs last in DESC, first in ASC.
        None => match direction {
            SortDirection::Desc => w.push_many(
                format!("({col} IS NULL AND id {id_cmp} ?)"),
                vec![Box::new(cursor.id.clone())],
            ),
            SortDirection::Asc => w.push_many(
                format!("({col} IS NOT NULL OR id {id_cmp} ?)"),
                vec![Box::new(cursor.id.clone())],
            ),
        },
    }
}

/// Converts a cursor JSON value to a bindable SQL value; `None` for null.
fn json_to_sql(v: &serde_json::Value) -> Option<Box<dyn rusqlite::types::ToSql>> {
    match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(Box::new(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Box::new(i))
            } else {
                Some(Box::new(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::Bool(b) => Some(Box::new(*b as i64)),
        other => Some(Box::new(other.to_string())),
    }
}

/// The sort-field value of a job, in the TEXT/number form it is stored as.
pub(crate) fn sort_value(job: &Job, field: JobSortField) -> serde_json::Value {
    match field {
        JobSortField::CreatedAt => serde_json::json!(format_datetime(&job.created_at)),
        JobSortField::UpdatedAt => serde_json::json!(format_datetime(&job.updated_at)),
        JobSortField::CompletedAt => match &job.completed_at {
            Some(at) => serde_json::json!(format_datetime(at)),
            None => serde_json::Value::Null,
        },
        JobSortField::DurationMs => match job.duration_ms {
            Some(ms) => serde_json::json!(ms),
            None => serde_json::Value::Null,
        },
        JobSortField::TotalCost => serde_json::json!(job.total_cost),
        JobSortField::Status => serde_json::json!(job.status.as_str()),
        JobSortField::Type => serde_json::json!(job.job_type.as_str()),
    }
}

fn constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
