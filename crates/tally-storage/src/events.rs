//! Event CRUD -- the append-only job timeline.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Row, params};
use tracing::{debug, warn};
use uuid::Uuid;

use tally_core::cursor::Cursor;
use tally_core::enums::SortDirection;
use tally_core::event::{JobEvent, TimelineEntry};
use tally_core::filter::EventFilter;
use tally_core::page::{Page, clamp_limit};
use tally_core::requests::CreateEventRequest;
use tally_core::validation::validate_create_event;

use crate::error::{DatabaseCode, Result, StoreError};
use crate::jobs::{json_text, push_cursor_predicate, raw_json};
use crate::manager::DatabaseManager;
use crate::sql::{SqlWhere, format_datetime, parse_datetime};

/// Event columns in SELECT order.
pub(crate) const EVENT_COLUMNS: &str = r#"
    id, job_id, event_type, message, level, data, metadata, created_at
"#;

/// Deserialises a row into a [`JobEvent`].
pub(crate) fn scan_event(row: &Row<'_>) -> rusqlite::Result<JobEvent> {
    let created_at: String = row.get("created_at")?;
    let event_type: String = row.get("event_type")?;
    let level: String = row.get("level")?;
    Ok(JobEvent {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        event_type: event_type.into(),
        message: row.get("message")?,
        level: level.into(),
        data: raw_json(row.get::<_, Option<String>>("data")?),
        metadata: raw_json(row.get::<_, Option<String>>("metadata")?),
        created_at: parse_datetime(&created_at),
    })
}

/// Inserts an event row directly. Used by lifecycle emission, which stores
/// the raw status string as the event type and bypasses request validation.
pub(crate) fn emit_event_on_conn(
    conn: &Connection,
    job_id: &str,
    event_type: &str,
    message: Option<&str>,
    level: &str,
    data: Option<&str>,
    created_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO job_events (id, job_id, event_type, message, level, data, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', ?7)",
        params![
            Uuid::new_v4().to_string(),
            job_id,
            event_type,
            message,
            level,
            data.unwrap_or("{}"),
            created_at,
        ],
    )?;
    Ok(())
}

/// Typed access to the `job_events` table.
#[derive(Clone)]
pub struct EventRepository {
    db: Arc<DatabaseManager>,
    validate: bool,
}

impl EventRepository {
    pub fn new(db: Arc<DatabaseManager>, validate: bool) -> Self {
        Self { db, validate }
    }

    /// Appends one event. The level defaults to `info`.
    pub fn create_event(&self, req: CreateEventRequest) -> Result<JobEvent> {
        if self.validate {
            validate_create_event(&req)?;
        }

        let id = req
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now_str = format_datetime(&Utc::now());
        let level = req.level.clone().unwrap_or_default();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO job_events
                     (id, job_id, event_type, message, level, data, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    req.job_id,
                    req.event_type.as_str(),
                    req.message,
                    level.as_str(),
                    json_text(&req.data),
                    json_text(&req.metadata),
                    now_str,
                ],
            )
            .map_err(|e| {
                if constraint_violation(&e) {
                    StoreError::job_not_found(&req.job_id)
                } else {
                    StoreError::db(DatabaseCode::CreateEventFailed, e)
                }
            })?;
            get_event_on_conn(conn, &id)
        })
    }

    /// Inserts a batch best-effort: failures are logged and skipped, the
    /// batch is not atomic. Returns the number of rows written.
    pub fn create_batch_events(&self, reqs: Vec<CreateEventRequest>) -> Result<usize> {
        let mut written = 0;
        for req in reqs {
            match self.create_event(req) {
                Ok(_) => written += 1,
                Err(e) => warn!("skipping event in batch: {e}"),
            }
        }
        debug!(written, "batch events inserted");
        Ok(written)
    }

    /// Retrieves an event by id.
    pub fn get_event(&self, id: &str) -> Result<JobEvent> {
        self.db.with_conn(|conn| get_event_on_conn(conn, id))
    }

    /// Cursor-paginated query, newest first.
    pub fn query_events(
        &self,
        filter: &EventFilter,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<JobEvent>> {
        let limit = clamp_limit(limit);

        let mut paged = event_filter_where(filter);
        if let Some(cursor) = cursor {
            let cursor = Cursor::decode(cursor)?;
            push_cursor_predicate(&mut paged, "created_at", SortDirection::Desc, &cursor);
        }

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM job_events {} ORDER BY created_at DESC, id DESC LIMIT {}",
            paged.sql(),
            limit + 1
        );

        let mut items = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            let rows = stmt
                .query_map(paged.params().as_slice(), scan_event)
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
            items.last().map(|ev| {
                Cursor::new(
                    serde_json::json!(format_datetime(&ev.created_at)),
                    ev.id.clone(),
                )
                .encode()
            })
        } else {
            None
        };

        let unpaged = event_filter_where(filter);
        let total = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM job_events {}", unpaged.sql()),
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

    /// Events for one job, newest first.
    pub fn get_events_by_job(&self, job_id: &str, limit: Option<i64>) -> Result<Vec<JobEvent>> {
        let limit = clamp_limit(limit);
        self.db.with_conn(|conn| {
            // rowid tie-break keeps insertion order for same-millisecond events.
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM job_events WHERE job_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT {limit}"
            );
            collect_events(conn, &sql, params![job_id])
        })
    }

    /// Full timeline for one job, oldest first.
    pub fn get_job_timeline(&self, job_id: &str) -> Result<Vec<TimelineEntry>> {
        let events = self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {EVENT_COLUMNS} FROM job_events WHERE job_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            );
            collect_events(conn, &sql, params![job_id])
        })?;

        Ok(events
            .into_iter()
            .map(|ev| TimelineEntry {
                timestamp: ev.created_at,
                event: ev.event_type.as_str().to_string(),
                message: ev.message,
                level: ev.level,
                data: ev.data,
            })
            .collect())
    }

    /// Deletes events older than `retention_days`. Returns rows removed.
    pub fn cleanup_old_events(&self, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let cutoff_str = format_datetime(&cutoff);
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM job_events WHERE created_at < ?1",
                params![cutoff_str],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
        })?;
        if removed > 0 {
            debug!(removed, retention_days, "pruned old events");
        }
        Ok(removed)
    }
}

fn collect_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<JobEvent>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
    let rows = stmt
        .query_map(params, scan_event)
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
    }
    Ok(events)
}

fn get_event_on_conn(conn: &Connection, id: &str) -> Result<JobEvent> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM job_events WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_event)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::event_not_found(id),
            other => StoreError::db(DatabaseCode::QueryFailed, other),
        })
}

fn event_filter_where(filter: &EventFilter) -> SqlWhere {
    let mut w = SqlWhere::new();
    if let Some(ref job_id) = filter.job_id {
        w.push("job_id = ?", job_id.clone());
    }
    if let Some(ref t) = filter.event_type {
        w.push("event_type = ?", t.as_str().to_string());
    }
    if let Some(ref level) = filter.level {
        w.push("level = ?", level.as_str().to_string());
    }
    if let Some(ref after) = filter.created_after {
        w.push("created_at >= ?", format_datetime(after));
    }
    if let Some(ref before) = filter.created_before {
        w.push("created_at <= ?", format_datetime(before));
    }
    w
}

fn constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobRepository;
    use crate::migrations::MigrationEngine;
    use pretty_assertions::assert_eq;
    use tally_core::enums::{EventLevel, EventType, JobStatus};
    use tally_core::requests::{CreateJobRequest, UpdateJobRequest};

    fn repos() -> (JobRepository, EventRepository) {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        (
            JobRepository::new(db.clone(), true, true),
            EventRepository::new(db, true),
        )
    }

    fn job(jobs: &JobRepository) -> String {
        jobs.create_job(CreateJobRequest {
            title: "t".into(),
            ..Default::default()
        })
        .unwrap()
        .id
    }

    #[test]
    fn create_event_defaults_level_info() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        let ev = events
            .create_event(CreateEventRequest {
                job_id: job_id.clone(),
                event_type: EventType::Progress,
                message: Some("halfway".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(ev.level, EventLevel::Info);
        assert_eq!(ev.event_type, EventType::Progress);
    }

    #[test]
    fn event_for_missing_job_is_not_found() {
        let (_jobs, events) = repos();
        let err = events
            .create_event(CreateEventRequest {
                job_id: "ghost".into(),
                event_type: EventType::Progress,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code_str(), "JOB_NOT_FOUND");
    }

    #[test]
    fn timeline_starts_with_created_and_tracks_transitions() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        jobs.update_job(&job_id, UpdateJobRequest::status(JobStatus::Running))
            .unwrap();
        jobs.update_job(&job_id, UpdateJobRequest::status(JobStatus::Completed))
            .unwrap();

        let timeline = events.get_job_timeline(&job_id).unwrap();
        let names: Vec<&str> = timeline.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names, vec!["created", "running", "completed"]);

        // Oldest-first ordering.
        for pair in timeline.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn events_by_job_newest_first() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        jobs.update_job(&job_id, UpdateJobRequest::status(JobStatus::Running))
            .unwrap();

        let list = events.get_events_by_job(&job_id, None).unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].created_at >= list[1].created_at);
    }

    #[test]
    fn batch_insert_skips_failures() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        let written = events
            .create_batch_events(vec![
                CreateEventRequest {
                    job_id: job_id.clone(),
                    event_type: EventType::Progress,
                    ..Default::default()
                },
                CreateEventRequest {
                    job_id: "ghost".into(),
                    event_type: EventType::Progress,
                    ..Default::default()
                },
                CreateEventRequest {
                    job_id,
                    event_type: EventType::Warning,
                    ..Default::default()
                },
            ])
            .unwrap();
        assert_eq!(written, 2);
    }

    #[test]
    fn cleanup_removes_only_old_events() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        // Backdate one event past the retention window.
        events
            .db
            .exec(&format!(
                "INSERT INTO job_events (id, job_id, event_type, created_at)
                 VALUES ('old-ev', '{job_id}', 'progress', '2020-01-01T00:00:00.000Z')"
            ))
            .unwrap();

        let removed = events.cleanup_old_events(90).unwrap();
        assert_eq!(removed, 1);
        assert!(events.get_event("old-ev").unwrap_err().is_not_found());
        // The fresh `created` event survives.
        assert_eq!(events.get_events_by_job(&job_id, None).unwrap().len(), 1);
    }

    #[test]
    fn query_events_paginates() {
        let (jobs, events) = repos();
        let job_id = job(&jobs);
        for i in 0..5 {
            events
                .create_event(CreateEventRequest {
                    job_id: job_id.clone(),
                    event_type: EventType::Progress,
                    message: Some(format!("step {i}")),
                    ..Default::default()
                })
                .unwrap();
        }

        let filter = EventFilter {
            job_id: Some(job_id),
            ..Default::default()
        };
        let first = events.query_events(&filter, Some(4), None).unwrap();
        assert_eq!(first.items.len(), 4);
        assert!(first.has_more);
        // 5 progress + 1 created
        assert_eq!(first.total, 6);

        let second = events
            .query_events(&filter, Some(4), first.next_cursor.as_deref())
            .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_more);
    }
}
