//! Artifact CRUD over the content-addressed blob store.
//!
//! When artifact storage is disabled the repository falls back to row-only
//! behavior: hashes are still computed and recorded, but no bytes touch disk.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, Row, params};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tally_core::artifact::{IntegrityIssue, IntegrityProblem, JobArtifact};
use tally_core::cursor::Cursor;
use tally_core::enums::SortDirection;
use tally_core::filter::ArtifactFilter;
use tally_core::page::{Page, clamp_limit};
use tally_core::requests::{CreateArtifactRequest, UpdateArtifactRequest};
use tally_core::validation::validate_create_artifact;

use crate::blob::{BlobReader, BlobStore};
use crate::error::{DatabaseCode, Result, StoreError};
use crate::jobs::{json_text, push_cursor_predicate, raw_json};
use crate::manager::DatabaseManager;
use crate::sql::{SqlWhere, contains_pattern, format_datetime, parse_datetime};

/// Artifact columns in SELECT order.
pub(crate) const ARTIFACT_COLUMNS: &str = r#"
    id, job_id, type, name, file_path, file_size, mime_type,
    hash_sha256, metadata, is_deleted, suspect, created_at, updated_at
"#;

/// Deserialises a row into a [`JobArtifact`].
pub(crate) fn scan_artifact(row: &Row<'_>) -> rusqlite::Result<JobArtifact> {
    let artifact_type: String = row.get("type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(JobArtifact {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        artifact_type: artifact_type.into(),
        name: row.get("name")?,
        file_path: row.get("file_path")?,
        file_size: row.get("file_size")?,
        mime_type: row.get("mime_type")?,
        hash_sha256: row.get("hash_sha256")?,
        metadata: raw_json(row.get::<_, Option<String>>("metadata")?),
        is_deleted: row.get::<_, i64>("is_deleted")? != 0,
        suspect: row.get::<_, i64>("suspect")? != 0,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

/// Counts and totals across the artifact table.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStats {
    pub total_artifacts: i64,
    pub total_size_bytes: i64,
    pub by_type: HashMap<String, i64>,
    /// Distinct content hashes among live rows; the gap to `total_artifacts`
    /// is the dedupe win.
    pub unique_blobs: i64,
    pub deleted_count: i64,
}

/// What a retention pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub soft_deleted: usize,
    pub hard_deleted: usize,
    pub files_removed: usize,
}

/// Typed access to `job_artifacts` plus the blob store.
#[derive(Clone)]
pub struct ArtifactRepository {
    db: Arc<DatabaseManager>,
    blob: Option<BlobStore>,
    validate: bool,
}

impl ArtifactRepository {
    pub fn new(db: Arc<DatabaseManager>, blob: Option<BlobStore>, validate: bool) -> Self {
        Self { db, blob, validate }
    }

    /// Whether bytes are actually written to disk.
    pub fn storage_enabled(&self) -> bool {
        self.blob.is_some()
    }

    /// The blob store, when storage is enabled.
    pub fn blob_store(&self) -> Option<&BlobStore> {
        self.blob.as_ref()
    }

    /// Stores an artifact: bytes into the blob store (deduplicated), metadata
    /// as a row. Two rows may share a hash; the file is written once.
    pub fn create_artifact(&self, req: CreateArtifactRequest) -> Result<JobArtifact> {
        if self.validate {
            validate_create_artifact(&req)?;
        }

        let (hash, relative_path, size) = match &self.blob {
            Some(blob) => {
                let stored = blob.write(&req.data)?;
                (stored.hash, stored.relative_path, stored.size as i64)
            }
            None => {
                // Row-only fallback: record what would have been stored.
                let hash = BlobStore::hash_bytes(&req.data);
                let path = format!("{}/{}/{hash}", &hash[0..2], &hash[2..4]);
                (hash, path, req.data.len() as i64)
            }
        };

        let id = req
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now_str = format_datetime(&Utc::now());

        self.db.execute_in_transaction(|conn| {
            let job_exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM jobs WHERE id = ?1",
                    params![req.job_id],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n > 0)
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            if !job_exists {
                return Err(StoreError::job_not_found(&req.job_id));
            }

            conn.execute(
                "INSERT INTO job_artifacts
                     (id, job_id, type, name, file_path, file_size, mime_type,
                      hash_sha256, metadata, is_deleted, suspect, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10, ?10)",
                params![
                    id,
                    req.job_id,
                    req.artifact_type.as_str(),
                    req.name,
                    relative_path,
                    size,
                    req.mime_type,
                    hash,
                    json_text(&req.metadata),
                    now_str,
                ],
            )
            .map_err(|e| StoreError::db(DatabaseCode::CreateArtifactFailed, e))?;

            get_artifact_on_conn(conn, &id)
        })
    }

    /// Retrieves an artifact row by id (soft-deleted rows included; direct
    /// lookups are not "normal queries").
    pub fn get_artifact(&self, id: &str) -> Result<JobArtifact> {
        self.db.with_conn(|conn| get_artifact_on_conn(conn, id))
    }

    /// Loads and verifies the artifact bytes.
    ///
    /// A missing file surfaces `ARTIFACT_MISSING`; a digest mismatch surfaces
    /// `ARTIFACT_CORRUPT` and marks the row suspect without deleting it.
    pub fn get_artifact_data(&self, id: &str) -> Result<Vec<u8>> {
        let artifact = self.get_artifact(id)?;
        let blob = self.require_storage()?;

        let data = blob.read(&artifact.hash_sha256)?;
        let actual = BlobStore::hash_bytes(&data);
        if actual != artifact.hash_sha256 {
            self.mark_suspect(id)?;
            return Err(StoreError::db(
                DatabaseCode::ArtifactCorrupt,
                format!(
                    "artifact {id} content hash {actual} does not match recorded {}",
                    artifact.hash_sha256
                ),
            ));
        }
        Ok(data)
    }

    /// Opens the artifact content as a lazy finite byte stream.
    pub fn get_artifact_stream(&self, id: &str) -> Result<BlobReader> {
        let artifact = self.get_artifact(id)?;
        let blob = self.require_storage()?;
        blob.open_stream(&artifact.hash_sha256)
    }

    /// Cursor-paginated artifact listing, newest first.
    pub fn query_artifacts(
        &self,
        filter: &ArtifactFilter,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<JobArtifact>> {
        let limit = clamp_limit(limit);

        let mut paged = artifact_filter_where(filter);
        if let Some(cursor) = cursor {
            let cursor = Cursor::decode(cursor)?;
            push_cursor_predicate(&mut paged, "created_at", SortDirection::Desc, &cursor);
        }

        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM job_artifacts {}
             ORDER BY created_at DESC, id DESC LIMIT {}",
            paged.sql(),
            limit + 1
        );

        let mut items = self.db.with_conn(|conn| collect(conn, &sql, &paged))?;

        let has_more = items.len() as i64 > limit;
        if has_more {
            items.truncate(limit as usize);
        }
        let next_cursor = if has_more {
            items.last().map(|a| {
                Cursor::new(
                    serde_json::json!(format_datetime(&a.created_at)),
                    a.id.clone(),
                )
                .encode()
            })
        } else {
            None
        };

        let unpaged = artifact_filter_where(filter);
        let total = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM job_artifacts {}", unpaged.sql()),
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

    /// Live artifacts for one job, newest first.
    pub fn get_artifacts_by_job(&self, job_id: &str) -> Result<Vec<JobArtifact>> {
        let mut w = SqlWhere::new();
        w.push("job_id = ?", job_id.to_string());
        w.push_raw("is_deleted = 0");
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM job_artifacts {}
             ORDER BY created_at DESC, id DESC",
            w.sql()
        );
        self.db.with_conn(|conn| collect(conn, &sql, &w))
    }

    /// Updates the mutable metadata of an artifact (name, opaque document).
    pub fn update_artifact(&self, id: &str, req: UpdateArtifactRequest) -> Result<JobArtifact> {
        let now_str = format_datetime(&Utc::now());
        self.db.execute_in_transaction(|conn| {
            let mut set: Vec<&str> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(ref name) = req.name {
                set.push("name = ?");
                values.push(Box::new(name.clone()));
            }
            if let Some(ref doc) = req.metadata {
                set.push("metadata = ?");
                values.push(Box::new(doc.get().to_string()));
            }
            if set.is_empty() {
                return get_artifact_on_conn(conn, id);
            }
            set.push("updated_at = ?");
            values.push(Box::new(now_str.clone()));
            values.push(Box::new(id.to_string()));

            let sql = format!(
                "UPDATE job_artifacts SET {} WHERE id = ?",
                set.join(", ")
            );
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();
            let affected = conn
                .execute(&sql, refs.as_slice())
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            if affected == 0 {
                return Err(StoreError::artifact_not_found(id));
            }
            get_artifact_on_conn(conn, id)
        })
    }

    /// Soft delete hides the row; hard delete removes it and, when no other
    /// live row references the same hash, the physical file.
    pub fn delete_artifact(&self, id: &str, hard: bool) -> Result<()> {
        if !hard {
            let now_str = format_datetime(&Utc::now());
            return self.db.with_conn(|conn| {
                let affected = conn
                    .execute(
                        "UPDATE job_artifacts SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
                        params![now_str, id],
                    )
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
                if affected == 0 {
                    return Err(StoreError::artifact_not_found(id));
                }
                Ok(())
            });
        }

        let orphaned_hash = self.db.execute_in_transaction(|conn| {
            let artifact = get_artifact_on_conn(conn, id)?;
            conn.execute("DELETE FROM job_artifacts WHERE id = ?1", params![id])
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;

            let references: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM job_artifacts
                     WHERE hash_sha256 = ?1 AND is_deleted = 0",
                    params![artifact.hash_sha256],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;

            Ok((references == 0).then_some(artifact.hash_sha256))
        })?;

        // File removal happens outside the transaction; an orphaned file on
        // failure is recoverable, a dangling row is not.
        if let (Some(hash), Some(blob)) = (orphaned_hash, &self.blob) {
            if let Err(e) = blob.remove(&hash) {
                warn!(%hash, "failed to remove orphaned blob: {e}");
            }
        }
        Ok(())
    }

    /// Text search over live artifact names and MIME types.
    pub fn search_artifacts(&self, query: &str, limit: Option<i64>) -> Result<Vec<JobArtifact>> {
        let limit = clamp_limit(limit);
        let pattern = contains_pattern(query);
        let mut w = SqlWhere::new();
        w.push_raw("is_deleted = 0");
        w.push_many(
            "(name LIKE ? ESCAPE '\\' OR mime_type LIKE ? ESCAPE '\\')",
            vec![Box::new(pattern.clone()), Box::new(pattern)],
        );
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM job_artifacts {}
             ORDER BY created_at DESC, id DESC LIMIT {limit}",
            w.sql()
        );
        self.db.with_conn(|conn| collect(conn, &sql, &w))
    }

    /// Counts and totals over the artifact table.
    pub fn get_artifact_stats(&self) -> Result<ArtifactStats> {
        self.db.with_conn(|conn| {
            let (total, bytes, unique, deleted) = conn
                .query_row(
                    "SELECT
                         COUNT(*) FILTER (WHERE is_deleted = 0),
                         COALESCE(SUM(file_size) FILTER (WHERE is_deleted = 0), 0),
                         COUNT(DISTINCT hash_sha256) FILTER (WHERE is_deleted = 0),
                         COUNT(*) FILTER (WHERE is_deleted = 1)
                     FROM job_artifacts",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    },
                )
                .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;

            let mut by_type = HashMap::new();
            let mut stmt = conn
                .prepare(
                    "SELECT type, COUNT(*) FROM job_artifacts
                     WHERE is_deleted = 0 GROUP BY type",
                )
                .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
            for row in rows {
                let (k, v) = row.map_err(|e| StoreError::db(DatabaseCode::StatsFailed, e))?;
                by_type.insert(k, v);
            }

            Ok(ArtifactStats {
                total_artifacts: total,
                total_size_bytes: bytes,
                by_type,
                unique_blobs: unique,
                deleted_count: deleted,
            })
        })
    }

    /// Retention pass: soft-delete live artifacts older than
    /// `retention_days`; when `hard_pass` is set, also hard-delete
    /// soft-deleted artifacts older than twice the window.
    pub fn cleanup_old_artifacts(
        &self,
        retention_days: u32,
        hard_pass: bool,
    ) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let now = Utc::now();
        let soft_cutoff = format_datetime(&(now - chrono::Duration::days(i64::from(retention_days))));
        let now_str = format_datetime(&now);

        report.soft_deleted = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE job_artifacts SET is_deleted = 1, updated_at = ?1
                 WHERE is_deleted = 0 AND created_at < ?2",
                params![now_str, soft_cutoff],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
        })?;

        if hard_pass {
            let hard_cutoff =
                format_datetime(&(now - chrono::Duration::days(2 * i64::from(retention_days))));
            let ids: Vec<String> = self.db.with_conn(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id FROM job_artifacts
                         WHERE is_deleted = 1 AND created_at < ?1",
                    )
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
                let rows = stmt
                    .query_map(params![hard_cutoff], |row| row.get::<_, String>(0))
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
                }
                Ok(ids)
            })?;

            for id in ids {
                match self.delete_artifact(&id, true) {
                    Ok(()) => report.hard_deleted += 1,
                    Err(e) => warn!(id, "hard-delete during cleanup failed: {e}"),
                }
            }
        }

        if report.soft_deleted > 0 || report.hard_deleted > 0 {
            info!(
                soft = report.soft_deleted,
                hard = report.hard_deleted,
                "artifact retention cleanup"
            );
        }
        Ok(report)
    }

    /// Recomputes every live artifact's digest and reports problems.
    pub fn verify_integrity(&self) -> Result<Vec<IntegrityIssue>> {
        let blob = self.require_storage()?;
        let artifacts: Vec<(String, String, i64)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, hash_sha256, file_size FROM job_artifacts WHERE is_deleted = 0",
                )
                .map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?);
            }
            Ok(out)
        })?;

        let mut issues = Vec::new();
        for (id, hash, recorded_size) in artifacts {
            let path = blob.path_for(&hash);
            if !path.exists() {
                issues.push(IntegrityIssue {
                    artifact_id: id,
                    issue: IntegrityProblem::MissingFile,
                });
                continue;
            }
            let data = match std::fs::read(&path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(id, "integrity read failed: {e}");
                    issues.push(IntegrityIssue {
                        artifact_id: id,
                        issue: IntegrityProblem::MissingFile,
                    });
                    continue;
                }
            };
            let actual_hash = BlobStore::hash_bytes(&data);
            if actual_hash != hash {
                issues.push(IntegrityIssue {
                    artifact_id: id,
                    issue: IntegrityProblem::HashMismatch,
                });
            } else if data.len() as i64 != recorded_size {
                issues.push(IntegrityIssue {
                    artifact_id: id,
                    issue: IntegrityProblem::SizeMismatch,
                });
            }
        }
        debug!(problems = issues.len(), "integrity verification finished");
        Ok(issues)
    }

    fn require_storage(&self) -> Result<&BlobStore> {
        self.blob.as_ref().ok_or_else(|| {
            StoreError::db(
                DatabaseCode::StorageNotAvailable,
                "artifact storage is disabled",
            )
        })
    }

    fn mark_suspect(&self, id: &str) -> Result<()> {
        let now_str = format_datetime(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE job_artifacts SET suspect = 1, updated_at = ?1 WHERE id = ?2",
                params![now_str, id],
            )
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            Ok(())
        })
    }
}

fn collect(conn: &Connection, sql: &str, w: &SqlWhere) -> Result<Vec<JobArtifact>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
    let rows = stmt
        .query_map(w.params().as_slice(), scan_artifact)
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?);
    }
    Ok(items)
}

fn get_artifact_on_conn(conn: &Connection, id: &str) -> Result<JobArtifact> {
    let sql = format!("SELECT {ARTIFACT_COLUMNS} FROM job_artifacts WHERE id = ?1");
    conn.query_row(&sql, params![id], scan_artifact)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::artifact_not_found(id),
            other => StoreError::db(DatabaseCode::QueryFailed, other),
        })
}

fn artifact_filter_where(filter: &ArtifactFilter) -> SqlWhere {
    let mut w = SqlWhere::new();
    if !filter.include_deleted {
        w.push_raw("is_deleted = 0");
    }
    if let Some(ref job_id) = filter.job_id {
        w.push("job_id = ?", job_id.clone());
    }
    if let Some(ref t) = filter.artifact_type {
        w.push("type = ?", t.as_str().to_string());
    }
    if let Some(ref name) = filter.name_contains {
        w.push("name LIKE ? ESCAPE '\\'", contains_pattern(name));
    }
    if let Some(ref after) = filter.created_after {
        w.push("created_at >= ?", format_datetime(after));
    }
    if let Some(ref before) = filter.created_before {
        w.push("created_at <= ?", format_datetime(before));
    }
    w
}
