//! [`DatabaseManager`] -- owns the SQLite connection and its durability
//! configuration.
//!
//! Wraps a [`rusqlite::Connection`] in a `Mutex`. All public methods acquire
//! the lock, execute SQL, and release it; every other component holds a
//! shared reference and must never close the connection itself.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{DatabaseCode, Result, StoreError};

/// How many times a transaction begin is retried when the database is busy.
const BUSY_RETRIES: u32 = 3;

/// Connectivity/writability snapshot produced by [`DatabaseManager::health_check`].
#[derive(Debug, Clone)]
pub struct DbHealth {
    pub connected: bool,
    pub writable: bool,
    pub integrity_ok: bool,
}

impl DbHealth {
    pub fn healthy(&self) -> bool {
        self.connected && self.writable && self.integrity_ok
    }
}

/// Owns the SQLite handle; repositories borrow it.
pub struct DatabaseManager {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl DatabaseManager {
    /// Opens (or creates) the database at `path`, creating the parent
    /// directory, and applies the durability pragmas.
    pub fn open(path: impl AsRef<Path>, busy_timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening database");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::db(
                    DatabaseCode::InitializationFailed,
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            StoreError::db(
                DatabaseCode::InitializationFailed,
                format!("failed to open {}: {e}", path.display()),
            )
        })?;

        let manager = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        manager.configure_connection(busy_timeout_ms)?;
        Ok(manager)
    }

    /// Opens an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory database");
        let conn = Connection::open_in_memory().map_err(|e| {
            StoreError::db(
                DatabaseCode::InitializationFailed,
                format!("failed to open in-memory db: {e}"),
            )
        })?;
        let manager = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        manager.configure_connection(5_000)?;
        Ok(manager)
    }

    /// Sets connection pragmas: WAL journaling, foreign keys, NORMAL
    /// synchronous durability, a ~2 MB page cache, in-memory temp store,
    /// and the busy timeout.
    fn configure_connection(&self, busy_timeout_ms: u64) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -2048;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = {busy_timeout_ms};"
        ))
        .map_err(|e| {
            StoreError::db(
                DatabaseCode::InitializationFailed,
                format!("failed to set pragmas: {e}"),
            )
        })?;
        Ok(())
    }

    /// Acquires the connection lock.
    pub(crate) fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            StoreError::db(DatabaseCode::QueryFailed, format!("mutex poisoned: {e}"))
        })
    }

    /// Runs `f` with the locked connection. The workhorse for repositories.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        f(&conn)
    }

    /// Runs `f` inside a transaction: commit on `Ok`, rollback on `Err`.
    ///
    /// The transaction begin is retried a few times when another writer holds
    /// the database past the busy timeout.
    pub fn execute_in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;

        let mut attempt = 0;
        let tx = loop {
            match conn.unchecked_transaction() {
                Ok(tx) => break tx,
                Err(e) if is_busy(&e) && attempt < BUSY_RETRIES => {
                    attempt += 1;
                    warn!(attempt, "database busy, retrying transaction begin");
                    std::thread::sleep(Duration::from_millis(50 * u64::from(attempt)));
                }
                Err(e) => {
                    return Err(StoreError::db(
                        DatabaseCode::TransactionFailed,
                        format!("failed to begin: {e}"),
                    ));
                }
            }
        };

        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(|e| {
                    StoreError::db(
                        DatabaseCode::TransactionFailed,
                        format!("failed to commit: {e}"),
                    )
                })?;
                Ok(value)
            }
            Err(e) => {
                // Rollback happens on drop; surface the original error.
                Err(e)
            }
        }
    }

    /// Executes a batch of statements outside any repository.
    pub fn exec(&self, sql: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(sql)
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
    }

    // -- Maintenance ---------------------------------------------------------

    /// Copies the live database into `dest` using the online backup API.
    pub fn backup(&self, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        info!(?dest, "backing up database");
        let conn = self.lock_conn()?;
        let mut target = Connection::open(dest)
            .map_err(|e| StoreError::db(DatabaseCode::BackupFailed, e))?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut target)
            .map_err(|e| StoreError::db(DatabaseCode::BackupFailed, e))?;
        backup
            .run_to_completion(256, Duration::from_millis(10), None)
            .map_err(|e| StoreError::db(DatabaseCode::BackupFailed, e))?;
        Ok(())
    }

    /// Replaces the live database contents from a backup file.
    pub fn restore(&self, src: impl AsRef<Path>) -> Result<()> {
        let src = src.as_ref();
        info!(?src, "restoring database");
        if !src.exists() {
            return Err(StoreError::db(
                DatabaseCode::RestoreFailed,
                format!("backup file {} does not exist", src.display()),
            ));
        }
        let mut conn = self.lock_conn()?;
        let source = Connection::open(src)
            .map_err(|e| StoreError::db(DatabaseCode::RestoreFailed, e))?;
        let backup = rusqlite::backup::Backup::new(&source, &mut conn)
            .map_err(|e| StoreError::db(DatabaseCode::RestoreFailed, e))?;
        backup
            .run_to_completion(256, Duration::from_millis(10), None)
            .map_err(|e| StoreError::db(DatabaseCode::RestoreFailed, e))?;
        Ok(())
    }

    /// Reclaims free pages and defragments the file.
    pub fn vacuum(&self) -> Result<()> {
        info!("running VACUUM");
        let conn = self.lock_conn()?;
        conn.execute_batch("VACUUM")
            .map_err(|e| StoreError::db(DatabaseCode::VacuumFailed, e))
    }

    /// Refreshes the query-planner statistics.
    pub fn analyze(&self) -> Result<()> {
        debug!("running ANALYZE");
        let conn = self.lock_conn()?;
        conn.execute_batch("ANALYZE")
            .map_err(|e| StoreError::db(DatabaseCode::AnalyzeFailed, e))
    }

    /// Runs `PRAGMA integrity_check`, returning any reported problems.
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare("PRAGMA integrity_check")
            .map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?;

        let mut problems = Vec::new();
        for row in rows {
            let line = row.map_err(|e| StoreError::db(DatabaseCode::IntegrityCheckFailed, e))?;
            if line != "ok" {
                problems.push(line);
            }
        }
        Ok(problems)
    }

    /// Probes connectivity, writability, and integrity.
    pub fn health_check(&self) -> DbHealth {
        let connected = self
            .with_conn(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
            })
            .is_ok();

        // A write lock we immediately release proves writability without
        // mutating anything.
        let writable = self
            .with_conn(|conn| {
                conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;")
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
            })
            .is_ok();

        let integrity_ok = matches!(self.integrity_check(), Ok(ref p) if p.is_empty());

        DbHealth {
            connected,
            writable,
            integrity_ok,
        }
    }

    /// The database file path, when file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_and_probe() {
        let db = DatabaseManager::open_in_memory().unwrap();
        let health = db.health_check();
        assert!(health.connected);
        assert!(health.writable);
        assert!(health.integrity_ok);
        assert!(health.healthy());
    }

    #[test]
    fn transaction_commits_on_ok() {
        let db = DatabaseManager::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (x INTEGER)").unwrap();
        db.execute_in_transaction(|conn| {
            conn.execute("INSERT INTO t (x) VALUES (1)", [])
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            Ok(())
        })
        .unwrap();
        let count = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get::<_, i64>(0))
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let db = DatabaseManager::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (x INTEGER)").unwrap();
        let result: Result<()> = db.execute_in_transaction(|conn| {
            conn.execute("INSERT INTO t (x) VALUES (1)", [])
                .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            Err(StoreError::db(DatabaseCode::QueryFailed, "boom"))
        });
        assert!(result.is_err());
        let count = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM t", [], |r| r.get::<_, i64>(0))
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::open(dir.path().join("live.db"), 1_000).unwrap();
        db.exec("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (42);")
            .unwrap();

        let backup_path = dir.path().join("backup.db");
        db.backup(&backup_path).unwrap();

        db.exec("DELETE FROM t").unwrap();
        db.restore(&backup_path).unwrap();

        let x = db
            .with_conn(|conn| {
                conn.query_row("SELECT x FROM t", [], |r| r.get::<_, i64>(0))
                    .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))
            })
            .unwrap();
        assert_eq!(x, 42);
    }

    #[test]
    fn restore_missing_file_fails() {
        let db = DatabaseManager::open_in_memory().unwrap();
        let err = db.restore("/nonexistent/backup.db").unwrap_err();
        assert_eq!(err.code_str(), "RESTORE_FAILED");
    }
}
