//! Versioned schema migrations.
//!
//! Applied migrations are recorded in
//! `schema_migrations(version PK, name, executed_at, execution_time_ms)`.
//! Each migration runs in its own transaction; the initial migration builds
//! the whole catalog from [`crate::schema`] and seeds default cost rates and
//! storage knobs.

use std::time::Instant;

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{DatabaseCode, Result, StoreError};
use crate::manager::DatabaseManager;
use crate::schema;
use crate::sql::format_datetime;

/// One reversible schema change.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    /// Statements applied going forward. The initial migration also runs
    /// seed inserts, handled in [`apply_up`].
    pub up: &'static [&'static str],
    /// Statements applied going backward; `None` makes the migration
    /// irreversible and blocks `rollback_to_version` across it.
    pub down: Option<&'static [&'static str]>,
}

/// The ordered migration catalog. Versions are monotonic.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    up: schema::SCHEMA_STATEMENTS,
    down: Some(&[
        "DROP TRIGGER IF EXISTS trg_job_events_no_update",
        "DROP TABLE IF EXISTS usage_stats",
        "DROP TABLE IF EXISTS cost_rates",
        "DROP TABLE IF EXISTS job_events",
        "DROP TABLE IF EXISTS job_artifacts",
        "DROP TABLE IF EXISTS jobs",
        "DROP TABLE IF EXISTS storage_config",
    ]),
}];

/// Runs migrations against a [`DatabaseManager`].
pub struct MigrationEngine<'a> {
    db: &'a DatabaseManager,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { db }
    }

    /// Creates the bookkeeping table and applies every pending migration.
    pub fn initialize(&self) -> Result<()> {
        self.db.exec(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version           INTEGER PRIMARY KEY,
                name              TEXT NOT NULL,
                executed_at       TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL
            )",
        )?;
        self.run_all_migrations()
    }

    /// Highest applied version, or 0 on a fresh database.
    pub fn current_version(&self) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
                [],
                |row| row.get(0),
            )
            .map_err(|e| StoreError::db(DatabaseCode::MigrationFailed, e))
        })
    }

    /// Applies every migration with version greater than the current one,
    /// each in its own transaction, recording execution time.
    pub fn run_all_migrations(&self) -> Result<()> {
        let current = self.current_version()?;
        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let started = Instant::now();
            self.db.execute_in_transaction(|conn| {
                apply_up(conn, migration)?;
                record(conn, migration, started.elapsed().as_millis() as i64)
            })?;
            info!(
                version = migration.version,
                name = migration.name,
                "applied migration"
            );
        }
        Ok(())
    }

    /// Reverts migrations above `target` in reverse version order.
    ///
    /// Fails without touching anything if any selected migration lacks a
    /// `down`.
    pub fn rollback_to_version(&self, target: i64) -> Result<()> {
        let current = self.current_version()?;
        let mut selected: Vec<&Migration> = MIGRATIONS
            .iter()
            .filter(|m| m.version > target && m.version <= current)
            .collect();
        selected.sort_by_key(|m| std::cmp::Reverse(m.version));

        for migration in &selected {
            if migration.down.is_none() {
                return Err(StoreError::db(
                    DatabaseCode::MigrationFailed,
                    format!(
                        "migration {} ({}) is irreversible",
                        migration.version, migration.name
                    ),
                ));
            }
        }

        for migration in selected {
            let down = migration.down.expect("checked above");
            self.db.execute_in_transaction(|conn| {
                for stmt in down {
                    conn.execute_batch(stmt).map_err(|e| {
                        StoreError::db(
                            DatabaseCode::MigrationFailed,
                            format!("down {} failed: {e}", migration.name),
                        )
                    })?;
                }
                conn.execute(
                    "DELETE FROM schema_migrations WHERE version = ?1",
                    params![migration.version],
                )
                .map_err(|e| StoreError::db(DatabaseCode::MigrationFailed, e))?;
                Ok(())
            })?;
            info!(
                version = migration.version,
                name = migration.name,
                "rolled back migration"
            );
        }
        Ok(())
    }
}

/// Applies a migration's forward statements (plus seeds for version 1).
fn apply_up(conn: &Connection, migration: &Migration) -> Result<()> {
    debug!(version = migration.version, "applying migration");
    for stmt in migration.up {
        conn.execute_batch(stmt).map_err(|e| {
            StoreError::db(
                DatabaseCode::MigrationFailed,
                format!(
                    "{} failed: {e}\nStatement: {}",
                    migration.name,
                    truncate(stmt, 120)
                ),
            )
        })?;
    }
    if migration.version == 1 {
        seed_defaults(conn)?;
    }
    Ok(())
}

/// Seeds the default cost-rate table and storage knobs. Idempotent.
fn seed_defaults(conn: &Connection) -> Result<()> {
    for &(key, value) in schema::DEFAULT_STORAGE_CONFIG {
        conn.execute(
            "INSERT OR IGNORE INTO storage_config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| {
            StoreError::db(
                DatabaseCode::MigrationFailed,
                format!("failed to seed {key}: {e}"),
            )
        })?;
    }

    let now = format_datetime(&chrono::Utc::now());
    for &(provider, model, input_rate, output_rate) in schema::DEFAULT_COST_RATES {
        conn.execute(
            "INSERT OR IGNORE INTO cost_rates
                 (id, provider, model, input_token_rate, output_token_rate,
                  currency, effective_from, effective_to, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'USD', ?6, NULL, ?7)",
            params![
                format!("cr_{provider}_{model}"),
                provider,
                model,
                input_rate,
                output_rate,
                schema::DEFAULT_RATES_EFFECTIVE_FROM,
                now,
            ],
        )
        .map_err(|e| {
            StoreError::db(
                DatabaseCode::MigrationFailed,
                format!("failed to seed rate {provider}/{model}: {e}"),
            )
        })?;
    }
    Ok(())
}

/// Records a migration as applied.
fn record(conn: &Connection, migration: &Migration, elapsed_ms: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, name, executed_at, execution_time_ms)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            migration.version,
            migration.name,
            format_datetime(&chrono::Utc::now()),
            elapsed_ms,
        ],
    )
    .map_err(|e| StoreError::db(DatabaseCode::MigrationFailed, e))?;
    Ok(())
}

/// Truncates a statement for error messages.
fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        format!("{}...", &s[..max])
    } else {
        s.to_string()
    }
}
