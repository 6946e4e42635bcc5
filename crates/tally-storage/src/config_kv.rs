//! The `storage_config` key/value table of mutable knobs.

use std::collections::HashMap;

use rusqlite::params;

use crate::error::{DatabaseCode, Result, StoreError};
use crate::manager::DatabaseManager;

/// Reads one knob, if set.
pub fn get_config(db: &DatabaseManager, key: &str) -> Result<Option<String>> {
    db.with_conn(|conn| {
        match conn.query_row(
            "SELECT value FROM storage_config WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::db(DatabaseCode::QueryFailed, e)),
        }
    })
}

/// Reads a knob as an integer, falling back to `default` when absent or
/// unparseable.
pub fn get_config_u32(db: &DatabaseManager, key: &str, default: u32) -> u32 {
    get_config(db, key)
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Reads a knob as a boolean (`"true"`/`"false"`), falling back to `default`.
pub fn get_config_bool(db: &DatabaseManager, key: &str, default: bool) -> bool {
    match get_config(db, key).ok().flatten().as_deref() {
        Some("true") => true,
        Some("false") => false,
        _ => default,
    }
}

/// Writes one knob.
pub fn set_config(db: &DatabaseManager, key: &str, value: &str) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO storage_config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
        Ok(())
    })
}

/// All knobs as a map.
pub fn all_config(db: &DatabaseManager) -> Result<HashMap<String, String>> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT key, value FROM storage_config")
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
        let mut map = HashMap::new();
        for row in rows {
            let (k, v) = row.map_err(|e| StoreError::db(DatabaseCode::QueryFailed, e))?;
            map.insert(k, v);
        }
        Ok(map)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationEngine;
    use pretty_assertions::assert_eq;

    fn db() -> DatabaseManager {
        let db = DatabaseManager::open_in_memory().unwrap();
        MigrationEngine::new(&db).initialize().unwrap();
        db
    }

    #[test]
    fn seeded_knobs_are_readable() {
        let db = db();
        assert_eq!(get_config_u32(&db, "default_artifact_retention_days", 0), 90);
        assert_eq!(get_config_u32(&db, "usage_stats_rollup_hour", 0), 2);
        assert!(get_config_bool(&db, "cleanup_enabled", false));
    }

    #[test]
    fn set_overwrites() {
        let db = db();
        set_config(&db, "max_artifact_size_mb", "250").unwrap();
        assert_eq!(get_config_u32(&db, "max_artifact_size_mb", 0), 250);
    }

    #[test]
    fn missing_key_uses_default() {
        let db = db();
        assert_eq!(get_config(&db, "no_such_knob").unwrap(), None);
        assert_eq!(get_config_u32(&db, "no_such_knob", 7), 7);
    }
}
