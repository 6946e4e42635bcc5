//! Aggregated health reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::Inner;

/// Blob-directory reachability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub reachable: bool,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// The whole-store health view returned by `Store::health_check`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// True only when every enabled component checks out.
    pub healthy: bool,
    pub database_connected: bool,
    pub database_writable: bool,
    pub database_integrity_ok: bool,
    /// Absent when artifact storage is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageHealth>,
    /// Absent when the scheduler is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_running: Option<bool>,
    pub checked_at: DateTime<Utc>,
}

pub(crate) fn check(inner: &Inner) -> HealthReport {
    let db = inner.db.health_check();

    let storage = inner.artifacts.blob_store().map(|blob| match blob.stats() {
        Ok(stats) => StorageHealth {
            reachable: true,
            file_count: stats.file_count,
            total_bytes: stats.total_bytes,
        },
        Err(_) => StorageHealth {
            reachable: false,
            file_count: 0,
            total_bytes: 0,
        },
    });

    let scheduler_running = inner.scheduler.as_ref().map(|s| s.is_running());

    let healthy = db.healthy()
        && storage.as_ref().is_none_or(|s| s.reachable)
        && scheduler_running.is_none_or(|running| running);

    HealthReport {
        healthy,
        database_connected: db.connected,
        database_writable: db.writable,
        database_integrity_ok: db.integrity_ok,
        storage,
        scheduler_running,
        checked_at: Utc::now(),
    }
}
