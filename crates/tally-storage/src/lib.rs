//! Persistence for the tally system.
//!
//! Provides the [`DatabaseManager`] (SQLite with WAL durability), the schema
//! and migration catalog, the content-addressed [`BlobStore`], and the typed
//! repositories over jobs, artifacts, events, cost rates, and usage stats.

pub mod artifacts;
pub mod blob;
pub mod config_kv;
pub mod cost_rates;
pub mod error;
pub mod events;
pub mod jobs;
pub mod manager;
pub mod migrations;
pub mod schema;
pub mod sql;
pub mod usage_stats;

// Re-exports for convenience.
pub use artifacts::{ArtifactRepository, ArtifactStats, CleanupReport};
pub use blob::{BlobReader, BlobStore, BlobStoreStats, StoredBlob};
pub use cost_rates::CostRateManager;
pub use error::{DatabaseCode, NotFoundCode, Result, StoreError};
pub use events::EventRepository;
pub use jobs::{JobRepository, JobStats, JobUpdated};
pub use manager::{DatabaseManager, DbHealth};
pub use migrations::{Migration, MigrationEngine};
pub use usage_stats::UsageStatsRepository;
