//! tally -- embedded job-accounting and artifact store.
//!
//! The [`Store`] facade composes the database manager, migrations, the
//! content-addressed artifact store, the repositories, the query layer, the
//! usage tracker, and the rollup scheduler behind one lifecycle:
//!
//! ```no_run
//! use tally::{Store, StoreOptions};
//!
//! let mut store = Store::new(StoreOptions::at_dir("/tmp/tally-data"));
//! store.initialize()?;
//! // ... submit jobs, artifacts, events; read dashboards ...
//! store.close()?;
//! # Ok::<(), tally::StoreError>(())
//! ```

mod export;
mod health;
mod store;

pub use export::ExportFormat;
pub use health::{HealthReport, StorageHealth};
pub use store::{ConfigUpdate, Store};

// The public vocabulary callers need alongside the facade.
pub use tally_config::{
    ArtifactStorageConfig, ConfigError, RollupConfig, StoreOptions, UsageCaptureConfig,
    load_options, save_options,
};
pub use tally_core::artifact::{IntegrityIssue, IntegrityProblem, JobArtifact};
pub use tally_core::enums::{
    ArtifactType, EventLevel, EventType, JobSortField, JobStatus, JobType, SortDirection,
};
pub use tally_core::event::{JobEvent, TimelineEntry};
pub use tally_core::filter::{
    ArtifactFilter, CostRateFilter, EventFilter, JobFilter, JobSort, TrendGrouping, UsageFilter,
};
pub use tally_core::job::Job;
pub use tally_core::page::Page;
pub use tally_core::requests::{
    CreateArtifactRequest, CreateCostRateRequest, CreateEventRequest, CreateJobRequest,
    UpdateArtifactRequest, UpdateJobRequest,
};
pub use tally_core::usage::{CostRate, UsageStats};
pub use tally_query::{ActivityEntry, CostBreakdownRow, DashboardStats, TrendPoint};
pub use tally_storage::{
    ArtifactStats, CleanupReport, DatabaseCode, JobStats, NotFoundCode, Result, StoreError,
};
