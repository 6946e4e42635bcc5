//! The [`Store`] facade.

use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate};
use tracing::{info, warn};

use tally_config::StoreOptions;
use tally_core::artifact::{IntegrityIssue, JobArtifact};
use tally_core::event::{JobEvent, TimelineEntry};
use tally_core::filter::{
    ArtifactFilter, CostRateFilter, EventFilter, JobFilter, JobSort, TrendGrouping, UsageFilter,
};
use tally_core::job::Job;
use tally_core::page::Page;
use tally_core::requests::{
    CreateArtifactRequest, CreateCostRateRequest, CreateEventRequest, CreateJobRequest,
    UpdateArtifactRequest, UpdateJobRequest,
};
use tally_core::usage::{CostRate, UsageStats};
use tally_query::{CostBreakdownRow, DashboardStats, QueryLayer, TrendPoint};
use tally_storage::{
    ArtifactRepository, ArtifactStats, BlobReader, BlobStore, CleanupReport, CostRateManager,
    DatabaseCode, DatabaseManager, EventRepository, JobRepository, JobStats, MigrationEngine,
    Result, StoreError, UsageStatsRepository, config_kv,
};
use tally_usage::{RollupEngine, RollupScheduler, UsageTracker};

use crate::export::{self, ExportFormat};
use crate::health::HealthReport;

/// Mutable knobs accepted by [`Store::update_config`]; persisted in the
/// `storage_config` table so background work picks them up at its next fire.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub default_artifact_retention_days: Option<u32>,
    pub max_artifact_size_mb: Option<u64>,
    pub cleanup_enabled: Option<bool>,
    pub usage_stats_rollup_hour: Option<u32>,
}

/// Everything a live store holds. Dropped on close.
pub(crate) struct Inner {
    pub(crate) db: Arc<DatabaseManager>,
    pub(crate) jobs: JobRepository,
    pub(crate) artifacts: ArtifactRepository,
    pub(crate) events: EventRepository,
    pub(crate) rates: CostRateManager,
    pub(crate) stats_rows: UsageStatsRepository,
    pub(crate) query: QueryLayer,
    pub(crate) rollup: RollupEngine,
    pub(crate) tracker: Option<UsageTracker>,
    pub(crate) scheduler: Option<RollupScheduler>,
}

/// Single entry point to the job-accounting store.
///
/// Two-phase lifecycle: construct with [`Store::new`], then
/// [`Store::initialize`]. Every operation before initialization (or after
/// [`Store::close`]) fails with `NOT_INITIALIZED`.
pub struct Store {
    options: StoreOptions,
    inner: Option<Inner>,
}

impl Store {
    /// Builds an unopened store. No I/O happens here.
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            inner: None,
        }
    }

    /// Opens the database and composes every component, in order: database,
    /// migrations, artifact storage, usage tracker, rate manager,
    /// repositories, scheduler, query layer.
    pub fn initialize(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }
        self.options.validate().map_err(|e| {
            StoreError::db(DatabaseCode::InitializationFailed, e)
        })?;

        let db = Arc::new(DatabaseManager::open(
            &self.options.database_path,
            self.options.busy_timeout_ms,
        )?);
        MigrationEngine::new(&db).initialize()?;

        let blob = if self.options.enable_artifact_storage {
            Some(BlobStore::open(
                &self.options.artifact_storage_path,
                &self.options.artifact_storage,
            )?)
        } else {
            None
        };

        let tracker = if self.options.enable_usage_tracking {
            Some(UsageTracker::new(
                db.clone(),
                self.options.usage_capture.clone(),
            )?)
        } else {
            None
        };

        let rates = CostRateManager::new(db.clone(), self.options.enable_validation);

        let jobs = JobRepository::new(
            db.clone(),
            self.options.enable_validation,
            self.options.enable_events,
        );
        let artifacts = ArtifactRepository::new(
            db.clone(),
            blob,
            self.options.enable_validation,
        );
        let events = EventRepository::new(db.clone(), self.options.enable_validation);

        let scheduler = if self.options.enable_rollup_scheduler {
            Some(
                RollupScheduler::start(
                    db.clone(),
                    events.clone(),
                    artifacts.clone(),
                    self.options.rollup.clone(),
                    self.options.usage_capture.clone(),
                    self.options.artifact_storage.clone(),
                )
                .map_err(|e| StoreError::db(DatabaseCode::InitializationFailed, e))?,
            )
        } else {
            None
        };

        let query = QueryLayer::new(db.clone());
        let rollup = RollupEngine::new(db.clone());
        let stats_rows = UsageStatsRepository::new(db.clone());

        self.inner = Some(Inner {
            db,
            jobs,
            artifacts,
            events,
            rates,
            stats_rows,
            query,
            rollup,
            tracker,
            scheduler,
        });
        info!(db = ?self.options.database_path, "store initialized");
        Ok(())
    }

    /// Stops the scheduler, flushes and stops the tracker, and releases the
    /// database handle. Safe to call twice.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        if let Some(mut scheduler) = inner.scheduler.take() {
            scheduler.stop();
        }
        if let Some(mut tracker) = inner.tracker.take() {
            tracker.close();
        }
        // Repositories and the query layer drop their Arcs here; the
        // connection closes with the last reference.
        drop(inner);
        info!("store closed");
        Ok(())
    }

    /// Whether `initialize` has completed and `close` has not.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    fn inner(&self) -> Result<&Inner> {
        self.inner.as_ref().ok_or_else(|| {
            StoreError::db(DatabaseCode::NotInitialized, "store is not initialized")
        })
    }

    // -- Jobs ----------------------------------------------------------------

    pub fn create_job(&self, req: CreateJobRequest) -> Result<Job> {
        let inner = self.inner()?;
        let job = inner.jobs.create_job(req)?;
        inner.query.invalidate();
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        self.inner()?.jobs.get_job(id)
    }

    /// Applies a partial update. A transition into `completed`/`failed`
    /// triggers usage capture; capture failures are logged and never block
    /// the update itself.
    pub fn update_job(&self, id: &str, req: UpdateJobRequest) -> Result<Job> {
        let inner = self.inner()?;
        let updated = inner.jobs.update_job(id, req)?;

        let entered_terminal = !updated.previous_status.is_terminal()
            && matches!(
                updated.job.status,
                tally_core::enums::JobStatus::Completed | tally_core::enums::JobStatus::Failed
            );

        let mut job = updated.job;
        if entered_terminal {
            if let Some(tracker) = &inner.tracker {
                match tracker.capture_job_usage(&job) {
                    Ok(Some(_)) => {
                        // Cost was written back; hand the caller fresh state.
                        job = inner.jobs.get_job(id)?;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(job_id = id, "usage capture failed: {e}"),
                }
            }
        }

        inner.query.invalidate();
        Ok(job)
    }

    /// Soft delete cancels the job; hard delete removes the job row, its
    /// events, and its artifacts (files handled dedupe-aware first).
    pub fn delete_job(&self, id: &str, hard: bool) -> Result<()> {
        let inner = self.inner()?;
        if hard {
            // Remove artifacts through the repository so shared-hash files
            // survive; the row cascade alone would strand refcounting.
            let filter = ArtifactFilter {
                job_id: Some(id.to_string()),
                include_deleted: true,
                ..Default::default()
            };
            loop {
                let page = inner.artifacts.query_artifacts(&filter, Some(1000), None)?;
                if page.items.is_empty() {
                    break;
                }
                for artifact in &page.items {
                    inner.artifacts.delete_artifact(&artifact.id, true)?;
                }
            }
        }
        inner.jobs.delete_job(id, hard)?;
        inner.query.invalidate();
        Ok(())
    }

    pub fn query_jobs(
        &self,
        filter: &JobFilter,
        sort: JobSort,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<Job>> {
        self.inner()?.jobs.query_jobs(filter, sort, limit, cursor)
    }

    pub fn search_jobs(
        &self,
        query: &str,
        filter: &JobFilter,
        limit: Option<i64>,
    ) -> Result<Vec<Job>> {
        self.inner()?.jobs.search_jobs(query, filter, limit)
    }

    pub fn get_jobs_by_parent(&self, parent_id: &str) -> Result<Vec<Job>> {
        self.inner()?.jobs.get_jobs_by_parent(parent_id)
    }

    pub fn get_job_stats(&self) -> Result<JobStats> {
        self.inner()?.jobs.get_job_stats()
    }

    // -- Artifacts -----------------------------------------------------------

    pub fn create_artifact(&self, req: CreateArtifactRequest) -> Result<JobArtifact> {
        let inner = self.inner()?;
        let artifact = inner.artifacts.create_artifact(req)?;
        inner.query.invalidate();
        Ok(artifact)
    }

    pub fn get_artifact(&self, id: &str) -> Result<JobArtifact> {
        self.inner()?.artifacts.get_artifact(id)
    }

    pub fn get_artifact_data(&self, id: &str) -> Result<Vec<u8>> {
        self.inner()?.artifacts.get_artifact_data(id)
    }

    pub fn get_artifact_stream(&self, id: &str) -> Result<BlobReader> {
        self.inner()?.artifacts.get_artifact_stream(id)
    }

    pub fn query_artifacts(
        &self,
        filter: &ArtifactFilter,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<JobArtifact>> {
        self.inner()?.artifacts.query_artifacts(filter, limit, cursor)
    }

    pub fn get_artifacts_by_job(&self, job_id: &str) -> Result<Vec<JobArtifact>> {
        self.inner()?.artifacts.get_artifacts_by_job(job_id)
    }

    pub fn update_artifact(&self, id: &str, req: UpdateArtifactRequest) -> Result<JobArtifact> {
        self.inner()?.artifacts.update_artifact(id, req)
    }

    pub fn delete_artifact(&self, id: &str, hard: bool) -> Result<()> {
        self.inner()?.artifacts.delete_artifact(id, hard)
    }

    pub fn search_artifacts(&self, query: &str, limit: Option<i64>) -> Result<Vec<JobArtifact>> {
        self.inner()?.artifacts.search_artifacts(query, limit)
    }

    pub fn get_artifact_stats(&self) -> Result<ArtifactStats> {
        self.inner()?.artifacts.get_artifact_stats()
    }

    /// Runs the retention passes with the currently configured knobs.
    pub fn cleanup_old_artifacts(&self) -> Result<CleanupReport> {
        let inner = self.inner()?;
        let retention = config_kv::get_config_u32(
            &inner.db,
            "default_artifact_retention_days",
            self.options.artifact_storage.default_retention_days,
        );
        inner
            .artifacts
            .cleanup_old_artifacts(retention, self.options.artifact_storage.hard_delete_enabled)
    }

    pub fn verify_artifact_integrity(&self) -> Result<Vec<IntegrityIssue>> {
        self.inner()?.artifacts.verify_integrity()
    }

    // -- Events --------------------------------------------------------------

    pub fn create_event(&self, req: CreateEventRequest) -> Result<JobEvent> {
        self.inner()?.events.create_event(req)
    }

    pub fn create_batch_events(&self, reqs: Vec<CreateEventRequest>) -> Result<usize> {
        self.inner()?.events.create_batch_events(reqs)
    }

    pub fn query_events(
        &self,
        filter: &EventFilter,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<Page<JobEvent>> {
        self.inner()?.events.query_events(filter, limit, cursor)
    }

    pub fn get_events_by_job(&self, job_id: &str, limit: Option<i64>) -> Result<Vec<JobEvent>> {
        self.inner()?.events.get_events_by_job(job_id, limit)
    }

    pub fn get_job_timeline(&self, job_id: &str) -> Result<Vec<TimelineEntry>> {
        self.inner()?.events.get_job_timeline(job_id)
    }

    pub fn cleanup_old_events(&self, retention_days: u32) -> Result<usize> {
        self.inner()?.events.cleanup_old_events(retention_days)
    }

    // -- Cost rates ----------------------------------------------------------

    pub fn create_cost_rate(&self, req: CreateCostRateRequest) -> Result<CostRate> {
        self.inner()?.rates.create_cost_rate(req)
    }

    pub fn get_current_cost_rate(&self, provider: &str, model: &str) -> Result<Option<CostRate>> {
        self.inner()?.rates.get_current_cost_rate(provider, model)
    }

    pub fn get_cost_rate_on(
        &self,
        provider: &str,
        model: &str,
        date: NaiveDate,
    ) -> Result<Option<CostRate>> {
        self.inner()?.rates.get_cost_rate_on(provider, model, date)
    }

    pub fn get_cost_rates(&self, filter: &CostRateFilter) -> Result<Vec<CostRate>> {
        self.inner()?.rates.get_cost_rates(filter)
    }

    // -- Usage & dashboards --------------------------------------------------

    pub fn get_usage_stats(&self, filter: &UsageFilter) -> Result<Vec<UsageStats>> {
        self.inner()?.query.get_usage_stats(filter)
    }

    pub fn get_cost_breakdown(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Vec<CostBreakdownRow>> {
        self.inner()?
            .query
            .get_cost_breakdown(start, end, provider, model)
    }

    pub fn get_dashboard_stats(&self, days: u32) -> Result<DashboardStats> {
        self.inner()?.query.get_dashboard_stats(days)
    }

    pub fn get_usage_trends(
        &self,
        days: u32,
        group_by: TrendGrouping,
    ) -> Result<Vec<TrendPoint>> {
        self.inner()?.query.get_usage_trends(days, group_by)
    }

    // -- Rollups -------------------------------------------------------------

    /// Manually replays the daily rollup (defaults to yesterday).
    pub fn trigger_daily_rollup(&self, date: Option<NaiveDate>) -> Result<usize> {
        let inner = self.inner()?;
        let date = date.unwrap_or_else(|| Local::now().date_naive() - chrono::Duration::days(1));
        let written = inner.rollup.perform_daily_rollup(date)?;
        inner.query.invalidate();
        Ok(written)
    }

    /// Manually replays the weekly rollup (defaults to the last completed
    /// Sun-Sat week).
    pub fn trigger_weekly_rollup(&self, week_start: Option<NaiveDate>) -> Result<usize> {
        let inner = self.inner()?;
        let week_start = week_start.unwrap_or_else(|| {
            let today = Local::now().date_naive();
            let since_sunday = today.weekday().num_days_from_sunday();
            today - chrono::Duration::days(i64::from(since_sunday) + 7)
        });
        let written = inner.rollup.perform_weekly_rollup(week_start)?;
        inner.query.invalidate();
        Ok(written)
    }

    // -- Maintenance ---------------------------------------------------------

    pub fn backup(&self, dest: impl AsRef<std::path::Path>) -> Result<()> {
        self.inner()?.db.backup(dest)
    }

    pub fn restore(&self, src: impl AsRef<std::path::Path>) -> Result<()> {
        let inner = self.inner()?;
        inner.db.restore(src)?;
        inner.query.invalidate();
        Ok(())
    }

    pub fn vacuum(&self) -> Result<()> {
        self.inner()?.db.vacuum()
    }

    pub fn analyze(&self) -> Result<()> {
        self.inner()?.db.analyze()
    }

    pub fn integrity_check(&self) -> Result<Vec<String>> {
        self.inner()?.db.integrity_check()
    }

    /// Aggregated health across database, artifact storage, and scheduler.
    pub fn health_check(&self) -> Result<HealthReport> {
        let inner = self.inner()?;
        Ok(crate::health::check(inner))
    }

    /// Serializes every table as JSON or sectioned CSV.
    pub fn export_data(&self, format: ExportFormat) -> Result<String> {
        let inner = self.inner()?;
        export::export(inner, format)
    }

    /// Persists mutable knobs; background work reads them at its next fire.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        let inner = self.inner()?;
        if let Some(days) = update.default_artifact_retention_days {
            config_kv::set_config(&inner.db, "default_artifact_retention_days", &days.to_string())?;
        }
        if let Some(mb) = update.max_artifact_size_mb {
            config_kv::set_config(&inner.db, "max_artifact_size_mb", &mb.to_string())?;
        }
        if let Some(enabled) = update.cleanup_enabled {
            config_kv::set_config(&inner.db, "cleanup_enabled", if enabled { "true" } else { "false" })?;
        }
        if let Some(hour) = update.usage_stats_rollup_hour {
            config_kv::set_config(&inner.db, "usage_stats_rollup_hour", &hour.min(23).to_string())?;
        }
        Ok(())
    }

    /// The options this store was built with.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::enums::JobStatus;

    fn open_store(dir: &std::path::Path) -> Store {
        let mut options = StoreOptions::at_dir(dir);
        options.enable_rollup_scheduler = false;
        let mut store = Store::new(options);
        store.initialize().unwrap();
        store
    }

    #[test]
    fn operations_fail_before_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(StoreOptions::at_dir(dir.path()));
        let err = store.get_job("x").unwrap_err();
        assert_eq!(err.code_str(), "NOT_INITIALIZED");
    }

    #[test]
    fn operations_fail_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.close().unwrap();
        let err = store
            .create_job(CreateJobRequest {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code_str(), "NOT_INITIALIZED");
    }

    #[test]
    fn initialize_twice_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(dir.path());
        store.initialize().unwrap();
        assert!(store.is_initialized());
    }

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = {
            let store = open_store(dir.path());
            let job = store
                .create_job(CreateJobRequest {
                    title: "durable".into(),
                    ..Default::default()
                })
                .unwrap();
            job.id
            // store drops (and closes) here
        };

        let store = open_store(dir.path());
        let job = store.get_job(&job_id).unwrap();
        assert_eq!(job.title, "durable");
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn hard_delete_job_cleans_artifacts_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let job = store
            .create_job(CreateJobRequest {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap();
        let artifact = store
            .create_artifact(CreateArtifactRequest {
                job_id: job.id.clone(),
                artifact_type: tally_core::enums::ArtifactType::File,
                name: "f".into(),
                data: b"only-ref".to_vec(),
                ..Default::default()
            })
            .unwrap();

        store.delete_job(&job.id, true).unwrap();

        assert!(store.get_job(&job.id).unwrap_err().is_not_found());
        assert!(store.get_artifact(&artifact.id).unwrap_err().is_not_found());
        assert!(store.get_job_timeline(&job.id).unwrap().is_empty());
    }

    #[test]
    fn update_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store
            .update_config(ConfigUpdate {
                default_artifact_retention_days: Some(30),
                usage_stats_rollup_hour: Some(4),
                ..Default::default()
            })
            .unwrap();
        let inner = store.inner().unwrap();
        assert_eq!(
            config_kv::get_config_u32(&inner.db, "default_artifact_retention_days", 0),
            30
        );
        assert_eq!(
            config_kv::get_config_u32(&inner.db, "usage_stats_rollup_hour", 0),
            4
        );
    }
}
