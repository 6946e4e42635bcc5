//! Wall-clock rollup scheduler.
//!
//! A single named thread sleeps until the next configured local hour
//! (02:00 by default), then rolls up yesterday, runs the weekly rollup after
//! a completed Sun-Sat week, prunes old stats/events/artifacts, and
//! reschedules. The sleep doubles as the shutdown channel, so `stop` wakes
//! it immediately. Missed fires (host asleep) are not replayed; manual
//! triggers go through [`RollupEngine`](crate::rollup::RollupEngine)
//! directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate, TimeZone, Weekday};
use tracing::{debug, info, warn};

use tally_config::{ArtifactStorageConfig, RollupConfig, UsageCaptureConfig};
use tally_storage::{ArtifactRepository, DatabaseManager, EventRepository, config_kv};

use crate::rollup::RollupEngine;

/// Event rows are kept this long between scheduler prunes.
const EVENT_RETENTION_DAYS: u32 = 90;

enum SchedulerCommand {
    Shutdown,
}

/// Everything one scheduler fire needs.
struct SchedulerContext {
    db: Arc<DatabaseManager>,
    rollup: RollupEngine,
    events: EventRepository,
    artifacts: ArtifactRepository,
    rollup_config: RollupConfig,
    usage_config: UsageCaptureConfig,
    artifact_config: ArtifactStorageConfig,
}

/// Handle to the background rollup worker.
pub struct RollupScheduler {
    tx: Sender<SchedulerCommand>,
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl RollupScheduler {
    /// Spawns the worker thread.
    pub fn start(
        db: Arc<DatabaseManager>,
        events: EventRepository,
        artifacts: ArtifactRepository,
        rollup_config: RollupConfig,
        usage_config: UsageCaptureConfig,
        artifact_config: ArtifactStorageConfig,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let ctx = SchedulerContext {
            rollup: RollupEngine::new(db.clone()),
            db,
            events,
            artifacts,
            rollup_config,
            usage_config,
            artifact_config,
        };

        let handle = thread::Builder::new()
            .name("rollup-scheduler".into())
            .spawn(move || {
                scheduler_loop(rx, ctx);
                thread_running.store(false, Ordering::SeqCst);
            })?;

        Ok(Self {
            tx,
            handle: Some(handle),
            running,
        })
    }

    /// Whether the worker thread is alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the worker and waits for it to exit.
    pub fn stop(&mut self) {
        let _ = self.tx.send(SchedulerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RollupScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduler_loop(rx: mpsc::Receiver<SchedulerCommand>, ctx: SchedulerContext) {
    info!("rollup scheduler started");
    loop {
        // The hour knob is re-read each cycle so update_config takes effect
        // without a restart.
        let hour = config_kv::get_config_u32(
            &ctx.db,
            "usage_stats_rollup_hour",
            ctx.rollup_config.rollup_hour_local,
        )
        .min(23);
        let wait = until_next_fire(hour);
        debug!(?wait, hour, "scheduler sleeping until next fire");

        match rx.recv_timeout(wait) {
            Ok(SchedulerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => fire(&ctx),
        }
    }
    info!("rollup scheduler stopped");
}

/// One scheduled fire: rollups then retention pruning.
fn fire(ctx: &SchedulerContext) {
    let yesterday = Local::now().date_naive() - chrono::Duration::days(1);

    if let Err(e) = ctx.rollup.perform_daily_rollup(yesterday) {
        warn!(%yesterday, "daily rollup failed: {e}");
    }

    if ctx.rollup_config.enable_weekly_rollups && yesterday.weekday() == Weekday::Sun {
        let week_start = last_completed_week_start(yesterday);
        if let Err(e) = ctx.rollup.perform_weekly_rollup(week_start) {
            warn!(%week_start, "weekly rollup failed: {e}");
        }
    }

    if let Err(e) = ctx.rollup.cleanup_old_stats(ctx.usage_config.retention_days) {
        warn!("usage stats pruning failed: {e}");
    }
    if let Err(e) = ctx.events.cleanup_old_events(EVENT_RETENTION_DAYS) {
        warn!("event pruning failed: {e}");
    }

    let cleanup_enabled = config_kv::get_config_bool(
        &ctx.db,
        "cleanup_enabled",
        ctx.artifact_config.cleanup_enabled,
    );
    if cleanup_enabled {
        let retention = config_kv::get_config_u32(
            &ctx.db,
            "default_artifact_retention_days",
            ctx.artifact_config.default_retention_days,
        );
        if let Err(e) = ctx
            .artifacts
            .cleanup_old_artifacts(retention, ctx.artifact_config.hard_delete_enabled)
        {
            warn!("artifact retention cleanup failed: {e}");
        }
    }
}

/// Start of the completed Sun-Sat week that ended the day before `sunday`.
pub fn last_completed_week_start(sunday: NaiveDate) -> NaiveDate {
    debug_assert_eq!(sunday.weekday(), Weekday::Sun);
    sunday - chrono::Duration::days(7)
}

/// Duration until the next local `hour:00`.
fn until_next_fire(hour: u32) -> Duration {
    let now = Local::now();
    let today = now.date_naive();
    let target = next_local_occurrence(today, hour, &now);
    (target - now)
        .to_std()
        .unwrap_or(Duration::from_secs(60 * 60))
}

fn next_local_occurrence(
    today: NaiveDate,
    hour: u32,
    now: &chrono::DateTime<Local>,
) -> chrono::DateTime<Local> {
    for day_offset in 0..3 {
        let date = today + chrono::Duration::days(day_offset);
        // `earliest` picks the first valid instant around DST transitions;
        // a nonexistent local time falls through to the next day.
        if let Some(candidate) = Local
            .with_ymd_and_hms(date.year(), date.month(), date.day(), hour, 0, 0)
            .earliest()
        {
            if candidate > *now {
                return candidate;
            }
        }
    }
    *now + chrono::Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_storage::{BlobStore, JobRepository, MigrationEngine};

    fn scheduler() -> (Arc<DatabaseManager>, RollupScheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        let blob = BlobStore::open(
            dir.path().join("blobs"),
            &ArtifactStorageConfig::default(),
        )
        .unwrap();
        let scheduler = RollupScheduler::start(
            db.clone(),
            EventRepository::new(db.clone(), true),
            ArtifactRepository::new(db.clone(), Some(blob), true),
            RollupConfig::default(),
            UsageCaptureConfig::default(),
            ArtifactStorageConfig::default(),
        )
        .unwrap();
        (db, scheduler, dir)
    }

    #[test]
    fn starts_and_stops_cleanly() {
        let (_db, mut scheduler, _dir) = scheduler();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn next_fire_is_within_a_day() {
        let wait = until_next_fire(2);
        assert!(wait <= Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn completed_week_start_is_previous_sunday() {
        // 2024-08-04 is a Sunday.
        let sunday: NaiveDate = "2024-08-04".parse().unwrap();
        let start = last_completed_week_start(sunday);
        assert_eq!(start, "2024-07-28".parse::<NaiveDate>().unwrap());
        assert_eq!(start.weekday(), Weekday::Sun);
    }

    #[test]
    fn fire_runs_rollup_and_pruning() {
        let (db, mut scheduler, _dir) = scheduler();
        // Give yesterday's date a finished job, then fire manually through
        // the same path the timer uses.
        let yesterday = Local::now().date_naive() - chrono::Duration::days(1);
        db.exec(&format!(
            "INSERT INTO jobs (id, title, status, provider, model,
                               input_tokens, output_tokens,
                               created_at, updated_at, completed_at)
             VALUES ('y1', 't', 'completed', 'openai', 'gpt-4o', 10, 5,
                     '{yesterday}T08:00:00.000Z', '{yesterday}T08:00:00.000Z',
                     '{yesterday}T08:05:00.000Z')"
        ))
        .unwrap();
        scheduler.stop();

        let engine = RollupEngine::new(db.clone());
        let written = engine.perform_daily_rollup(yesterday).unwrap();
        assert_eq!(written, 1);

        // Mirror of the fire() pruning path.
        let jobs = JobRepository::new(db, true, false);
        let stats = jobs.get_job_stats().unwrap();
        assert_eq!(stats.total_jobs, 1);
    }
}
