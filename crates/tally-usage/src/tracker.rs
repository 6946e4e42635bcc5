//! Usage capture on job completion.
//!
//! Cost is computed and written back on the job synchronously inside the
//! update path. The derived `usage_stats` row flows through a bounded
//! channel to a dedicated writer thread that batches upserts, flushing when
//! the batch fills or the interval timer fires. Capture is best-effort end
//! to end: a full channel drops the stat (the next rollup recomputes it),
//! and the caller logs rather than propagates failures.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::params;
use tracing::{debug, info, warn};

use tally_config::UsageCaptureConfig;
use tally_core::enums::JobStatus;
use tally_core::job::Job;
use tally_core::usage::UsageStats;
use tally_storage::sql::format_datetime;
use tally_storage::{
    CostRateManager, DatabaseCode, DatabaseManager, Result, StoreError, UsageStatsRepository,
};

use crate::cost::{calculate_cost, cost_differs};

/// Channel depth before captures are dropped.
const CHANNEL_BUFFER: usize = 1024;

enum WriterCommand {
    Record(Box<UsageStats>),
    /// Flush now and ack; used by `close` and tests.
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Captures per-job usage on terminal transitions.
pub struct UsageTracker {
    db: Arc<DatabaseManager>,
    rates: CostRateManager,
    tx: SyncSender<WriterCommand>,
    writer: Option<JoinHandle<()>>,
    config: UsageCaptureConfig,
}

impl UsageTracker {
    /// Spawns the stat writer thread.
    pub fn new(db: Arc<DatabaseManager>, config: UsageCaptureConfig) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<WriterCommand>(CHANNEL_BUFFER);
        let stats = UsageStatsRepository::new(db.clone());
        let writer_config = config.clone();

        let writer = thread::Builder::new()
            .name("usage-writer".into())
            .spawn(move || writer_loop(rx, stats, writer_config))
            .map_err(|e| StoreError::db(DatabaseCode::UsageCaptureFailed, e))?;

        Ok(Self {
            rates: CostRateManager::new(db.clone(), false),
            db,
            tx,
            writer: Some(writer),
            config,
        })
    }

    /// Captures usage for a job that just reached a terminal state.
    ///
    /// No-op unless the status is `completed` or `failed`. Returns the
    /// recomputed cost when it was written back onto the job.
    pub fn capture_job_usage(&self, job: &Job) -> Result<Option<f64>> {
        if !matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            return Ok(None);
        }

        let mut final_cost = job.total_cost;
        let mut written_back = None;
        let mut currency = job.currency.clone();

        if self.config.enable_cost_calculation
            && job.input_tokens > 0
            && job.output_tokens > 0
        {
            if let (Some(provider), Some(model)) = (&job.provider, &job.model) {
                if let Some(rate) = self.rates.get_current_cost_rate(provider, model)? {
                    let computed = calculate_cost(job.input_tokens, job.output_tokens, &rate);
                    currency = rate.currency.clone();
                    if cost_differs(computed, job.total_cost) {
                        self.write_cost_back(&job.id, computed, &currency)?;
                        written_back = Some(computed);
                    }
                    final_cost = computed;
                }
            }
        }

        let provider = job.provider.clone().unwrap_or_else(|| "unknown".into());
        let model = job.model.clone().unwrap_or_else(|| "unknown".into());
        let job_type = job.job_type.as_str().to_string();
        let date = job.created_at.date_naive();

        let stats = UsageStats {
            id: UsageStats::daily_id(date, &provider, &model, &job_type),
            date,
            provider,
            model,
            job_type,
            total_jobs: 1,
            total_input_tokens: job.input_tokens,
            total_output_tokens: job.output_tokens,
            total_cost: final_cost,
            average_duration_ms: job.duration_ms.unwrap_or(0) as f64,
            success_rate: if job.status == JobStatus::Completed {
                100.0
            } else {
                0.0
            },
            currency,
        };

        match self.tx.try_send(WriterCommand::Record(Box::new(stats))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(job_id = %job.id, "usage channel full, dropping capture");
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(StoreError::db(
                    DatabaseCode::UsageCaptureFailed,
                    "usage writer is gone",
                ));
            }
        }

        Ok(written_back)
    }

    /// Flushes pending captures and waits for the writer to drain.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        self.tx
            .send(WriterCommand::Flush(ack_tx))
            .map_err(|_| StoreError::db(DatabaseCode::UsageCaptureFailed, "usage writer is gone"))?;
        ack_rx
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| StoreError::db(DatabaseCode::UsageCaptureFailed, "flush timed out"))
    }

    /// Stops the writer thread, flushing what remains.
    pub fn close(&mut self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
    }

    fn write_cost_back(&self, job_id: &str, cost: f64, currency: &str) -> Result<()> {
        let now_str = format_datetime(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET total_cost = ?1, currency = ?2, updated_at = ?3 WHERE id = ?4",
                params![cost, currency, now_str, job_id],
            )
            .map_err(|e| StoreError::db(DatabaseCode::UsageCaptureFailed, e))?;
            Ok(())
        })
    }
}

impl Drop for UsageTracker {
    fn drop(&mut self) {
        self.close();
    }
}

/// The dedicated writer loop: batch until full or the timer fires.
fn writer_loop(
    rx: mpsc::Receiver<WriterCommand>,
    stats: UsageStatsRepository,
    config: UsageCaptureConfig,
) {
    let flush_interval = Duration::from_secs(config.rollup_interval_minutes.max(1) * 60);
    let mut batch: Vec<UsageStats> = Vec::with_capacity(config.batch_size);
    let mut last_flush = Instant::now();

    loop {
        let wait = flush_interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(wait) {
            Ok(WriterCommand::Record(row)) => {
                batch.push(*row);
                if batch.len() >= config.batch_size {
                    flush_batch(&stats, &mut batch);
                    last_flush = Instant::now();
                }
            }
            Ok(WriterCommand::Flush(ack)) => {
                flush_batch(&stats, &mut batch);
                last_flush = Instant::now();
                let _ = ack.send(());
            }
            Ok(WriterCommand::Shutdown) => {
                flush_batch(&stats, &mut batch);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() {
                    flush_batch(&stats, &mut batch);
                }
                last_flush = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush_batch(&stats, &mut batch);
                break;
            }
        }
    }
    info!("usage writer shut down");
}

fn flush_batch(stats: &UsageStatsRepository, batch: &mut Vec<UsageStats>) {
    if batch.is_empty() {
        return;
    }
    debug!(rows = batch.len(), "flushing usage captures");
    for row in batch.drain(..) {
        if let Err(e) = stats.upsert(&row) {
            warn!(id = %row.id, "usage upsert failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tally_core::enums::JobStatus;
    use tally_core::filter::UsageFilter;
    use tally_core::requests::{CreateJobRequest, UpdateJobRequest};
    use tally_storage::{JobRepository, MigrationEngine};

    struct Fixture {
        db: Arc<DatabaseManager>,
        jobs: JobRepository,
        tracker: UsageTracker,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(DatabaseManager::open_in_memory().unwrap());
        MigrationEngine::new(&db).initialize().unwrap();
        let jobs = JobRepository::new(db.clone(), true, false);
        let tracker = UsageTracker::new(db.clone(), UsageCaptureConfig::default()).unwrap();
        Fixture { db, jobs, tracker }
    }

    fn finished_job(f: &Fixture, status: JobStatus, input: i64, output: i64) -> Job {
        let job = f
            .jobs
            .create_job(CreateJobRequest {
                title: "t".into(),
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .unwrap();
        f.jobs
            .update_job(
                &job.id,
                UpdateJobRequest {
                    status: Some(status),
                    input_tokens: Some(input),
                    output_tokens: Some(output),
                    ..Default::default()
                },
            )
            .unwrap()
            .job
    }

    #[test]
    fn pending_jobs_are_ignored() {
        let f = fixture();
        let job = f
            .jobs
            .create_job(CreateJobRequest {
                title: "t".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(f.tracker.capture_job_usage(&job).unwrap(), None);
    }

    #[test]
    fn cost_computed_and_written_back() {
        let f = fixture();
        let job = finished_job(&f, JobStatus::Completed, 1000, 500);
        let written = f.tracker.capture_job_usage(&job).unwrap();
        assert!(written.is_some());
        assert!((written.unwrap() - 0.0075).abs() < 1e-12);

        let stored = f.jobs.get_job(&job.id).unwrap();
        assert!((stored.total_cost - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn capture_writes_usage_row_after_flush() {
        let f = fixture();
        let job = finished_job(&f, JobStatus::Completed, 1000, 500);
        f.tracker.capture_job_usage(&job).unwrap();
        f.tracker.flush().unwrap();

        let stats = UsageStatsRepository::new(f.db.clone());
        let rows = stats.get_usage_stats(&UsageFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_jobs, 1);
        assert_eq!(rows[0].success_rate, 100.0);
        assert_eq!(rows[0].provider, "openai");
        assert!((rows[0].total_cost - 0.0075).abs() < 1e-12);
    }

    #[test]
    fn failed_job_has_zero_success_rate() {
        let f = fixture();
        let job = finished_job(&f, JobStatus::Failed, 100, 10);
        f.tracker.capture_job_usage(&job).unwrap();
        f.tracker.flush().unwrap();

        let stats = UsageStatsRepository::new(f.db.clone());
        let rows = stats.get_usage_stats(&UsageFilter::default()).unwrap();
        assert_eq!(rows[0].success_rate, 0.0);
    }

    #[test]
    fn zero_output_tokens_skip_cost_calculation() {
        let f = fixture();
        let job = finished_job(&f, JobStatus::Completed, 1000, 0);
        let written = f.tracker.capture_job_usage(&job).unwrap();
        assert_eq!(written, None);
        let stored = f.jobs.get_job(&job.id).unwrap();
        assert_eq!(stored.total_cost, 0.0);
    }

    #[test]
    fn unknown_model_keeps_existing_cost() {
        let f = fixture();
        let job = f
            .jobs
            .create_job(CreateJobRequest {
                title: "t".into(),
                provider: Some("acme".into()),
                model: Some("mystery".into()),
                ..Default::default()
            })
            .unwrap();
        let updated = f
            .jobs
            .update_job(
                &job.id,
                UpdateJobRequest {
                    status: Some(JobStatus::Completed),
                    input_tokens: Some(10),
                    output_tokens: Some(10),
                    total_cost: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap()
            .job;
        assert_eq!(f.tracker.capture_job_usage(&updated).unwrap(), None);
        assert_eq!(f.jobs.get_job(&job.id).unwrap().total_cost, 0.5);
    }
}
