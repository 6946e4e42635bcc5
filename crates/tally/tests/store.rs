//! End-to-end scenarios against the `Store` facade.
//!
//! Each test opens its own store in a temp directory (scheduler off, so
//! nothing fires mid-test) and drives the public API only.

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tally::{
    ArtifactType, CreateArtifactRequest, CreateCostRateRequest, CreateJobRequest, IntegrityProblem,
    JobFilter, JobSort, JobStatus, JobType, Store, StoreOptions, UpdateJobRequest,
};

fn open_store(dir: &TempDir) -> Store {
    let mut options = StoreOptions::at_dir(dir.path());
    options.enable_rollup_scheduler = false;
    let mut store = Store::new(options);
    store.initialize().unwrap();
    store
}

// ---------------------------------------------------------------------------
// Scenario 1: job lifecycle + cost
// ---------------------------------------------------------------------------

#[test]
fn job_lifecycle_with_cost_capture() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let job = store
        .create_job(CreateJobRequest {
            job_type: JobType::Chat,
            title: "t".into(),
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let running = store
        .update_job(&job.id, UpdateJobRequest::status(JobStatus::Running))
        .unwrap();
    assert!(running.started_at.is_some());
    assert!(running.completed_at.is_none());

    let completed = store
        .update_job(
            &job.id,
            UpdateJobRequest {
                status: Some(JobStatus::Completed),
                input_tokens: Some(1000),
                output_tokens: Some(500),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(completed.completed_at.is_some());
    // 1000/1000 * 0.0025 + 500/1000 * 0.01 against the seeded gpt-4o rate.
    assert!(
        (completed.total_cost - 0.0075).abs() < 1e-9,
        "expected 0.0075, got {}",
        completed.total_cost
    );

    let timeline = store.get_job_timeline(&job.id).unwrap();
    let names: Vec<&str> = timeline.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(names, vec!["created", "running", "completed"]);
}

// ---------------------------------------------------------------------------
// Scenario 2: artifact dedupe
// ---------------------------------------------------------------------------

#[test]
fn artifact_dedupe_across_jobs() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let job_a = store
        .create_job(CreateJobRequest {
            title: "a".into(),
            ..Default::default()
        })
        .unwrap();
    let job_b = store
        .create_job(CreateJobRequest {
            title: "b".into(),
            ..Default::default()
        })
        .unwrap();

    let first = store
        .create_artifact(CreateArtifactRequest {
            job_id: job_a.id,
            artifact_type: ArtifactType::File,
            name: "greeting-a".into(),
            data: b"hello".to_vec(),
            ..Default::default()
        })
        .unwrap();
    let second = store
        .create_artifact(CreateArtifactRequest {
            job_id: job_b.id,
            artifact_type: ArtifactType::File,
            name: "greeting-b".into(),
            data: b"hello".to_vec(),
            ..Default::default()
        })
        .unwrap();

    let expected = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
    assert_eq!(first.hash_sha256, expected);
    assert_eq!(second.hash_sha256, expected);
    assert_ne!(first.id, second.id);

    // One physical file behind two rows.
    let stats = store.get_artifact_stats().unwrap();
    assert_eq!(stats.total_artifacts, 2);
    assert_eq!(stats.unique_blobs, 1);

    let blob_path = dir
        .path()
        .join("artifacts")
        .join("2c")
        .join("f2")
        .join(expected);
    assert!(blob_path.exists());

    store.delete_artifact(&first.id, true).unwrap();
    assert!(blob_path.exists(), "shared file must survive first delete");

    store.delete_artifact(&second.id, true).unwrap();
    assert!(!blob_path.exists(), "last reference removes the file");
}

// ---------------------------------------------------------------------------
// Scenario 3: daily rollup
// ---------------------------------------------------------------------------

#[test]
fn daily_rollup_aggregates_finished_jobs() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for i in 0..12 {
        let job = store
            .create_job(CreateJobRequest {
                job_type: JobType::Chat,
                title: format!("job {i}"),
                provider: Some("openai".into()),
                model: Some("gpt-4o".into()),
                ..Default::default()
            })
            .unwrap();
        let status = if i < 10 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        store
            .update_job(
                &job.id,
                UpdateJobRequest {
                    status: Some(status),
                    input_tokens: Some(100),
                    output_tokens: Some(50),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    let today = chrono::Utc::now().date_naive();
    let written = store.trigger_daily_rollup(Some(today)).unwrap();
    assert_eq!(written, 1);

    let rows = store
        .get_usage_stats(&tally::UsageFilter::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(
        row.id,
        format!("{}_openai_gpt-4o_chat", today.format("%Y-%m-%d"))
    );
    assert_eq!(row.total_jobs, 12);
    assert!((row.success_rate - 10.0 / 12.0 * 100.0).abs() < 1e-6);

    // Idempotent: a second run yields the identical single row.
    store.trigger_daily_rollup(Some(today)).unwrap();
    let rows = store
        .get_usage_stats(&tally::UsageFilter::default())
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_jobs, 12);
}

// ---------------------------------------------------------------------------
// Scenario 4: cursor pagination
// ---------------------------------------------------------------------------

#[test]
fn cursor_pagination_visits_each_job_once() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    for i in 0..150 {
        store
            .create_job(CreateJobRequest {
                id: Some(format!("job-{i:04}")),
                title: format!("job {i}"),
                ..Default::default()
            })
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = store
            .query_jobs(
                &JobFilter::default(),
                JobSort::default(),
                Some(50),
                cursor.as_deref(),
            )
            .unwrap();
        pages += 1;
        assert_eq!(page.total, 150);
        seen.extend(page.items.iter().map(|j| j.id.clone()));
        if !page.has_more {
            assert!(page.next_cursor.is_none());
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 150);
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 150, "every job exactly once");
}

#[test]
fn invalid_cursor_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let err = store
        .query_jobs(
            &JobFilter::default(),
            JobSort::default(),
            Some(10),
            Some("definitely-not-a-cursor"),
        )
        .unwrap_err();
    assert_eq!(err.code_str(), "INVALID_CURSOR");
}

// ---------------------------------------------------------------------------
// Scenario 5: effective cost rate windows
// ---------------------------------------------------------------------------

#[test]
fn effective_rate_resolves_by_date_window() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    store
        .create_cost_rate(CreateCostRateRequest {
            provider: "examplecorp".into(),
            model: "ex-1".into(),
            input_token_rate: 0.003,
            output_token_rate: 0.015,
            currency: None,
            effective_from: "2024-01-01".parse().unwrap(),
            effective_to: Some("2024-06-30".parse().unwrap()),
        })
        .unwrap();
    store
        .create_cost_rate(CreateCostRateRequest {
            provider: "examplecorp".into(),
            model: "ex-1".into(),
            input_token_rate: 0.002,
            output_token_rate: 0.01,
            currency: None,
            effective_from: "2024-07-01".parse().unwrap(),
            effective_to: None,
        })
        .unwrap();

    let spring = store
        .get_cost_rate_on("examplecorp", "ex-1", "2024-05-15".parse().unwrap())
        .unwrap()
        .expect("rate A covers May");
    assert_eq!(spring.input_token_rate, 0.003);

    let summer = store
        .get_cost_rate_on("examplecorp", "ex-1", "2024-08-15".parse().unwrap())
        .unwrap()
        .expect("rate B covers August");
    assert_eq!(summer.input_token_rate, 0.002);
}

// ---------------------------------------------------------------------------
// Scenario 6: integrity verification
// ---------------------------------------------------------------------------

#[test]
fn integrity_check_reports_tampered_file() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let job = store
        .create_job(CreateJobRequest {
            title: "t".into(),
            ..Default::default()
        })
        .unwrap();
    let keep = store
        .create_artifact(CreateArtifactRequest {
            job_id: job.id.clone(),
            artifact_type: ArtifactType::Result,
            name: "keep".into(),
            data: b"pristine bytes".to_vec(),
            ..Default::default()
        })
        .unwrap();
    let tampered = store
        .create_artifact(CreateArtifactRequest {
            job_id: job.id,
            artifact_type: ArtifactType::Result,
            name: "tampered".into(),
            data: b"original bytes".to_vec(),
            ..Default::default()
        })
        .unwrap();

    // Flip the bytes on disk behind the store's back.
    let path = dir
        .path()
        .join("artifacts")
        .join(&tampered.hash_sha256[0..2])
        .join(&tampered.hash_sha256[2..4])
        .join(&tampered.hash_sha256);
    std::fs::write(&path, b"mutated bytes!").unwrap();

    let issues = store.verify_artifact_integrity().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].artifact_id, tampered.id);
    assert_eq!(issues[0].issue, IntegrityProblem::HashMismatch);

    // The row stays non-deleted and its metadata is still readable.
    let row = store.get_artifact(&tampered.id).unwrap();
    assert!(!row.is_deleted);
    assert_eq!(row.name, "tampered");

    // The untouched artifact still reads clean.
    assert_eq!(
        store.get_artifact_data(&keep.id).unwrap(),
        b"pristine bytes"
    );
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[test]
fn export_covers_every_table() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let job = store
        .create_job(CreateJobRequest {
            title: "export me".into(),
            provider: Some("openai".into()),
            model: Some("gpt-4o".into()),
            ..Default::default()
        })
        .unwrap();
    store
        .create_artifact(CreateArtifactRequest {
            job_id: job.id.clone(),
            artifact_type: ArtifactType::Log,
            name: "run.log".into(),
            data: b"log line\n".to_vec(),
            ..Default::default()
        })
        .unwrap();

    let json = store.export_data(tally::ExportFormat::Json).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(doc["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(doc["artifacts"].as_array().unwrap().len(), 1);
    assert_eq!(doc["events"].as_array().unwrap().len(), 1);
    assert!(doc["costRates"].as_array().unwrap().len() >= 10);
    assert!(doc["usageStats"].is_array());

    let csv = store.export_data(tally::ExportFormat::Csv).unwrap();
    for section in [
        "=== JOBS ===",
        "=== ARTIFACTS ===",
        "=== EVENTS ===",
        "=== USAGE_STATS ===",
        "=== COST_RATES ===",
    ] {
        assert!(csv.contains(section), "missing section {section}");
    }
    assert!(csv.contains("export me"));
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[test]
fn health_check_reports_components() {
    let dir = TempDir::new().unwrap();
    let mut options = StoreOptions::at_dir(dir.path());
    options.enable_rollup_scheduler = true;
    let mut store = Store::new(options);
    store.initialize().unwrap();

    let report = store.health_check().unwrap();
    assert!(report.healthy);
    assert!(report.database_connected);
    assert!(report.database_writable);
    assert!(report.database_integrity_ok);
    assert!(report.storage.as_ref().unwrap().reachable);
    assert_eq!(report.scheduler_running, Some(true));

    store.close().unwrap();
}
