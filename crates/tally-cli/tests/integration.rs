//! End-to-end CLI tests for the `tally` binary.
//!
//! Each test runs in its own temp directory and drives the binary as a
//! subprocess via `assert_cmd`.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Build a `Command` targeting the cargo-built `tally` binary.
fn tally() -> Command {
    Command::cargo_bin("tally").unwrap()
}

/// Initialize a fresh store in a temp directory.
fn init_store() -> TempDir {
    let tmp = TempDir::new().unwrap();
    tally()
        .args(["init"])
        .current_dir(tmp.path())
        .assert()
        .success();
    tmp
}

#[test]
fn init_creates_config_and_database() {
    let tmp = init_store();
    assert!(tmp.path().join("tally.yaml").exists());
    assert!(tmp.path().join("tally-data").join("tally.db").exists());
    assert!(tmp.path().join("tally-data").join("artifacts").exists());
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let tmp = init_store();
    tally()
        .args(["init"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    tally()
        .args(["init", "--force"])
        .current_dir(tmp.path())
        .assert()
        .success();
}

#[test]
fn list_on_empty_store() {
    let tmp = init_store();
    tally()
        .args(["list"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("0 of 0 job(s)"));
}

#[test]
fn stats_json_has_job_and_artifact_sections() {
    let tmp = init_store();
    let output = tally()
        .args(["stats", "--json"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["jobs"]["total_jobs"], 0);
    assert_eq!(json["artifacts"]["total_artifacts"], 0);
}

#[test]
fn health_reports_healthy() {
    let tmp = init_store();
    tally()
        .args(["health"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("healthy"));
}

#[test]
fn export_json_contains_seeded_rates() {
    let tmp = init_store();
    let output = tally()
        .args(["export", "--format", "json"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["costRates"].as_array().unwrap().len() >= 10);
    assert!(json["jobs"].as_array().unwrap().is_empty());
}

#[test]
fn export_csv_has_table_sections() {
    let tmp = init_store();
    tally()
        .args(["export", "--format", "csv"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("=== JOBS ==="))
        .stdout(predicate::str::contains("=== COST_RATES ==="));
}

#[test]
fn verify_on_clean_store_passes() {
    let tmp = init_store();
    tally()
        .args(["verify"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("verified clean"));
}

#[test]
fn maintenance_vacuum_and_integrity() {
    let tmp = init_store();
    tally()
        .args(["maintenance", "vacuum"])
        .current_dir(tmp.path())
        .assert()
        .success();
    tally()
        .args(["maintenance", "integrity"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("integrity ok"));
}

#[test]
fn rollup_runs_on_empty_store() {
    let tmp = init_store();
    tally()
        .args(["rollup", "--json"])
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rows\":0"));
}
