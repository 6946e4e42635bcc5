//! `tally stats` / `health`.

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::context::RuntimeContext;

pub fn run_stats(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let jobs = store.get_job_stats()?;
    let artifacts = store.get_artifact_stats()?;

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "jobs": jobs,
                "artifacts": artifacts,
            }))?
        );
        return Ok(());
    }

    println!("{}", "jobs".bold());
    println!("  total: {}", jobs.total_jobs);
    for (status, count) in sorted(&jobs.by_status) {
        println!("  {status}: {count}");
    }
    println!(
        "  tokens: {} in / {} out",
        jobs.total_input_tokens, jobs.total_output_tokens
    );
    println!("  total cost: {:.4}", jobs.total_cost);

    println!("{}", "artifacts".bold());
    println!(
        "  {} live ({} bytes), {} unique blob(s), {} soft-deleted",
        artifacts.total_artifacts,
        artifacts.total_size_bytes,
        artifacts.unique_blobs,
        artifacts.deleted_count
    );
    Ok(())
}

pub fn run_health(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let report = store.health_check()?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let verdict = if report.healthy {
        "healthy".green().to_string()
    } else {
        "unhealthy".red().to_string()
    };
    println!("store is {verdict}");
    println!(
        "  database: connected={} writable={} integrity_ok={}",
        report.database_connected, report.database_writable, report.database_integrity_ok
    );
    if let Some(storage) = &report.storage {
        println!(
            "  storage: reachable={} ({} file(s), {} bytes)",
            storage.reachable, storage.file_count, storage.total_bytes
        );
    }
    Ok(())
}

fn sorted(map: &std::collections::HashMap<String, i64>) -> Vec<(&String, &i64)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by_key(|(k, _)| k.as_str());
    entries
}
