//! `tally list` / `show` / `search`.

use anyhow::Result;
use owo_colors::OwoColorize;

use tally::{Job, JobFilter, JobSort};

use crate::cli::{ListArgs, SearchArgs, ShowArgs};
use crate::context::RuntimeContext;

pub fn run_list(ctx: &RuntimeContext, args: &ListArgs) -> Result<()> {
    let store = ctx.open_store()?;

    let filter = JobFilter {
        status: args.status.as_deref().map(Into::into),
        job_type: args.job_type.as_deref().map(Into::into),
        provider: args.provider.clone(),
        ..Default::default()
    };
    let page = store.query_jobs(
        &filter,
        JobSort::default(),
        Some(args.limit),
        args.cursor.as_deref(),
    )?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    for job in &page.items {
        print_job_line(job);
    }
    println!(
        "{} of {} job(s){}",
        page.items.len(),
        page.total,
        match &page.next_cursor {
            Some(cursor) => format!("\nnext page: --cursor {cursor}"),
            None => String::new(),
        }
    );
    Ok(())
}

pub fn run_show(ctx: &RuntimeContext, args: &ShowArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let job = store.get_job(&args.id)?;
    let timeline = store.get_job_timeline(&args.id)?;
    let artifacts = store.get_artifacts_by_job(&args.id)?;

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job": job,
                "timeline": timeline,
                "artifacts": artifacts,
            }))?
        );
        return Ok(());
    }

    println!("{} {}", job.id.bold(), status_colored(&job));
    println!("  {}", job.title);
    if let (Some(provider), Some(model)) = (&job.provider, &job.model) {
        println!("  {provider}/{model}");
    }
    println!(
        "  tokens: {} in / {} out, cost: {} {}",
        job.input_tokens, job.output_tokens, job.total_cost, job.currency
    );
    if let Some(err) = &job.error_message {
        println!("  {} {err}", "error:".red());
    }

    if !timeline.is_empty() {
        println!("timeline:");
        for entry in &timeline {
            println!(
                "  {}  {}{}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.event,
                entry
                    .message
                    .as_deref()
                    .map(|m| format!(" - {m}"))
                    .unwrap_or_default()
            );
        }
    }

    if !artifacts.is_empty() {
        println!("artifacts:");
        for artifact in &artifacts {
            println!(
                "  {}  {} ({} bytes, {})",
                artifact.id,
                artifact.name,
                artifact.file_size,
                artifact.artifact_type
            );
        }
    }
    Ok(())
}

pub fn run_search(ctx: &RuntimeContext, args: &SearchArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let jobs = store.search_jobs(&args.query, &JobFilter::default(), Some(args.limit))?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    for job in &jobs {
        print_job_line(job);
    }
    println!("{} match(es)", jobs.len());
    Ok(())
}

fn print_job_line(job: &Job) {
    println!(
        "{}  {}  [{}] {}",
        job.created_at.format("%Y-%m-%d %H:%M"),
        job.id,
        status_colored(job),
        job.title
    );
}

fn status_colored(job: &Job) -> String {
    use tally::JobStatus;
    let s = job.status.as_str();
    match job.status {
        JobStatus::Completed => s.green().to_string(),
        JobStatus::Failed => s.red().to_string(),
        JobStatus::Running => s.yellow().to_string(),
        _ => s.to_string(),
    }
}
