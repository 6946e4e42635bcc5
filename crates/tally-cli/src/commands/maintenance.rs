//! `tally export` / `verify` / `rollup` / `maintenance`.

use anyhow::{Context as _, Result, bail};
use chrono::NaiveDate;

use tally::ExportFormat;

use crate::cli::{ExportArgs, MaintenanceArgs, RollupArgs};
use crate::context::RuntimeContext;

pub fn run_export(ctx: &RuntimeContext, args: &ExportArgs) -> Result<()> {
    let format: ExportFormat = args
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let store = ctx.open_store()?;
    let data = store.export_data(format)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, data).with_context(|| format!("writing {path}"))?;
            if !ctx.json {
                println!("exported to {path}");
            }
        }
        None => println!("{data}"),
    }
    Ok(())
}

pub fn run_verify(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let issues = store.verify_artifact_integrity()?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
        return Ok(());
    }
    if issues.is_empty() {
        println!("all artifacts verified clean");
    } else {
        for issue in &issues {
            println!("{}  {}", issue.artifact_id, issue.issue.as_str());
        }
        bail!("{} artifact(s) failed verification", issues.len());
    }
    Ok(())
}

pub fn run_rollup(ctx: &RuntimeContext, args: &RollupArgs) -> Result<()> {
    let store = ctx.open_store()?;

    let written = if args.weekly {
        let week_start = parse_date_arg(args.week_start.as_deref())?;
        store.trigger_weekly_rollup(week_start)?
    } else {
        let date = parse_date_arg(args.date.as_deref())?;
        store.trigger_daily_rollup(date)?
    };

    if ctx.json {
        println!("{}", serde_json::json!({ "rows": written }));
    } else {
        println!("rollup wrote {written} row(s)");
    }
    Ok(())
}

pub fn run(ctx: &RuntimeContext, args: &MaintenanceArgs) -> Result<()> {
    let store = ctx.open_store()?;
    match args {
        MaintenanceArgs::Vacuum => {
            store.vacuum()?;
            println!("vacuum complete");
        }
        MaintenanceArgs::Analyze => {
            store.analyze()?;
            println!("analyze complete");
        }
        MaintenanceArgs::Integrity => {
            let problems = store.integrity_check()?;
            if problems.is_empty() {
                println!("integrity ok");
            } else {
                for problem in &problems {
                    println!("{problem}");
                }
                bail!("integrity check reported {} problem(s)", problems.len());
            }
        }
        MaintenanceArgs::Backup { dest } => {
            store.backup(dest)?;
            println!("backed up to {dest}");
        }
    }
    Ok(())
}

fn parse_date_arg(arg: Option<&str>) -> Result<Option<NaiveDate>> {
    arg.map(|s| {
        s.parse()
            .with_context(|| format!("invalid date '{s}' (expected YYYY-MM-DD)"))
    })
    .transpose()
}
