//! Whole-store export as JSON or sectioned CSV.

use serde_json::json;

use tally_core::enums::{JobSortField, SortDirection};
use tally_core::filter::{ArtifactFilter, EventFilter, JobFilter, JobSort, UsageFilter};
use tally_core::job::Job;
use tally_storage::Result;

use crate::store::Inner;

/// Supported export encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

pub(crate) fn export(inner: &Inner, format: ExportFormat) -> Result<String> {
    let jobs = all_jobs(inner)?;
    let artifacts = all_artifacts(inner)?;
    let events = all_events(inner)?;
    let usage_stats = inner.stats_rows.get_usage_stats(&UsageFilter {
        include_weekly: true,
        ..Default::default()
    })?;
    let cost_rates = inner.rates.get_cost_rates(&Default::default())?;

    match format {
        ExportFormat::Json => {
            let doc = json!({
                "jobs": jobs,
                "artifacts": artifacts,
                "events": events,
                "usageStats": usage_stats,
                "costRates": cost_rates,
            });
            serde_json::to_string_pretty(&doc).map_err(|e| {
                tally_storage::StoreError::db(tally_storage::DatabaseCode::QueryFailed, e)
            })
        }
        ExportFormat::Csv => {
            let mut out = String::new();

            out.push_str("=== JOBS ===\n");
            out.push_str("id,type,status,title,provider,model,input_tokens,output_tokens,total_cost,currency,duration_ms,created_at,completed_at\n");
            for job in &jobs {
                out.push_str(&csv_row(&[
                    &job.id,
                    job.job_type.as_str(),
                    job.status.as_str(),
                    &job.title,
                    job.provider.as_deref().unwrap_or(""),
                    job.model.as_deref().unwrap_or(""),
                    &job.input_tokens.to_string(),
                    &job.output_tokens.to_string(),
                    &job.total_cost.to_string(),
                    &job.currency,
                    &job.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
                    &job.created_at.to_rfc3339(),
                    &job
                        .completed_at
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_default(),
                ]));
            }

            out.push_str("=== ARTIFACTS ===\n");
            out.push_str("id,job_id,type,name,file_path,file_size,mime_type,hash_sha256,is_deleted,created_at\n");
            for a in &artifacts {
                out.push_str(&csv_row(&[
                    &a.id,
                    &a.job_id,
                    a.artifact_type.as_str(),
                    &a.name,
                    &a.file_path,
                    &a.file_size.to_string(),
                    a.mime_type.as_deref().unwrap_or(""),
                    &a.hash_sha256,
                    if a.is_deleted { "1" } else { "0" },
                    &a.created_at.to_rfc3339(),
                ]));
            }

            out.push_str("=== EVENTS ===\n");
            out.push_str("id,job_id,event_type,message,level,created_at\n");
            for e in &events {
                out.push_str(&csv_row(&[
                    &e.id,
                    &e.job_id,
                    e.event_type.as_str(),
                    e.message.as_deref().unwrap_or(""),
                    e.level.as_str(),
                    &e.created_at.to_rfc3339(),
                ]));
            }

            out.push_str("=== USAGE_STATS ===\n");
            out.push_str("id,date,provider,model,job_type,total_jobs,total_input_tokens,total_output_tokens,total_cost,average_duration_ms,success_rate,currency\n");
            for s in &usage_stats {
                out.push_str(&csv_row(&[
                    &s.id,
                    &s.date.to_string(),
                    &s.provider,
                    &s.model,
                    &s.job_type,
                    &s.total_jobs.to_string(),
                    &s.total_input_tokens.to_string(),
                    &s.total_output_tokens.to_string(),
                    &s.total_cost.to_string(),
                    &s.average_duration_ms.to_string(),
                    &s.success_rate.to_string(),
                    &s.currency,
                ]));
            }

            out.push_str("=== COST_RATES ===\n");
            out.push_str("id,provider,model,input_token_rate,output_token_rate,currency,effective_from,effective_to\n");
            for r in &cost_rates {
                out.push_str(&csv_row(&[
                    &r.id,
                    &r.provider,
                    &r.model,
                    &r.input_token_rate.to_string(),
                    &r.output_token_rate.to_string(),
                    &r.currency,
                    &r.effective_from.to_string(),
                    &r.effective_to.map(|d| d.to_string()).unwrap_or_default(),
                ]));
            }

            Ok(out)
        }
    }
}

/// Drains every page of the jobs table in a stable order.
fn all_jobs(inner: &Inner) -> Result<Vec<Job>> {
    let sort = JobSort {
        field: JobSortField::CreatedAt,
        direction: SortDirection::Asc,
    };
    let mut jobs = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = inner
            .jobs
            .query_jobs(&JobFilter::default(), sort, Some(1000), cursor.as_deref())?;
        jobs.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(jobs)
}

fn all_artifacts(inner: &Inner) -> Result<Vec<tally_core::artifact::JobArtifact>> {
    let filter = ArtifactFilter {
        include_deleted: true,
        ..Default::default()
    };
    let mut artifacts = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = inner
            .artifacts
            .query_artifacts(&filter, Some(1000), cursor.as_deref())?;
        artifacts.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(artifacts)
}

fn all_events(inner: &Inner) -> Result<Vec<tally_core::event::JobEvent>> {
    let mut events = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = inner
            .events
            .query_events(&EventFilter::default(), Some(1000), cursor.as_deref())?;
        events.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(events)
}

/// Escapes one CSV field per RFC 4180.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn csv_row(fields: &[&str]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}
