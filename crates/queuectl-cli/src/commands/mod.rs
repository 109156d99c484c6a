//! CLI command implementations.
//!
//! Each command returns the text to print, so the same functions serve the
//! one-shot subcommands, the interactive shell and scripts.

pub mod line;
pub mod script;
pub mod shell;

use crate::app::App;
use anyhow::Result;
use queuectl_core::{Job, JobState};
use serde::Deserialize;
use std::fmt::Write;

/// Longest `last_error` shown in `dlq list` before it is cut off.
const DLQ_ERROR_WIDTH: usize = 80;

/// Fields accepted by `enqueue`. Anything else in the JSON is ignored.
#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    priority: i32,
    max_retries: Option<u32>,
}

pub async fn enqueue(app: &App, json: &str) -> Result<String> {
    let request: EnqueueRequest = match serde_json::from_str(json) {
        Ok(request) => request,
        Err(e) => return Ok(format!("Invalid JSON: {}", e)),
    };
    if request.id.trim().is_empty() {
        return Ok("id is required".to_string());
    }
    if request.command.trim().is_empty() {
        return Ok("command is required".to_string());
    }

    let mut job = Job::new(request.id, request.command).with_priority(request.priority);
    if let Some(max_retries) = request.max_retries {
        job = job.with_max_retries(max_retries);
    }
    let job = app.queue.enqueue(job).await?;
    Ok(format!("Enqueued {}", job.id))
}

pub async fn list(app: &App, state: Option<&str>) -> Result<String> {
    let jobs = app.queue.list_including_dlq(state).await?;
    Ok(format_jobs(&jobs))
}

pub async fn status(app: &App) -> Result<String> {
    let counts = app.queue.counts().await?;
    let dlq = app.queue.dlq_count().await?;

    let mut out = String::new();
    for state in JobState::ALL {
        let n = counts.get(&state).copied().unwrap_or(0);
        if state == JobState::Dead {
            writeln!(out, "{:<11} : {} (DLQ={})", "dead", n + dlq, dlq)?;
        } else {
            writeln!(out, "{:<11} : {}", state.as_str(), n)?;
        }
    }

    // Only workers of this process are visible.
    let workers = app.pool.worker_ids().await;
    if workers.is_empty() {
        writeln!(out, "{:<11} : stopped", "workers")?;
    } else {
        writeln!(out, "{:<11} : {} running", "workers", workers.len())?;
    }
    Ok(out)
}

pub async fn dlq_list(app: &App) -> Result<String> {
    let jobs = app.queue.list_dlq().await?;
    Ok(format_dlq(&jobs))
}

pub async fn dlq_retry(app: &App, id: &str) -> Result<String> {
    if app.queue.dlq_retry(id).await? {
        Ok(format!("Requeued {}", id))
    } else {
        Ok(format!("No DLQ job with id {}", id))
    }
}

pub async fn config_get(app: &App, key: &str) -> Result<String> {
    Ok(match app.queue.config_get(key).await? {
        Some(value) => format!("{} = {}", key, value),
        None => "(not set)".to_string(),
    })
}

pub async fn config_set(app: &App, key: &str, value: &str) -> Result<String> {
    let value = app.queue.config_set(key, value).await?;
    Ok(format!("Updated {} = {}", key, value))
}

pub async fn worker_start(app: &App, count: usize) -> Result<String> {
    Ok(app.pool.start(count).await?)
}

pub async fn worker_stop(app: &App) -> Result<String> {
    Ok(app.pool.stop().await?)
}

fn format_jobs(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "(no jobs)".to_string();
    }

    let mut out = format!(
        "{:<16} {:<11} {:<8} {:<8} {:<22} {}\n",
        "id", "state", "attempts", "max", "run_at", "command"
    );
    for job in jobs {
        let run_at = job
            .run_at
            .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<16} {:<11} {:<8} {:<8} {:<22} {}\n",
            job.id,
            job.state.as_str(),
            job.attempts,
            job.max_retries,
            run_at,
            job.command
        ));
    }
    out
}

fn format_dlq(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "(DLQ empty)".to_string();
    }

    let mut out = format!(
        "{:<16} {:<8} {:<8} {:<22} {}\n",
        "id", "attempts", "max", "failed_at", "last_error"
    );
    for job in jobs {
        let error = job.last_error.as_deref().map(truncate_error).unwrap_or_default();
        out.push_str(&format!(
            "{:<16} {:<8} {:<8} {:<22} {}\n",
            job.id,
            job.attempts,
            job.max_retries,
            job.updated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            error
        ));
    }
    out
}

/// First line-joined [`DLQ_ERROR_WIDTH`] characters, with `…` if cut.
fn truncate_error(error: &str) -> String {
    let flat = error.replace('\n', " ");
    if flat.chars().count() <= DLQ_ERROR_WIDTH {
        return flat;
    }
    let mut cut: String = flat.chars().take(DLQ_ERROR_WIDTH).collect();
    cut.push('…');
    cut
}
