//! Job commands: show, list, revoke, stats.

use anyhow::{Context as _, Result};
use serde::Serialize;
use streamkeeper_protocol::{JobId, QueueStats};
use streamkeeper_sentinel::EngineMode;

use super::context::Context;
use super::output::{job_row, print_job_detail, print_json, print_table, JOB_HEADERS};

fn parse_job_id(id: &str) -> Result<JobId> {
    JobId::parse(id).with_context(|| format!("'{}' is not a job id", id))
}

pub async fn show(ctx: &Context, id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let job = engine.get_job(&job_id).await;
    engine.shutdown().await;
    let job = job?;

    if ctx.json {
        print_json(&job)
    } else {
        print_job_detail(&job);
        Ok(())
    }
}

pub async fn list(ctx: &Context, limit: u32) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let jobs = engine.list_recent_jobs(limit).await;
    engine.shutdown().await;
    let jobs = jobs?;

    if ctx.json {
        return print_json(&jobs);
    }
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    print_table(&JOB_HEADERS, jobs.iter().map(job_row).collect());
    Ok(())
}

/// Queued jobs are revoked in the store; a capture already running belongs
/// to the serving process and is reported as a conflict.
pub async fn revoke(ctx: &Context, id: &str) -> Result<()> {
    let job_id = parse_job_id(id)?;
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let result = engine.revoke_job(&job_id).await;
    let job = engine.get_job(&job_id).await;
    engine.shutdown().await;
    result?;
    let job = job?;

    if ctx.json {
        print_json(&job)
    } else {
        println!("Job {} is {}", job.job_id, job.status);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatsReport {
    queue: QueueStats,
    outstanding: u64,
}

pub async fn stats(ctx: &Context) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let queue = engine.queue_stats().await;
    engine.shutdown().await;
    let queue = queue?;

    if ctx.json {
        return print_json(&StatsReport {
            outstanding: queue.outstanding(),
            queue,
        });
    }
    println!("Pending:  {}", queue.pending);
    println!("Started:  {}", queue.started);
    println!("Retry:    {}", queue.retry);
    println!("Success:  {}", queue.success);
    println!("Failure:  {}", queue.failure);
    println!("Revoked:  {}", queue.revoked);
    Ok(())
}
