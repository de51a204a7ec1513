//! `streamkeeper record`: one capture, run in this process.

use std::time::Duration;

use anyhow::{bail, Result};
use streamkeeper_protocol::{CaptureOptions, CaptureRequest, Job, JobId, JobStatus};
use streamkeeper_sentinel::{Engine, EngineMode};
use tracing::{info, warn};

use super::context::Context;
use super::output::{print_job_detail, print_json};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub fn build_request(
    room_id: Option<String>,
    url: Option<String>,
    duration: Option<u64>,
    proxy: Option<String>,
    cookies: Option<String>,
    output_template: Option<String>,
    upload: bool,
) -> CaptureRequest {
    CaptureRequest {
        room_id,
        url,
        duration,
        output_template,
        options: CaptureOptions {
            proxy,
            cookies,
            upload,
        },
    }
}

pub async fn run(ctx: &Context, request: CaptureRequest) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let result = capture(ctx, &engine, &request).await;
    engine.shutdown().await;

    let job = result?;
    if ctx.json {
        print_json(&job)?;
    } else {
        print_job_detail(&job);
    }
    if job.status != JobStatus::Success {
        bail!("Capture ended {}", job.status);
    }
    Ok(())
}

async fn capture(ctx: &Context, engine: &Engine, request: &CaptureRequest) -> Result<Job> {
    let job = engine.submit_recording(request).await?;
    if !ctx.json {
        eprintln!("Submitted job {}", job.job_id);
    }

    tokio::select! {
        done = wait_terminal(engine, &job.job_id) => done,
        _ = tokio::signal::ctrl_c() => {
            info!(job_id = %job.job_id, "Interrupted, revoking capture");
            if let Err(e) = engine.revoke_job(&job.job_id).await {
                warn!(job_id = %job.job_id, "Revoke failed: {}", e);
            }
            wait_terminal(engine, &job.job_id).await
        }
    }
}

async fn wait_terminal(engine: &Engine, job_id: &JobId) -> Result<Job> {
    loop {
        let job = engine.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
