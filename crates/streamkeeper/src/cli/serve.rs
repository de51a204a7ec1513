//! `streamkeeper serve`

use anyhow::Result;
use streamkeeper_sentinel::EngineMode;
use tracing::info;

use super::context::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Serve).await?;
    info!(
        database = %ctx.config.database_path.display(),
        "Serving; press Ctrl-C to stop"
    );

    wait_for_signal().await;
    info!("Received shutdown signal");
    engine.shutdown().await;

    let metrics = engine.metrics();
    info!(
        submitted = metrics.jobs_submitted,
        succeeded = metrics.jobs_succeeded,
        failed = metrics.jobs_failed,
        revoked = metrics.jobs_revoked,
        polls = metrics.polls,
        "Session totals"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
