//! `streamkeeper watch`: register and manage watchers.
//!
//! Changes land in the shared database; a running `serve` picks them up on
//! its next reconcile pass.

use anyhow::Result;
use clap::Subcommand;
use comfy_table::Cell;
use streamkeeper_protocol::{CaptureOptions, WatcherKey, WatcherRequest};
use streamkeeper_sentinel::EngineMode;

use super::context::Context;
use super::output::{format_timestamp, print_json, print_table};

#[derive(Subcommand, Debug, Clone)]
pub enum WatchAction {
    /// Start watching a target
    Add {
        #[arg(long, conflicts_with = "url")]
        room_id: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// Seconds between live checks
        #[arg(short, long)]
        interval: Option<u64>,

        #[arg(long)]
        proxy: Option<String>,

        #[arg(long)]
        cookies: Option<String>,

        /// Upload captures to the configured sink
        #[arg(long)]
        upload: bool,
    },
    /// Stop watching a target and cancel its queued capture
    Rm {
        /// Room id or URL
        key: String,
    },
    /// Stop polling but keep the registration
    Pause {
        key: String,
    },
    /// Resume polling a paused watcher
    Resume {
        key: String,
    },
    /// List watchers
    Ls {
        /// Include deleted watchers
        #[arg(long)]
        all: bool,
    },
}

pub async fn run(ctx: &Context, action: WatchAction) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let result: Result<()> = async {
        match action {
            WatchAction::Add {
                room_id,
                url,
                interval,
                proxy,
                cookies,
                upload,
            } => {
                let request = WatcherRequest {
                    room_id,
                    url,
                    poll_interval: interval,
                    options: CaptureOptions {
                        proxy,
                        cookies,
                        upload,
                    },
                };
                let watcher = engine.register_watcher(&request).await?;
                if ctx.json {
                    print_json(&watcher)?;
                } else {
                    println!("Watching {} ({})", watcher.key, watcher.status);
                }
            }
            WatchAction::Rm { key } => {
                engine.delete_watcher(&WatcherKey::new(key.trim())).await?;
                if !ctx.json {
                    println!("Deleted watcher {}", key.trim());
                }
            }
            WatchAction::Pause { key } => {
                let watcher = engine.pause_watcher(&WatcherKey::new(key.trim())).await?;
                if ctx.json {
                    print_json(&watcher)?;
                } else {
                    println!("{} is {}", watcher.key, watcher.status);
                }
            }
            WatchAction::Resume { key } => {
                let watcher = engine.resume_watcher(&WatcherKey::new(key.trim())).await?;
                if ctx.json {
                    print_json(&watcher)?;
                } else {
                    println!("{} is {}", watcher.key, watcher.status);
                }
            }
            WatchAction::Ls { all } => {
                let watchers = engine.list_watchers(all).await?;
                if ctx.json {
                    print_json(&watchers)?;
                } else if watchers.is_empty() {
                    println!("No watchers.");
                } else {
                    let rows = watchers
                        .iter()
                        .map(|w| {
                            vec![
                                Cell::new(w.key.as_str()),
                                Cell::new(w.status),
                                Cell::new(format!("{}s", w.poll_interval_secs)),
                                Cell::new(format_timestamp(Some(w.created_at))),
                                Cell::new(format_timestamp(w.last_run_at)),
                            ]
                        })
                        .collect();
                    print_table(&["KEY", "STATUS", "INTERVAL", "CREATED", "LAST RUN"], rows);
                }
            }
        }
        Ok(())
    }
    .await;

    engine.shutdown().await;
    result
}
