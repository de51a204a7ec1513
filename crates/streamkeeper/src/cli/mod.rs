//! CLI commands.

pub mod context;
pub mod files;
pub mod job;
pub mod output;
pub mod record;
pub mod serve;
pub mod watch;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use self::context::Context;
use self::watch::WatchAction;

#[derive(Parser, Debug)]
#[command(name = "streamkeeper", about = "Capture live streams on demand or when they go live", version)]
pub struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to ~/.streamkeeper/config.toml)
    #[arg(long, global = true, env = "STREAMKEEPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the recordings directory
    #[arg(long, global = true)]
    pub recordings_dir: Option<PathBuf>,

    /// Override the state database path
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine: recover, poll watchers and run captures until Ctrl-C
    Serve,

    /// Capture one stream now and wait for the result
    Record {
        /// Numeric room id
        #[arg(long, conflicts_with = "url")]
        room_id: Option<String>,

        /// Live page URL
        #[arg(long)]
        url: Option<String>,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Proxy URL (http, https or socks5)
        #[arg(long)]
        proxy: Option<String>,

        /// Cookie file, relative to the cookies directory
        #[arg(long)]
        cookies: Option<String>,

        /// File name template handed to the recorder
        #[arg(long)]
        output_template: Option<String>,

        /// Upload produced files to the configured sink
        #[arg(long)]
        upload: bool,
    },

    /// Show one job
    Job {
        /// Job id
        id: String,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Cancel a queued job
    Revoke {
        /// Job id
        id: String,
    },

    /// Manage watchers
    Watch {
        #[command(subcommand)]
        action: WatchAction,
    },

    /// List recorded files, newest first
    Files {
        /// Only files for this room id
        #[arg(long)]
        room_id: Option<String>,

        /// Only files for this live page URL
        #[arg(long)]
        url: Option<String>,

        /// Modified at or after (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Modified at or before (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Show job counts per status
    Stats,
}

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli)?;

    match cli.command {
        Commands::Serve => serve::run(&ctx).await,
        Commands::Record {
            room_id,
            url,
            duration,
            proxy,
            cookies,
            output_template,
            upload,
        } => {
            let request = record::build_request(
                room_id,
                url,
                duration,
                proxy,
                cookies,
                output_template,
                upload,
            );
            record::run(&ctx, request).await
        }
        Commands::Job { id } => job::show(&ctx, &id).await,
        Commands::Jobs { limit } => job::list(&ctx, limit).await,
        Commands::Revoke { id } => job::revoke(&ctx, &id).await,
        Commands::Watch { action } => watch::run(&ctx, action).await,
        Commands::Files {
            room_id,
            url,
            from,
            to,
            page,
            page_size,
        } => {
            let query = streamkeeper_protocol::FileQuery {
                room_id,
                url,
                from,
                to,
                page,
                page_size,
            };
            files::run(&ctx, &query).await
        }
        Commands::Stats => job::stats(&ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_rejects_both_targets_at_parse_time() {
        let err = Cli::try_parse_from([
            "streamkeeper",
            "record",
            "--room-id",
            "1",
            "--url",
            "https://www.tiktok.com/@x/live",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "streamkeeper",
            "files",
            "--room-id",
            "42",
            "--json",
            "--database",
            "/tmp/s.sqlite3",
            "--from",
            "2024-01-01T00:00:00Z",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/s.sqlite3")));
        match cli.command {
            Commands::Files { room_id, from, page, .. } => {
                assert_eq!(room_id.as_deref(), Some("42"));
                assert!(from.is_some());
                assert_eq!(page, 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn watch_add_takes_an_interval() {
        let cli = Cli::try_parse_from([
            "streamkeeper",
            "watch",
            "add",
            "--room-id",
            "7",
            "--interval",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                action: WatchAction::Add { room_id, interval, .. },
            } => {
                assert_eq!(room_id.as_deref(), Some("7"));
                assert_eq!(interval, Some(30));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
