//! streamkeeper: capture live streams on demand or when they go live.

use std::process::ExitCode;

use clap::Parser;
use streamkeeper::cli::{self, Cli, Commands};
use streamkeeper_logging::{init_logging, LogConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Only long-running commands narrate on stderr by default.
    let long_running = matches!(cli.command, Commands::Serve | Commands::Record { .. });
    let quiet = !cli.verbose && (cli.json || !long_running);
    let app_name = match cli.command {
        Commands::Serve => "streamkeeper-serve",
        _ => "streamkeeper",
    };
    if let Err(err) = init_logging(LogConfig {
        app_name,
        verbose: cli.verbose,
        quiet,
    }) {
        eprintln!("Warning: logging disabled: {:#}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start async runtime: {}", err);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(cli::run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(1)
        }
    }
}
