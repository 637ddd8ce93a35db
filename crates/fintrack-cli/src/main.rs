//! fintrack - track expenses and income from the terminal.
//!
//! Talks to a fintrack backend, remembers the login between runs, and prints
//! categories, transactions and a six-month dashboard.

mod cli;
mod commands;
mod console;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fintrack_core::{Config, SessionManager};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use commands::CommandError;
use console::ConsoleNotifier;

/// Directory for daily-rolling log files; file logging is off when unset
const ENV_LOG_DIR: &str = "FINTRACK_LOG_DIR";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file on drop and must outlive `main`'s work.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(ENV_LOG_DIR) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir.trim(), "fintrack.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();
    info!("fintrack starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CommandError::Reported) | Err(CommandError::Api(_)) => ExitCode::FAILURE,
        Err(CommandError::Other(e)) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    let mut config = load_config(cli.api_url)?;
    let manager = SessionManager::from_config(&config, Arc::new(ConsoleNotifier))?;
    commands::run(cli.command, &manager, &mut config).await
}

fn load_config(api_url: Option<String>) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
        config.api_base_url = url.trim().to_string();
    }
    Ok(config)
}
