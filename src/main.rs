//! Entry point: parses the `sender` / `receiver` / `config` CLI
//! surface, resolves the layered settings, and dispatches into the
//! worker control loop, optionally co-locating the coordinator in
//! this same process.

use anyhow::Result;
use clap::Parser;
use ipc_benchmark::cli::{Cli, Command, WorkerArgs};
use ipc_benchmark::config::BenchmarkSettings;
use ipc_benchmark::messages::Role;
use ipc_benchmark::{coordinator, worker};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::LevelFilter, prelude::*};

mod logging;
use logging::ColorizedFormatter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sender(args) => run_worker(Role::Sender, args).await,
        Command::Receiver(args) => run_worker(Role::Receiver, args).await,
        Command::Config(args) => print_config(args),
    }
}

/// Resolves the layered settings (defaults, config file, `BENCH_`
/// environment, then these flags) without starting anything, matching
/// the `config` subcommand's job of letting an operator confirm what
/// a run would actually use.
fn print_config(args: WorkerArgs) -> Result<()> {
    let mut settings = BenchmarkSettings::load(args.config_file.as_deref())?;
    args.apply(&mut settings);
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn run_worker(role: Role, args: WorkerArgs) -> Result<()> {
    let mut settings = BenchmarkSettings::load(args.config_file.as_deref())?;
    args.apply(&mut settings);
    init_logging(&settings.logging.level);

    let worker_id = format!("{role}-{}", uuid::Uuid::new_v4());

    let coordinator_handle = if args.coordinator {
        info!("launching coordinator alongside this worker");
        let coordinator_settings = settings.clone();
        Some(tokio::spawn(async move {
            coordinator::run(&coordinator_settings).await
        }))
    } else {
        None
    };

    let worker_result = worker::run(role, worker_id, &settings).await;

    if let Some(handle) = coordinator_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "coordinator process exited with an error"),
            Err(e) => error!(error = %e, "coordinator task panicked"),
        }
    }

    worker_result
}

/// Maps the five settings-file log levels onto `tracing`'s four,
/// folding `CRITICAL` into `ERROR` since `tracing` has no finer level
/// above it.
fn init_logging(level: &str) {
    let filter = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::from_level(Level::DEBUG),
        "WARNING" => LevelFilter::from_level(Level::WARN),
        "ERROR" | "CRITICAL" => LevelFilter::from_level(Level::ERROR),
        _ => LevelFilter::from_level(Level::INFO),
    };

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .event_format(ColorizedFormatter)
        .with_filter(filter);

    tracing_subscriber::registry().with(stdout_layer).init();
}
