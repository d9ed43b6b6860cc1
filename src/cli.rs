//! Command-line surface: three subcommands (`sender`, `receiver`,
//! `config`) sharing a common set of worker/coordinator flags.
//!
//! CLI flags are the final, highest-precedence override layer on top
//! of [`crate::config::BenchmarkSettings`] — they are applied after
//! the layered file/environment load, never fed through `config`
//! itself.

use crate::config::BenchmarkSettings;
use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Distributed push/pull and pub/sub transport benchmark.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run as a sender worker (optionally also launching the coordinator).
    Sender(WorkerArgs),
    /// Run as a receiver worker (optionally also launching the coordinator).
    Receiver(WorkerArgs),
    /// Print the fully resolved, layered settings and exit.
    Config(WorkerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct WorkerArgs {
    /// Also launch the coordinator process on this host before connecting.
    #[arg(long, help_heading = "Topology")]
    pub coordinator: bool,

    /// Number of sender-to-receivers groups the coordinator must assemble.
    #[arg(long = "num-pairs", help_heading = "Topology")]
    pub num_pairs: Option<usize>,

    /// Receivers per sender within each group.
    #[arg(long = "receivers-per-sender", help_heading = "Topology")]
    pub receivers_per_sender: Option<usize>,

    /// Sender binds the data port and receivers connect to it. When
    /// absent (the default), receivers bind and the sender connects out.
    #[arg(long, help_heading = "Topology")]
    pub sender_bind: bool,

    /// Coordinator's address, used by workers to connect.
    #[arg(long = "coordinator-ip", help_heading = "Network")]
    pub coordinator_ip: Option<String>,

    /// Use a small single-cell matrix for smoke testing.
    #[arg(long, help_heading = "Test Matrix")]
    pub short: bool,

    /// Log level: DEBUG, INFO, WARNING, ERROR, or CRITICAL.
    #[arg(long = "log-level", help_heading = "Logging")]
    pub log_level: Option<String>,

    /// Path to a layered key/value config file (TOML/YAML/JSON).
    #[arg(long = "config-file", help_heading = "Configuration")]
    pub config_file: Option<PathBuf>,
}

impl WorkerArgs {
    /// Layers these flags on top of settings already resolved from
    /// defaults, config file, and environment.
    pub fn apply(&self, settings: &mut BenchmarkSettings) {
        if let Some(num_pairs) = self.num_pairs {
            settings.num_pairs = num_pairs;
        }
        if let Some(k) = self.receivers_per_sender {
            settings.receivers_per_sender = k;
        }
        if self.sender_bind {
            settings.worker.sender_bind = true;
        }
        if let Some(ip) = &self.coordinator_ip {
            settings.network.coordinator_ip = ip.clone();
        }
        if self.short {
            settings.short_test = true;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
    }
}
