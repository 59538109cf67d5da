//! Command-line interface.
//!
//! Offline tooling for atoll state machines: replay a recorded log through a
//! resource host, list dispatch tables, and check configuration.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Atoll - deterministic state machines for replicated resources.
#[derive(Parser, Debug)]
#[command(name = "atoll")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a JSON-lines log through a resource.
    Replay(commands::ReplayArgs),
    /// List a resource's operations and gateway routes.
    Routes(commands::RoutesArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}

/// Resource types.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Value,
    Counter,
    Map,
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}
