//! Atoll - unified CLI entrypoint.
//!
//! Usage:
//!   atoll replay --resource map --log map.jsonl [--snapshot-out map.snap]
//!   atoll routes --resource counter
//!   atoll config validate --config atoll.toml
//!   atoll config show [--config atoll.toml] [--format json]

use anyhow::{Context, Result};
use atoll::cli::commands::{run_config, run_replay, run_routes};
use atoll::cli::{init_tracing, Cli, Commands};
use atoll::core::config::{Config, ConfigOverrides};
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    config.apply_overrides(&ConfigOverrides {
        log_level: cli.log_level.clone(),
    });
    config.validate()?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Replay(args) => run_replay(args, &config),
        Commands::Routes(args) => run_routes(args),
        Commands::Config(args) => run_config(args),
    }
}
