//! Replay command implementation.
//!
//! Reads one JSON `LogEntry` per line, applies it through a resource host,
//! and prints one JSON line per response and per event delivered to a
//! session. Blank lines and lines starting with `#` are skipped.

use crate::cli::ResourceKind;
use crate::core::codec::Codec;
use crate::core::config::Config;
use crate::resources::{CounterState, MapState, ValueState};
use crate::substrate::host::{LogEntry, ResourceHost, Snapshot};
use crate::substrate::operation::StateMachine;
use anyhow::{Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Replay a recorded log.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Resource type.
    #[arg(short, long, value_enum)]
    pub resource: ResourceKind,

    /// JSON-lines log file.
    #[arg(short, long)]
    pub log: PathBuf,

    /// Snapshot to install before replaying.
    #[arg(long)]
    pub snapshot_in: Option<PathBuf>,

    /// Write a snapshot here after replaying.
    #[arg(long)]
    pub snapshot_out: Option<PathBuf>,
}

/// Run the replay command.
pub fn run_replay(args: ReplayArgs, config: &Config) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.resource {
        ResourceKind::Value => replay::<ValueState>(&args, config, &mut out),
        ResourceKind::Counter => replay::<CounterState>(&args, config, &mut out),
        ResourceKind::Map => replay::<MapState>(&args, config, &mut out),
    }
}

fn replay<S>(args: &ReplayArgs, config: &Config, out: &mut impl Write) -> Result<()>
where
    S: StateMachine,
    S::Operation: DeserializeOwned,
{
    let codec = config.codec.kind;
    let mut host = ResourceHost::<S>::from_config(config);

    if let Some(path) = &args.snapshot_in {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read snapshot: {}", path.display()))?;
        let snapshot: Snapshot = codec.decode(&bytes)?;
        host.install(&snapshot)?;
        tracing::info!(index = snapshot.index, codec = codec.name(), "installed snapshot");
    }

    let file = std::fs::File::open(&args.log)
        .with_context(|| format!("failed to open log: {}", args.log.display()))?;
    let entries = read_entries::<S::Operation>(BufReader::new(file))?;
    tracing::info!(resource = S::RESOURCE_TYPE, entries = entries.len(), "replaying log");

    for entry in entries {
        let index = entry.index();
        let line = match host.apply(entry) {
            Ok(response) => json!({ "index": index, "response": response }),
            Err(e) => json!({ "index": index, "error": e.to_string() }),
        };
        writeln!(out, "{}", line)?;
        drain_events(&host, out)?;
    }

    if let Some(path) = &args.snapshot_out {
        let snapshot = host.take_snapshot()?;
        let bytes = codec.encode(&snapshot)?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("failed to write snapshot: {}", path.display()))?;
        tracing::info!(index = snapshot.index, bytes = bytes.len(), "wrote snapshot");
    }

    writeln!(out, "{}", json!({ "stats": host.stats() }))?;
    Ok(())
}

/// Parse JSON-lines log entries.
pub fn read_entries<O: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<LogEntry<O>>> {
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let entry = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid log entry on line {}", number + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn drain_events<S: StateMachine>(host: &ResourceHost<S>, out: &mut impl Write) -> Result<()> {
    for id in host.session_ids() {
        let session = host.session(id)?;
        let events = session.poll_events();
        if let Some(last) = events.last() {
            session.acknowledge(last.sequence);
        }
        for event in events {
            writeln!(out, "{}", json!({ "session": id, "event": event }))?;
        }
    }
    Ok(())
}
