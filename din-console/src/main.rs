//! Load Rack Console
//!
//! Builds a DIN-rail matrix from a device registry on simulated relays and
//! executes path and load commands read line by line from stdin.

mod commands;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use commands::Command;
use din_matrix::{Matrix, MatrixEvent, RackConfig};
use din_sim::SimRack;
use tracing::{debug, error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "din-rack", about = "Drive a DIN-rail load rack matrix")]
struct Args {
    /// Registry file, or a directory holding dinmatrix[N].json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Matrix instance, selects the numbered registry in a directory
    #[arg(short, long, default_value_t = 0)]
    instance: u32,

    /// Channels and buses of the built-in square rack (no registry given)
    #[arg(long, default_value_t = 8)]
    size: u8,

    /// Loads per bus of the built-in square rack
    #[arg(long, default_value_t = 8)]
    loads: usize,

    /// Print the effective registry as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn load_registry(args: &Args) -> anyhow::Result<RackConfig> {
    match &args.config {
        Some(path) => {
            let file = if path.is_dir() {
                RackConfig::file_name(path, args.instance)
            } else {
                path.clone()
            };
            RackConfig::load(&file).with_context(|| format!("loading {}", file.display()))
        }
        None => {
            let mut config = RackConfig::square(args.size, args.loads);
            config.instance = args.instance;
            config.validate().context("built-in rack")?;
            Ok(config)
        }
    }
}

/// Log what the matrix did since the last call
///
/// Also forgets the simulated rack's write journal, which nothing in the
/// console reads.
fn flush_activity(matrix: &Matrix, rack: &SimRack) {
    for event in matrix.drain_events() {
        let json = serde_json::to_string(&event).unwrap_or_else(|e| e.to_string());
        match event {
            MatrixEvent::HardwareFault { .. } => warn!("matrix event: {}", json),
            _ => debug!("matrix event: {}", json),
        }
    }
    rack.clear_journal();
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "din_rack=info,din_matrix=info,din_relay=info,din_sim=info".into()
            }),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let config = load_registry(&args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("Starting load rack console");
    let rack = SimRack::new();
    let matrix =
        Matrix::from_config(&config, Arc::new(rack.clone())).context("configuring matrix")?;
    flush_activity(&matrix, &rack);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                writeln!(stdout, "error: {e}")?;
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        let result = command.execute(&matrix);
        flush_activity(&matrix, &rack);
        match result {
            Ok(reply) if reply.is_empty() => writeln!(stdout, "ok")?,
            Ok(reply) => writeln!(stdout, "{reply}")?,
            Err(e) => {
                error!("{}: {}", line.trim(), e);
                writeln!(stdout, "error: {e}")?;
            }
        }
        stdout.flush()?;
    }

    matrix.reset().context("tearing down paths")?;
    flush_activity(&matrix, &rack);
    info!("Load rack console stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_is_flushed_after_each_command() {
        let rack = SimRack::new();
        let matrix =
            Matrix::from_config(&RackConfig::square(2, 8), Arc::new(rack.clone())).unwrap();
        flush_activity(&matrix, &rack);

        for _ in 0..100 {
            for line in ["path set 0 1 03", "path set 1 1 01", "path set 1 1 0"] {
                Command::parse(line).unwrap().execute(&matrix).unwrap();
                flush_activity(&matrix, &rack);
                assert!(matrix.drain_events().is_empty());
                assert!(rack.journal().is_empty());
            }
        }
        assert!(matrix.active_paths().is_empty());
    }
}
