//! netlayer command-line driver.
//!
//! # Architecture Overview
//!
//! ```text
//!        stdin (JSON lines)                               stdout (JSON lines)
//!  ──────────────────────────┐                      ┌──────────────────────────▶
//!                            ▼                      │
//!                    ┌──────────────┐        ┌──────┴───────┐
//!                    │  dispatcher  │───────▶│ completions  │
//!                    └──────┬───────┘        └──────▲───────┘
//!                           │ NetOps                │ one per op id
//!                           ▼                       │
//!   ┌──────────┐   ┌────────────────┐   ┌──────────┴─────────┐
//!   │ resolver │◀──│ resource table │──▶│ net drivers / tls  │
//!   └──────────┘   └────────────────┘   └────────────────────┘
//! ```
//!
//! `resolve` performs a single lookup and prints the ordered candidates.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use netlayer::config::{load_config, LayerConfig};
use netlayer::lifecycle::{signals, startup, Shutdown};
use netlayer::observability::logging;
use netlayer::ops::dispatch::{parse_inbound, Inbound};
use netlayer::resolver::AddressFamily;
use netlayer::{Dispatcher, NetOps};

#[derive(Parser)]
#[command(name = "netlayer", version, about = "Asynchronous network resource layer")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a hostname into ordered connection candidates.
    Resolve {
        host: String,
        #[arg(default_value_t = 0)]
        port: u16,
        /// Only return addresses of this family (v4 or v6).
        #[arg(long, value_parser = parse_family)]
        family: Option<AddressFamily>,
    },
    /// Serve ops as JSON lines: requests on stdin, completions on stdout.
    ServeOps,
}

fn parse_family(raw: &str) -> Result<AddressFamily, String> {
    match raw {
        "v4" | "ipv4" | "4" => Ok(AddressFamily::Ipv4),
        "v6" | "ipv6" | "6" => Ok(AddressFamily::Ipv6),
        other => Err(format!("unknown address family '{other}' (expected v4 or v6)")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("netlayer: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => LayerConfig::default(),
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("netlayer: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match startup::build_runtime(&config.runtime) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start worker pool");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "netlayer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: LayerConfig) -> Result<(), Box<dyn std::error::Error>> {
    startup::start_metrics(&config.observability);
    let ops = NetOps::new(config)?;
    match command {
        Command::Resolve { host, port, family } => resolve(&ops, &host, port, family).await,
        Command::ServeOps => serve_ops(ops).await,
    }
}

async fn resolve(
    ops: &NetOps,
    host: &str,
    port: u16,
    family: Option<AddressFamily>,
) -> Result<(), Box<dyn std::error::Error>> {
    let candidates = ops.resolve(host, port, family).await?;
    for candidate in candidates {
        println!("{}", candidate.addr);
    }
    Ok(())
}

async fn serve_ops(ops: NetOps) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_ctrl_c(shutdown.clone()));
    let mut stop = shutdown.subscribe();

    let (dispatcher, mut completions) = Dispatcher::new(ops.clone());
    let mut writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(completion) = completions.recv().await {
            let mut line = serde_json::to_vec(&completion)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
    });

    tracing::info!("Serving ops on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = stop.triggered() => break,
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match parse_inbound(&line) {
                    Ok(Inbound::Op(envelope)) => dispatcher.dispatch(envelope),
                    Ok(Inbound::Cancel(id)) => {
                        if !dispatcher.cancel(id) {
                            tracing::debug!(id, "Cancel for an op that is not in flight");
                        }
                    }
                    Err((id, err)) => dispatcher.reject(id, err),
                },
                None => {
                    tracing::info!(in_flight = dispatcher.in_flight(), "Input closed, draining ops");
                    break;
                }
            },
        }
    }

    // Completions end once every dispatched op has reported. An interrupt
    // closes all resources so ops waiting on them finish immediately.
    drop(dispatcher);
    let written = if shutdown.is_triggered() {
        ops.close_all();
        writer.await?
    } else {
        tokio::select! {
            written = &mut writer => written?,
            _ = stop.triggered() => {
                ops.close_all();
                writer.await?
            }
        }
    };
    written.map_err(|e| e as Box<dyn std::error::Error>)?;
    tracing::info!("Shutdown complete");
    Ok(())
}
