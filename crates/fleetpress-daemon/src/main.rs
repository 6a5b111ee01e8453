// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fleetpress — printer fleet discovery and print job dispatch daemon
//
// Entry point. Initialises logging, loads settings, wires the probes and the
// raw TCP executor into a `PrintFleet`, logs every fleet event and runs until
// Ctrl-C.

mod config;
mod executor;
mod probe;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use fleetpress_core::error::Result;
use fleetpress_core::events::FleetEvent;
use fleetpress_print::PrintFleet;

use executor::RawTcpExecutor;
use probe::{CompositeProbe, NetworkProbe, StaticProbe};

#[derive(Parser, Debug)]
#[command(
    name = "fleetpress",
    version,
    about = "Discovers printers and dispatches print jobs to them."
)]
struct Cli {
    /// JSON settings file; defaults are used when omitted.
    #[arg(short, long, env = "FLEETPRESS_CONFIG")]
    config: Option<PathBuf>,

    /// Only report configured printers, skip the TCP scan.
    #[arg(long)]
    no_scan: bool,

    /// Connect timeout for sending a job, in seconds.
    #[arg(long, default_value_t = 60)]
    send_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("Fleetpress starting");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fleetpress failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load(cli.config.as_deref())?;

    let mut probe = CompositeProbe::new().with(Arc::new(StaticProbe::new(config.printers.clone())));
    if cli.no_scan {
        info!("network scan disabled");
    } else {
        probe = probe.with(Arc::new(NetworkProbe));
    }

    let send_timeout = Duration::from_secs(cli.send_timeout);
    let fleet = PrintFleet::builder()
        .config(config)
        .probe(Arc::new(probe))
        .executor_from_discovery(move |discovery| {
            Arc::new(RawTcpExecutor::new(discovery.clone(), send_timeout))
        })
        .build()?;

    let mut events = fleet.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    fleet.start();
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    fleet.stop().await;
    logger.abort();
    info!("Fleetpress stopped");
    Ok(())
}

fn log_event(event: &FleetEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(event = event.name(), %json, "fleet event"),
        Err(e) => warn!(event = event.name(), error = %e, "unserialisable fleet event"),
    }
}
