// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Probes used by the daemon.
//
// `StaticProbe` reports printers listed in the config file.  `NetworkProbe`
// tries a TCP connect to every host and port in the scan range; anything
// that accepts is reported as a network printer with the stable id
// `net-<ip>-<port>`.  `CompositeProbe` concatenates the results of several
// probes and fails the cycle if any of them fails.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use fleetpress_core::config::{ProbeOptions, parse_scan_range};
use fleetpress_core::error::Result;
use fleetpress_core::types::{ConnectionKind, PrinterRecord, PrinterStatus, PrinterType};
use fleetpress_print::discovery::Probe;

/// Connect attempts in flight at once during a network scan.
const SCAN_CONCURRENCY: usize = 64;

/// Configured printers, filtered by the enabled discovery methods.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    printers: Vec<PrinterRecord>,
}

impl StaticProbe {
    pub fn new(printers: Vec<PrinterRecord>) -> Self {
        Self { printers }
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn find_printers(&self, options: &ProbeOptions) -> Result<Vec<PrinterRecord>> {
        Ok(self
            .printers
            .iter()
            .filter(|p| method_enabled(p.connection, options))
            .cloned()
            .collect())
    }
}

fn method_enabled(connection: ConnectionKind, options: &ProbeOptions) -> bool {
    match connection {
        ConnectionKind::Usb => options.enable_usb,
        ConnectionKind::Network => options.enable_network,
        ConnectionKind::Bluetooth => options.enable_bluetooth,
        ConnectionKind::System => options.enable_system,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkProbe;

#[async_trait]
impl Probe for NetworkProbe {
    async fn find_printers(&self, options: &ProbeOptions) -> Result<Vec<PrinterRecord>> {
        if !options.enable_network || options.network_scan_ports.is_empty() {
            return Ok(Vec::new());
        }

        let hosts = parse_scan_range(&options.network_scan_range)?;
        let limit = Arc::new(Semaphore::new(SCAN_CONCURRENCY));
        let mut scans = JoinSet::new();

        for host in hosts {
            for &port in &options.network_scan_ports {
                let limit = Arc::clone(&limit);
                let timeout = options.timeout;
                scans.spawn(async move {
                    let _permit = limit.acquire_owned().await.ok()?;
                    let addr = SocketAddr::new(IpAddr::V4(host), port);
                    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                        Ok(Ok(_stream)) => Some(addr),
                        Ok(Err(e)) => {
                            debug!(%addr, error = %e, "no printer");
                            None
                        }
                        Err(_) => None,
                    }
                });
            }
        }

        let mut found = Vec::new();
        while let Some(joined) = scans.join_next().await {
            match joined {
                Ok(Some(addr)) => found.push(addr),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "scan task failed"),
            }
        }
        found.sort();

        debug!(found = found.len(), range = %options.network_scan_range, "network scan finished");
        Ok(found.into_iter().map(network_printer).collect())
    }
}

fn network_printer(addr: SocketAddr) -> PrinterRecord {
    let ip = addr.ip();
    let port = addr.port();
    let mut record = PrinterRecord::new(
        format!("net-{ip}-{port}"),
        format!("Network printer {ip}:{port}"),
        PrinterType::Other,
        ConnectionKind::Network,
    )
    .with_address(ip, port)
    .with_status(PrinterStatus::Online);
    if let Some(protocol) = port_protocol(port) {
        record = record.with_capability(protocol);
    }
    record
}

fn port_protocol(port: u16) -> Option<&'static str> {
    match port {
        9100 => Some("raw"),
        515 => Some("lpr"),
        631 => Some("ipp"),
        _ => None,
    }
}

/// Runs several probes one after another and concatenates their results.
#[derive(Clone, Default)]
pub struct CompositeProbe {
    probes: Vec<Arc<dyn Probe>>,
}

impl CompositeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }
}

#[async_trait]
impl Probe for CompositeProbe {
    async fn find_printers(&self, options: &ProbeOptions) -> Result<Vec<PrinterRecord>> {
        let mut printers = Vec::new();
        for probe in &self.probes {
            printers.extend(probe.find_printers(options).await?);
        }
        Ok(printers)
    }
}
