// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw TCP executor (JetDirect style).
//
// Opens a socket to the printer's address as last reported by discovery and
// writes the payload.  A string payload is sent as-is; anything else is sent
// as its JSON encoding.  There is no acknowledgement from the device, so a
// clean shutdown of the write side counts as success.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use fleetpress_core::error::{FleetError, Result};
use fleetpress_core::types::PrintJob;
use fleetpress_print::discovery::DiscoveryEngine;
use fleetpress_print::dispatcher::Executor;

/// Port used when a printer record has an address but no port.
pub const RAW_PORT: u16 = 9100;

const CHUNK_SIZE: usize = 8192;

pub struct RawTcpExecutor {
    discovery: DiscoveryEngine,
    timeout: Duration,
}

impl RawTcpExecutor {
    pub fn new(discovery: DiscoveryEngine, timeout: Duration) -> Self {
        Self { discovery, timeout }
    }

    fn resolve(&self, job: &PrintJob) -> Result<SocketAddr> {
        let printer = self.discovery.printer(&job.printer_id).ok_or_else(|| {
            FleetError::Execution(format!("printer {} is not currently discovered", job.printer_id))
        })?;
        let ip = printer.ip.ok_or_else(|| {
            FleetError::Execution(format!("printer {} has no network address", job.printer_id))
        })?;
        Ok(SocketAddr::new(ip, printer.port.unwrap_or(RAW_PORT)))
    }
}

/// Bytes sent to the device for a payload.
pub fn payload_bytes(payload: &serde_json::Value) -> Result<Vec<u8>> {
    match payload {
        serde_json::Value::String(text) => Ok(text.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

#[async_trait]
impl Executor for RawTcpExecutor {
    async fn execute(&self, job: &PrintJob) -> Result<serde_json::Value> {
        let addr = self.resolve(job)?;
        let data = payload_bytes(&job.payload)?;
        info!(job_id = %job.id, %addr, total = data.len(), "sending job via raw TCP");

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                FleetError::Execution(format!(
                    "connection to {addr} timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| FleetError::Execution(format!("connect to {addr}: {e}")))?;

        let mut sent = 0;
        for chunk in data.chunks(CHUNK_SIZE) {
            stream
                .write_all(chunk)
                .await
                .map_err(|e| FleetError::Execution(format!("send failed at byte {sent}: {e}")))?;
            sent += chunk.len();
            debug!(sent, total = data.len(), "raw TCP progress");
        }

        stream
            .flush()
            .await
            .map_err(|e| FleetError::Execution(format!("flush: {e}")))?;
        stream
            .shutdown()
            .await
            .map_err(|e| FleetError::Execution(format!("shutdown: {e}")))?;

        Ok(json!({ "address": addr.to_string(), "bytes": sent }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use fleetpress_core::config::DiscoveryConfig;
    use fleetpress_core::types::{ConnectionKind, JobRequest, JobType, PrinterRecord, PrinterType};

    use crate::probe::StaticProbe;

    use super::*;

    async fn discovery_with(printers: Vec<PrinterRecord>) -> DiscoveryEngine {
        let engine = DiscoveryEngine::builder()
            .config(DiscoveryConfig::default())
            .probe(Arc::new(StaticProbe::new(printers)))
            .build()
            .expect("build discovery");
        engine.perform_discovery().await.expect("discover");
        engine
    }

    fn job(printer: &str, payload: serde_json::Value) -> PrintJob {
        PrintJob::new(JobRequest::new(printer, JobType::Receipt, payload))
    }

    #[test]
    fn string_payload_is_sent_verbatim() {
        assert_eq!(payload_bytes(&json!("HELLO\n")).expect("bytes"), b"HELLO\n");
        assert_eq!(
            payload_bytes(&json!({"lines": 2})).expect("bytes"),
            br#"{"lines":2}"#
        );
    }

    #[tokio::test]
    async fn job_bytes_reach_the_printer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.expect("read");
            received
        });

        let printer = PrinterRecord::new("bar", "Bar", PrinterType::Thermal, ConnectionKind::Network)
            .with_address(addr.ip(), addr.port());
        let executor = RawTcpExecutor::new(discovery_with(vec![printer]).await, Duration::from_secs(1));

        let result = executor
            .execute(&job("bar", json!("2x espresso\n")))
            .await
            .expect("execute");
        assert_eq!(result["bytes"], json!(12));
        assert_eq!(receiver.await.expect("join"), b"2x espresso\n");
    }

    #[tokio::test]
    async fn undiscovered_printer_fails_the_attempt() {
        let executor = RawTcpExecutor::new(discovery_with(Vec::new()).await, Duration::from_secs(1));
        let err = executor.execute(&job("ghost", json!("x"))).await.unwrap_err();
        assert!(matches!(err, FleetError::Execution(_)));
    }

    #[tokio::test]
    async fn printer_without_address_fails_the_attempt() {
        let usb = PrinterRecord::new("usb", "USB", PrinterType::Label, ConnectionKind::Usb);
        let executor = RawTcpExecutor::new(discovery_with(vec![usb]).await, Duration::from_secs(1));
        let err = executor.execute(&job("usb", json!("x"))).await.unwrap_err();
        assert!(err.to_string().contains("no network address"));
    }
}
