// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Fleetpress print engine.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

/// Stable identity of a physical printer.
///
/// Ids are generated by the probe, not by the engine.  The engine assumes a
/// probe reports the same id for the same device on every cycle; a probe that
/// changes ids makes a device look lost and then newly discovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrinterId(pub String);

impl PrinterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrinterId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for PrinterId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterType {
    /// Receipt / kitchen thermal printer.
    Thermal,
    /// Label printer.
    Label,
    Other,
}

/// How the printer is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Usb,
    Network,
    Bluetooth,
    /// Installed in the operating system's print spooler.
    System,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Usb => "usb",
            Self::Network => "network",
            Self::Bluetooth => "bluetooth",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

/// Last reported device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    #[default]
    Online,
    Offline,
    Busy,
    Error,
    Unknown,
}

impl std::fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A printer as reported by a probe and held in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterRecord {
    pub id: PrinterId,
    pub name: String,
    #[serde(rename = "type")]
    pub printer_type: PrinterType,
    pub connection: ConnectionKind,
    #[serde(default)]
    pub status: PrinterStatus,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Feature flags such as `cut`, `drawer`, `qr`.  Compared as a set.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// When the printer was last reported by a probe.
    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

impl PrinterRecord {
    pub fn new(
        id: impl Into<PrinterId>,
        name: impl Into<String>,
        printer_type: PrinterType,
        connection: ConnectionKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            printer_type,
            connection,
            status: PrinterStatus::Online,
            ip: None,
            port: None,
            capabilities: BTreeSet::new(),
            last_seen: Utc::now(),
        }
    }

    pub fn with_address(mut self, ip: IpAddr, port: u16) -> Self {
        self.ip = Some(ip);
        self.port = Some(port);
        self
    }

    pub fn with_status(mut self, status: PrinterStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }
}

/// Fields compared when deciding whether a known printer changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterField {
    Status,
    Ip,
    Port,
    Connection,
    Capabilities,
}

/// One field that differs between the registry and the latest probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: PrinterField,
    pub previous: String,
    pub current: String,
}

/// A known printer whose observable state changed this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterUpdate {
    pub printer: PrinterRecord,
    pub changes: Vec<FieldChange>,
}

/// Result of comparing one probe result against the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDelta {
    pub new_printers: Vec<PrinterRecord>,
    pub updated_printers: Vec<PrinterUpdate>,
    pub lost_printers: Vec<PrinterRecord>,
}

impl DiscoveryDelta {
    pub fn is_empty(&self) -> bool {
        self.new_printers.is_empty()
            && self.updated_printers.is_empty()
            && self.lost_printers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the job prints.  The engine never interprets this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Test,
    Receipt,
    KitchenOrder,
    Label,
    Report,
    Custom(String),
}

/// Dispatch priority: 1 is dispatched first, 10 last.
///
/// Deserialisation goes through [`Priority::new`], so out-of-range numbers
/// read from JSON are clamped like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Self = Self(1);
    pub const NORMAL: Self = Self(5);
    pub const LOWEST: Self = Self(10);

    /// Build a priority, clamping into `1..=10`.
    pub fn new(value: u8) -> Self {
        Self(value.clamp(Self::HIGHEST.0, Self::LOWEST.0))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Lifecycle states of a print job.
///
/// `Queued -> Processing -> Completed | Queued (retry) | Failed`, plus
/// `Queued | Processing -> Cancelled` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a producer hands to `add_job`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub printer_id: PrinterId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl JobRequest {
    pub fn new(printer_id: impl Into<PrinterId>, job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            printer_id: printer_id.into(),
            job_type,
            payload,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(Priority::new(priority));
        self
    }
}

/// A print job and its full execution history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    pub printer_id: PrinterId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    /// Number of failed attempts so far.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Whatever the executor returned on success.
    pub result: Option<serde_json::Value>,
}

impl PrintJob {
    pub fn new(request: JobRequest) -> Self {
        Self {
            id: JobId::new(),
            printer_id: request.printer_id,
            job_type: request.job_type,
            payload: request.payload,
            priority: request.priority.unwrap_or_default(),
            status: JobStatus::Queued,
            retries: 0,
            created_at: Utc::now(),
            started_at: None,
            last_attempt_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            last_error: None,
            result: None,
        }
    }

    /// Mark the job cancelled, stamping `cancelled_at`.
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.cancelled_at = Some(Utc::now());
    }
}

/// Compact view of a job used in queue reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub priority: Priority,
    pub status: JobStatus,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&PrintJob> for JobSummary {
    fn from(job: &PrintJob) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            priority: job.priority,
            status: job.status,
            retries: job.retries,
            created_at: job.created_at,
        }
    }
}
