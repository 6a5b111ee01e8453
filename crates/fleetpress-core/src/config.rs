// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.
//
// Durations are stored as `Duration` and written to disk as milliseconds so
// config files stay readable (`"interval_ms": 30000`).

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};
use crate::types::PrinterRecord;

/// Settings for the discovery schedule and the probe it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// When false, `start` does nothing.
    pub enabled: bool,
    /// Time between scheduled discovery cycles.
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Retries scheduled after consecutive probe failures.
    pub max_retries: u32,
    /// Fixed delay before a probe retry.
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    pub enable_usb: bool,
    pub enable_system: bool,
    pub enable_network: bool,
    pub enable_bluetooth: bool,
    /// Host range to scan, e.g. `192.168.1.1-254` or a single address.
    pub network_scan_range: String,
    pub network_scan_ports: Vec<u16>,
    /// Per-host connect timeout for network scanning.
    #[serde(rename = "probe_timeout_ms", with = "duration_ms")]
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            enable_usb: true,
            enable_system: true,
            enable_network: true,
            enable_bluetooth: false,
            network_scan_range: "192.168.1.1-254".into(),
            network_scan_ports: vec![9100, 515, 631],
            probe_timeout: Duration::from_millis(500),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(FleetError::Configuration(
                "discovery interval must be greater than zero".into(),
            ));
        }
        if self.enable_network {
            parse_scan_range(&self.network_scan_range)?;
        }
        Ok(())
    }

    /// The subset of settings handed to the probe on every cycle.
    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            enable_usb: self.enable_usb,
            enable_system: self.enable_system,
            enable_network: self.enable_network,
            enable_bluetooth: self.enable_bluetooth,
            network_scan_range: self.network_scan_range.clone(),
            network_scan_ports: self.network_scan_ports.clone(),
            timeout: self.probe_timeout,
        }
    }
}

/// Expand `a.b.c.x-y` (last octet range) or a single IPv4 address.
pub fn parse_scan_range(range: &str) -> Result<Vec<Ipv4Addr>> {
    let range = range.trim();
    let invalid = || FleetError::Configuration(format!("invalid network scan range: {range:?}"));

    let Some((start, end)) = range.split_once('-') else {
        let ip: Ipv4Addr = range.parse().map_err(|_| invalid())?;
        return Ok(vec![ip]);
    };

    let first: Ipv4Addr = start.trim().parse().map_err(|_| invalid())?;
    let last_octet: u8 = end.trim().parse().map_err(|_| invalid())?;
    let [a, b, c, from] = first.octets();
    if last_octet < from {
        return Err(invalid());
    }
    Ok((from..=last_octet).map(|d| Ipv4Addr::new(a, b, c, d)).collect())
}

/// Partial update for [`DiscoveryConfig`]; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfigPatch {
    pub enabled: Option<bool>,
    #[serde(rename = "interval_ms", with = "option_duration_ms")]
    pub interval: Option<Duration>,
    pub max_retries: Option<u32>,
    #[serde(rename = "retry_delay_ms", with = "option_duration_ms")]
    pub retry_delay: Option<Duration>,
    pub enable_usb: Option<bool>,
    pub enable_system: Option<bool>,
    pub enable_network: Option<bool>,
    pub enable_bluetooth: Option<bool>,
    pub network_scan_range: Option<String>,
    pub network_scan_ports: Option<Vec<u16>>,
    #[serde(rename = "probe_timeout_ms", with = "option_duration_ms")]
    pub probe_timeout: Option<Duration>,
}

impl DiscoveryConfigPatch {
    /// Merge into `config`, overwriting only the fields that are set.
    pub fn apply(self, config: &mut DiscoveryConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.interval {
            config.interval = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.retry_delay {
            config.retry_delay = v;
        }
        if let Some(v) = self.enable_usb {
            config.enable_usb = v;
        }
        if let Some(v) = self.enable_system {
            config.enable_system = v;
        }
        if let Some(v) = self.enable_network {
            config.enable_network = v;
        }
        if let Some(v) = self.enable_bluetooth {
            config.enable_bluetooth = v;
        }
        if let Some(v) = self.network_scan_range {
            config.network_scan_range = v;
        }
        if let Some(v) = self.network_scan_ports {
            config.network_scan_ports = v;
        }
        if let Some(v) = self.probe_timeout {
            config.probe_timeout = v;
        }
    }
}

/// Options passed to `Probe::find_printers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    pub enable_usb: bool,
    pub enable_system: bool,
    pub enable_network: bool,
    pub enable_bluetooth: bool,
    pub network_scan_range: String,
    pub network_scan_ports: Vec<u16>,
    pub timeout: Duration,
}

/// Settings for the job dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Period of the dispatch tick.
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,
    /// Failed attempts allowed before a job is marked failed.
    pub max_retries: u32,
    /// Base of the linear retry backoff (`retry_delay * retries`).
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    /// How many queued jobs a queue report previews.
    pub queue_preview: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            queue_preview: 5,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(FleetError::Configuration(
                "dispatcher tick interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Complete settings file for a fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub discovery: DiscoveryConfig,
    pub dispatcher: DispatcherConfig,
    /// Printers that are always reported, independent of scanning.
    pub printers: Vec<PrinterRecord>,
}

impl FleetConfig {
    /// Parse a JSON settings document.  Missing fields take their defaults.
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)?;
        config.discovery.validate()?;
        config.dispatcher.validate()?;
        Ok(config)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
