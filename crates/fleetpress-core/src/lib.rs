// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fleetpress — Core types, configuration, events and errors shared across
// all crates.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{DiscoveryConfig, DiscoveryConfigPatch, DispatcherConfig, FleetConfig, ProbeOptions};
pub use error::FleetError;
pub use events::{DiscoverySummary, FleetEvent};
pub use types::*;
