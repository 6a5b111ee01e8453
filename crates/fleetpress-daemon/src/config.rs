// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Settings file loading.

use std::path::Path;

use tracing::info;

use fleetpress_core::config::FleetConfig;
use fleetpress_core::error::Result;

/// Load a JSON settings file, or the defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<FleetConfig> {
    let Some(path) = path else {
        info!("no config file given, using defaults");
        return Ok(FleetConfig::default());
    };

    let data = std::fs::read_to_string(path)?;
    let config = FleetConfig::from_json(&data)?;
    info!(
        path = %path.display(),
        static_printers = config.printers.len(),
        "config loaded"
    );
    Ok(config)
}
