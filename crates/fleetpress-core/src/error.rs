// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Fleetpress.
//
// Unknown job or printer ids are deliberately absent: lookups report them
// through `Option`, `bool` or counts instead of failing.

use thiserror::Error;

/// Top-level error type for all Fleetpress operations.
#[derive(Debug, Error)]
pub enum FleetError {
    // -- Discovery / dispatch --
    #[error("printer probe failed: {0}")]
    Probe(String),

    #[error("print job execution failed: {0}")]
    Execution(String),

    // -- Construction --
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid print job: {0}")]
    InvalidJob(String),

    // -- I/O / persistence of settings --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FleetError {
    /// Whether the error is raised while the engine is being wired up.
    ///
    /// Configuration failures are fatal; everything else is caught at the
    /// boundary of a discovery cycle or a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_errors_are_fatal() {
        assert!(FleetError::Configuration("no probe".into()).is_fatal());
        assert!(!FleetError::Probe("usb bus busy".into()).is_fatal());
        assert!(!FleetError::Execution("paper out".into()).is_fatal());
    }

    #[test]
    fn display_includes_detail() {
        let err = FleetError::Execution("connection refused".into());
        assert_eq!(err.to_string(), "print job execution failed: connection refused");
    }
}
