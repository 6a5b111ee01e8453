// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Notifications published by the discovery engine and the dispatcher.
//
// Events are fire-and-forget: nothing waits for a subscriber to acknowledge
// them.  The serialized `event` tag matches the names external subscribers
// listen for (`printer-discovered`, `job-retry`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FieldChange, JobId, PrinterId, PrinterRecord, Priority};

/// Totals of one completed discovery cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverySummary {
    pub found: usize,
    pub new: usize,
    pub updated: usize,
    pub lost: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum FleetEvent {
    // -- Discovery --
    PrinterDiscovered {
        printer: PrinterRecord,
    },
    PrinterStatusChanged {
        printer: PrinterRecord,
        changes: Vec<FieldChange>,
    },
    PrinterLost {
        printer: PrinterRecord,
    },
    /// Emitted once at the end of every successful discovery cycle.
    DiscoverySummary(DiscoverySummary),
    DiscoveryError {
        error: String,
        consecutive_failures: u32,
        will_retry: bool,
    },

    // -- Jobs --
    JobQueued {
        job_id: JobId,
        printer_id: PrinterId,
        priority: Priority,
        position: usize,
    },
    JobStarted {
        job_id: JobId,
        printer_id: PrinterId,
        attempt: u32,
    },
    JobCompleted {
        job_id: JobId,
        printer_id: PrinterId,
    },
    JobRetry {
        job_id: JobId,
        printer_id: PrinterId,
        retries: u32,
        delay_ms: u64,
        error: String,
    },
    JobFailed {
        job_id: JobId,
        printer_id: PrinterId,
        retries: u32,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
        printer_id: PrinterId,
        was_processing: bool,
    },
    PrinterPaused {
        printer_id: PrinterId,
    },
    PrinterResumed {
        printer_id: PrinterId,
    },
    JobsCleared {
        count: usize,
    },
}

impl FleetEvent {
    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PrinterDiscovered { .. } => "printer-discovered",
            Self::PrinterStatusChanged { .. } => "printer-status-changed",
            Self::PrinterLost { .. } => "printer-lost",
            Self::DiscoverySummary(_) => "discovery-summary",
            Self::DiscoveryError { .. } => "discovery-error",
            Self::JobQueued { .. } => "job-queued",
            Self::JobStarted { .. } => "job-started",
            Self::JobCompleted { .. } => "job-completed",
            Self::JobRetry { .. } => "job-retry",
            Self::JobFailed { .. } => "job-failed",
            Self::JobCancelled { .. } => "job-cancelled",
            Self::PrinterPaused { .. } => "printer-paused",
            Self::PrinterResumed { .. } => "printer-resumed",
            Self::JobsCleared { .. } => "jobs-cleared",
        }
    }

    /// Job the event refers to, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobRetry { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_matches_name() {
        let event = FleetEvent::JobsCleared { count: 2 };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], event.name());
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn summary_is_tagged_inline() {
        let event = FleetEvent::DiscoverySummary(DiscoverySummary {
            found: 3,
            new: 1,
            updated: 0,
            lost: 0,
            duration_ms: 12,
            completed_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "discovery-summary");
        assert_eq!(json["found"], 3);
    }

    #[test]
    fn job_id_only_for_job_events() {
        let id = JobId::new();
        let event = FleetEvent::JobCompleted {
            job_id: id,
            printer_id: "P1".into(),
        };
        assert_eq!(event.job_id(), Some(id));
        assert_eq!(
            FleetEvent::PrinterPaused { printer_id: "P1".into() }.job_id(),
            None
        );
    }
}
