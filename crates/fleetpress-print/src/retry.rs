// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded retry policy shared by discovery and dispatch.
//
// Discovery retries a failed probe after a fixed delay.  The dispatcher
// retries a failed job after `base * failures` (linear backoff).  The two
// schedules are kept distinct on purpose; only the bound and the decision
// shape are shared.

use std::time::Duration;

use tracing::{debug, warn};

/// How the delay grows with the number of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `base_delay`.
    Fixed,
    /// Wait `base_delay * failures`.
    Linear,
}

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures tolerated before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: Backoff,
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Maximum retries exhausted.
    Exhausted,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay: delay,
            backoff: Backoff::Fixed,
        }
    }

    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: Backoff::Linear,
        }
    }

    /// Decide what to do after the `failures`-th consecutive failure.
    ///
    /// `failures` counts the failure that just happened, so the first call
    /// is made with `1`.  A retry is granted while `failures < max_retries`.
    pub fn decide(&self, failures: u32) -> RetryDecision {
        if failures >= self.max_retries {
            warn!(failures, max = self.max_retries, "retry limit exhausted");
            return RetryDecision::Exhausted;
        }
        let delay = self.delay_for(failures);
        debug!(failures, delay_ms = delay.as_millis() as u64, "scheduling retry");
        RetryDecision::RetryAfter(delay)
    }

    /// Delay before the retry that follows the `failures`-th failure.
    pub fn delay_for(&self, failures: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(failures.max(1)),
        }
    }
}
