// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Running duration statistics for periodic work.

use std::time::Duration;

/// Last and mean duration of a repeated operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurationStats {
    samples: u64,
    last: Option<Duration>,
    average: Duration,
}

impl DurationStats {
    pub fn record(&mut self, sample: Duration) {
        self.samples += 1;
        self.last = Some(sample);
        // Incremental mean in nanoseconds; u128 keeps it exact for any
        // realistic cycle length.
        let n = self.samples as u128;
        let prev = self.average.as_nanos();
        let mean = if sample.as_nanos() >= prev {
            prev + (sample.as_nanos() - prev) / n
        } else {
            prev - (prev - sample.as_nanos()) / n
        };
        self.average = Duration::from_nanos(mean.min(u64::MAX as u128) as u64);
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    pub fn average(&self) -> Duration {
        self.average
    }
}
