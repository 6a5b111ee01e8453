// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fleetpress Print — periodic printer discovery and the per-printer job
// queue/dispatcher.  Device access is injected through the `Probe` and
// `Executor` traits; everything else (registry diffing, retries, queue
// ordering, notifications) lives here on top of `fleetpress-core` types.

pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod fleet;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod store;

pub use discovery::{DiscoveryEngine, DiscoveryHealth, DiscoveryStatistics, DiscoveryStatus, Probe};
pub use dispatcher::{Dispatcher, DispatcherStatistics, Executor};
pub use events::EventBus;
pub use fleet::PrintFleet;
pub use registry::PrinterRegistry;
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use store::{JobStore, QueueState, QueueStatus};
