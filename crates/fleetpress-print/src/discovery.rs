// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic printer discovery.
//
// A background task calls the injected `Probe` every `interval`, diffs the
// result against the registry and publishes one event per changed printer
// followed by a `discovery-summary`.  Probe failures are retried after a
// fixed delay up to `max_retries` consecutive failures; the regular schedule
// keeps running whatever the retries do.
//
// All timing goes through `tokio::time`, so tests drive the schedule with a
// paused clock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use fleetpress_core::config::{DiscoveryConfig, DiscoveryConfigPatch, ProbeOptions};
use fleetpress_core::error::{FleetError, Result};
use fleetpress_core::events::{DiscoverySummary, FleetEvent};
use fleetpress_core::types::{DiscoveryDelta, PrinterId, PrinterRecord};

use crate::events::EventBus;
use crate::registry::PrinterRegistry;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::stats::DurationStats;

/// Source of printer sightings.
///
/// Implementations may aggregate several detection mechanisms (USB, OS
/// spooler, network scan, Bluetooth) according to the toggles in `options`.
///
/// Identity contract: the engine diffs purely by [`PrinterRecord::id`].  An
/// implementation must report the same id for the same physical device on
/// every call, otherwise the device is reported lost and then new.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn find_printers(&self, options: &ProbeOptions) -> Result<Vec<PrinterRecord>>;
}

/// Coarse health of the discovery schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryHealth {
    /// Running, and a cycle succeeded within three intervals (or the engine
    /// started less than three intervals ago).
    Healthy,
    /// Running, but no successful cycle for more than three intervals.
    Degraded,
    /// Not running.
    Unhealthy,
}

/// Snapshot of the engine's lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryStatus {
    pub running: bool,
    pub enabled: bool,
    pub known_printers: usize,
    pub consecutive_failures: u32,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub health: DiscoveryHealth,
}

/// Counters accumulated since the engine was built.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryStatistics {
    /// Cycles attempted, successful or not.
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub total_errors: u64,
    /// Printers reported as new, summed over all cycles.
    pub printers_found: u64,
    /// Printers reported as lost, summed over all cycles.
    pub printers_lost: u64,
    pub last_duration: Option<Duration>,
    pub average_duration: Duration,
    pub known_printers: usize,
}

#[derive(Debug, Default)]
struct Counters {
    total_cycles: u64,
    successful_cycles: u64,
    total_errors: u64,
    printers_found: u64,
    printers_lost: u64,
    consecutive_failures: u32,
    last_cycle_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_success: Option<Instant>,
    durations: DurationStats,
}

#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    started_at: Option<Instant>,
    shutdown: Option<Arc<Notify>>,
    task: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

struct Inner {
    probe: Arc<dyn Probe>,
    events: EventBus,
    config: Mutex<DiscoveryConfig>,
    registry: Mutex<PrinterRegistry>,
    counters: Mutex<Counters>,
    lifecycle: Mutex<Lifecycle>,
    /// Serialises cycles so a forced refresh never interleaves with a
    /// scheduled one.
    cycle_lock: tokio::sync::Mutex<()>,
}

/// A failed cycle and whether the policy grants a retry.
struct CycleFailure {
    error: FleetError,
    retry_after: Option<Duration>,
}

/// Builder for [`DiscoveryEngine`].
#[derive(Default)]
pub struct DiscoveryEngineBuilder {
    config: DiscoveryConfig,
    probe: Option<Arc<dyn Probe>>,
    events: Option<EventBus>,
}

impl DiscoveryEngineBuilder {
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Publish onto an existing bus instead of a private one.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Fails with [`FleetError::Configuration`] when no probe is wired or
    /// the configuration is invalid.
    pub fn build(self) -> Result<DiscoveryEngine> {
        let probe = self.probe.ok_or_else(|| {
            FleetError::Configuration("discovery engine requires a probe".into())
        })?;
        self.config.validate()?;

        Ok(DiscoveryEngine {
            inner: Arc::new(Inner {
                probe,
                events: self.events.unwrap_or_default(),
                config: Mutex::new(self.config),
                registry: Mutex::new(PrinterRegistry::new()),
                counters: Mutex::new(Counters::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }
}

/// Printer discovery engine.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<Inner>,
}

impl DiscoveryEngine {
    pub fn builder() -> DiscoveryEngineBuilder {
        DiscoveryEngineBuilder::default()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Start the schedule: one cycle immediately, then one every `interval`.
    ///
    /// Does nothing if already running or if discovery is disabled.  Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) {
        let config = self.inner.config().clone();
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.running {
            debug!("printer discovery already running");
            return;
        }
        if !config.enabled {
            info!("printer discovery disabled, not starting");
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_schedule(
            Arc::clone(&self.inner),
            Arc::clone(&shutdown),
            config.interval,
        ));

        lifecycle.running = true;
        lifecycle.started_at = Some(Instant::now());
        lifecycle.shutdown = Some(shutdown);
        lifecycle.task = Some(task);
        info!(interval_ms = config.interval.as_millis() as u64, "printer discovery started");
    }

    /// Stop the schedule.  A cycle already in flight, scheduled or retry,
    /// finishes first; a probe retry still waiting out its delay is dropped.
    pub async fn stop(&self) {
        let (shutdown, task, retry) = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if !lifecycle.running {
                return;
            }
            lifecycle.running = false;
            lifecycle.started_at = None;
            (
                lifecycle.shutdown.take(),
                lifecycle.task.take(),
                lifecycle.retry.take(),
            )
        };

        if let Some(shutdown) = shutdown {
            shutdown.notify_one();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "discovery task ended abnormally");
            }
        }
        if let Some(retry) = retry {
            // With the cycle lock held the retry task is sleeping or waiting
            // for the lock, never inside a probe call.
            let _cycle = self.inner.cycle_lock.lock().await;
            retry.abort();
        }
        info!("printer discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.lifecycle).running
    }

    /// Run one probe-diff-update cycle now.
    ///
    /// On probe failure the error is returned to the caller after the
    /// failure has been counted, published and, if the policy allows and the
    /// engine is running, a retry scheduled.
    pub async fn perform_discovery(&self) -> Result<DiscoveryDelta> {
        perform_discovery(&self.inner).await
    }

    /// On-demand refresh outside the schedule.
    #[instrument(skip(self))]
    pub async fn force_discovery(&self) -> Result<DiscoveryDelta> {
        info!("forced printer discovery requested");
        self.perform_discovery().await
    }

    /// Merge `patch` into the configuration, restarting the schedule if it
    /// is running so the new interval and toggles take effect.
    pub async fn update_configuration(&self, patch: DiscoveryConfigPatch) -> Result<()> {
        let mut updated = self.inner.config().clone();
        patch.apply(&mut updated);
        updated.validate()?;

        let was_running = self.is_running();
        if was_running {
            self.stop().await;
        }
        *self.inner.config() = updated;
        info!("discovery configuration updated");
        if was_running {
            self.start();
        }
        Ok(())
    }

    pub fn config(&self) -> DiscoveryConfig {
        self.inner.config().clone()
    }

    /// Known printers, sorted by id.
    pub fn printers(&self) -> Vec<PrinterRecord> {
        lock(&self.inner.registry).snapshot()
    }

    pub fn printer(&self, id: &PrinterId) -> Option<PrinterRecord> {
        lock(&self.inner.registry).get(id).cloned()
    }

    pub fn health(&self) -> DiscoveryHealth {
        let interval = self.inner.config().interval;
        let started_at = {
            let lifecycle = lock(&self.inner.lifecycle);
            if !lifecycle.running {
                return DiscoveryHealth::Unhealthy;
            }
            lifecycle.started_at
        };

        // A success from before the latest start does not count against a
        // fresh run.
        let last_success = lock(&self.inner.counters).last_success;
        match last_success.max(started_at) {
            Some(reference) if reference.elapsed() > interval.saturating_mul(3) => {
                DiscoveryHealth::Degraded
            }
            _ => DiscoveryHealth::Healthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == DiscoveryHealth::Healthy
    }

    pub fn status(&self) -> DiscoveryStatus {
        let health = self.health();
        let running = self.is_running();
        let enabled = self.inner.config().enabled;
        let known_printers = lock(&self.inner.registry).len();
        let counters = lock(&self.inner.counters);
        DiscoveryStatus {
            running,
            enabled,
            known_printers,
            consecutive_failures: counters.consecutive_failures,
            last_cycle_at: counters.last_cycle_at,
            last_success_at: counters.last_success_at,
            health,
        }
    }

    pub fn statistics(&self) -> DiscoveryStatistics {
        let known_printers = lock(&self.inner.registry).len();
        let counters = lock(&self.inner.counters);
        DiscoveryStatistics {
            total_cycles: counters.total_cycles,
            successful_cycles: counters.successful_cycles,
            total_errors: counters.total_errors,
            printers_found: counters.printers_found,
            printers_lost: counters.printers_lost,
            last_duration: counters.durations.last(),
            average_duration: counters.durations.average(),
            known_printers,
        }
    }
}

impl Inner {
    fn config(&self) -> MutexGuard<'_, DiscoveryConfig> {
        lock(&self.config)
    }

    /// Probe, diff and publish.  Never schedules anything.
    async fn run_cycle(&self) -> std::result::Result<DiscoveryDelta, CycleFailure> {
        let _cycle = self.cycle_lock.lock().await;
        let config = self.config().clone();
        let options = config.probe_options();
        let started = Instant::now();

        let result = self.probe.find_printers(&options).await;
        let elapsed = started.elapsed();
        let now = Utc::now();

        match result {
            Ok(latest) => {
                let delta = lock(&self.registry).apply(latest, now);
                let known = lock(&self.registry).len();
                {
                    let mut counters = lock(&self.counters);
                    counters.total_cycles += 1;
                    counters.successful_cycles += 1;
                    counters.consecutive_failures = 0;
                    counters.printers_found += delta.new_printers.len() as u64;
                    counters.printers_lost += delta.lost_printers.len() as u64;
                    counters.last_cycle_at = Some(now);
                    counters.last_success_at = Some(now);
                    counters.last_success = Some(Instant::now());
                    counters.durations.record(elapsed);
                }
                self.publish_delta(&delta, known, elapsed, now);
                debug!(
                    known,
                    new = delta.new_printers.len(),
                    updated = delta.updated_printers.len(),
                    lost = delta.lost_printers.len(),
                    duration_ms = elapsed.as_millis() as u64,
                    "discovery cycle completed"
                );
                Ok(delta)
            }
            Err(e) => {
                let error = match e {
                    FleetError::Probe(_) => e,
                    other => FleetError::Probe(other.to_string()),
                };
                let consecutive_failures = {
                    let mut counters = lock(&self.counters);
                    counters.total_cycles += 1;
                    counters.total_errors += 1;
                    counters.consecutive_failures += 1;
                    counters.last_cycle_at = Some(now);
                    counters.durations.record(elapsed);
                    counters.consecutive_failures
                };

                let policy = RetryPolicy::fixed(config.max_retries, config.retry_delay);
                let retry_after = match policy.decide(consecutive_failures) {
                    RetryDecision::RetryAfter(delay) => Some(delay),
                    RetryDecision::Exhausted => None,
                };

                warn!(
                    error = %error,
                    consecutive_failures,
                    will_retry = retry_after.is_some(),
                    "printer discovery failed"
                );
                self.events.publish(FleetEvent::DiscoveryError {
                    error: error.to_string(),
                    consecutive_failures,
                    will_retry: retry_after.is_some(),
                });
                Err(CycleFailure { error, retry_after })
            }
        }
    }

    fn publish_delta(&self, delta: &DiscoveryDelta, known: usize, elapsed: Duration, now: DateTime<Utc>) {
        for printer in &delta.new_printers {
            info!(printer_id = %printer.id, name = %printer.name, "printer discovered");
            self.events.publish(FleetEvent::PrinterDiscovered {
                printer: printer.clone(),
            });
        }
        for update in &delta.updated_printers {
            info!(printer_id = %update.printer.id, changes = update.changes.len(), "printer changed");
            self.events.publish(FleetEvent::PrinterStatusChanged {
                printer: update.printer.clone(),
                changes: update.changes.clone(),
            });
        }
        for printer in &delta.lost_printers {
            info!(printer_id = %printer.id, name = %printer.name, "printer lost");
            self.events.publish(FleetEvent::PrinterLost {
                printer: printer.clone(),
            });
        }
        self.events.publish(FleetEvent::DiscoverySummary(DiscoverySummary {
            found: known,
            new: delta.new_printers.len(),
            updated: delta.updated_printers.len(),
            lost: delta.lost_printers.len(),
            duration_ms: elapsed.as_millis() as u64,
            completed_at: now,
        }));
    }

    /// Spawn the retry chain unless one is already pending or the engine is
    /// stopped.
    fn schedule_retry(self: &Arc<Self>, delay: Duration) {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.running {
            debug!("discovery stopped, not scheduling probe retry");
            return;
        }
        if lifecycle.retry.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("probe retry already pending");
            return;
        }
        lifecycle.retry = Some(tokio::spawn(run_retries(Arc::clone(self), delay)));
    }
}

async fn perform_discovery(inner: &Arc<Inner>) -> Result<DiscoveryDelta> {
    match inner.run_cycle().await {
        Ok(delta) => Ok(delta),
        Err(CycleFailure { error, retry_after }) => {
            if let Some(delay) = retry_after {
                inner.schedule_retry(delay);
            }
            Err(error)
        }
    }
}

/// Retry the probe until it succeeds or the policy gives up.
async fn run_retries(inner: Arc<Inner>, mut delay: Duration) {
    loop {
        tokio::time::sleep(delay).await;
        if !lock(&inner.lifecycle).running {
            debug!("discovery stopped, dropping probe retry");
            break;
        }
        debug!("retrying printer discovery");
        match inner.run_cycle().await {
            Ok(_) => break,
            Err(CycleFailure {
                retry_after: Some(next),
                ..
            }) => delay = next,
            Err(CycleFailure { retry_after: None, .. }) => break,
        }
    }
}

async fn run_schedule(inner: Arc<Inner>, shutdown: Arc<Notify>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("discovery loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = perform_discovery(&inner).await {
                    debug!(error = %e, "scheduled discovery cycle failed");
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
