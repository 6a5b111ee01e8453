// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Periodic print job dispatcher.
//
// Every tick pops the head of each unpaused, idle printer queue and hands it
// to the injected `Executor` in its own task, so a slow printer never holds
// up the others.  Failed attempts go back to the front of their queue after
// `retry_delay * retries` until `max_retries` failures, then the job is
// marked failed and stays queryable with its last error.
//
// Cancelling a processing job only updates bookkeeping; whatever the
// executor is doing on the wire is left to finish and its outcome is
// discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use fleetpress_core::config::DispatcherConfig;
use fleetpress_core::error::{FleetError, Result};
use fleetpress_core::events::FleetEvent;
use fleetpress_core::types::{JobId, JobRequest, PrintJob, PrinterId};

use crate::events::EventBus;
use crate::retry::RetryPolicy;
use crate::store::{FailureOutcome, JobStore, QueueStatus};

/// Performs the device communication for one job.
///
/// Returning `Err` counts as a failed attempt.  Implementations are not
/// required to stop early when a job is cancelled mid-flight.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &PrintJob) -> Result<serde_json::Value>;
}

/// Dispatcher totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatcherStatistics {
    /// Printers that have (or had) a queue.
    pub printers: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
    /// Jobs waiting out a retry backoff.
    pub retry_pending: usize,
    pub running: bool,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
}

#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    shutdown: Option<Arc<Notify>>,
    task: Option<JoinHandle<()>>,
    backoffs: Vec<JoinHandle<()>>,
}

struct Inner {
    executor: Arc<dyn Executor>,
    events: EventBus,
    config: DispatcherConfig,
    store: Mutex<JobStore>,
    lifecycle: Mutex<Lifecycle>,
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    executor: Option<Arc<dyn Executor>>,
    events: Option<EventBus>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Fails with [`FleetError::Configuration`] when no executor is wired or
    /// the configuration is invalid.
    pub fn build(self) -> Result<Dispatcher> {
        let executor = self.executor.ok_or_else(|| {
            FleetError::Configuration("dispatcher requires an executor".into())
        })?;
        self.config.validate()?;

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                executor,
                events: self.events.unwrap_or_default(),
                config: self.config,
                store: Mutex::new(JobStore::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }
}

/// Print job queue and dispatcher.  Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Queue a job and return its id.
    #[instrument(skip(self, request), fields(printer_id = %request.printer_id))]
    pub fn add_job(&self, request: JobRequest) -> Result<JobId> {
        if request.printer_id.as_str().trim().is_empty() {
            return Err(FleetError::InvalidJob("printer id must not be empty".into()));
        }

        let job = PrintJob::new(request);
        let (job_id, printer_id, priority) = (job.id, job.printer_id.clone(), job.priority);
        let position = self.inner.store().enqueue(job);

        info!(job_id = %job_id, priority = priority.value(), position, "job queued");
        self.inner.events.publish(FleetEvent::JobQueued {
            job_id,
            printer_id,
            priority,
            position,
        });
        Ok(job_id)
    }

    /// Start ticking every `tick_interval`, beginning immediately.  Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) {
        let mut lifecycle = lock(&self.inner.lifecycle);
        if lifecycle.running {
            debug!("dispatcher already running");
            return;
        }

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_ticks(
            Arc::clone(&self.inner),
            Arc::clone(&shutdown),
            self.inner.config.tick_interval,
        ));
        lifecycle.running = true;
        lifecycle.shutdown = Some(shutdown);
        lifecycle.task = Some(task);
        info!(
            tick_ms = self.inner.config.tick_interval.as_millis() as u64,
            "dispatcher started"
        );
    }

    /// Halt the tick loop, cancel every active or retry-pending job and
    /// empty all queues.  `job-cancelled` is published for each cancelled
    /// job; jobs still waiting in a queue are discarded without an event.
    pub async fn stop(&self) {
        let (shutdown, task, backoffs) = {
            let mut lifecycle = lock(&self.inner.lifecycle);
            lifecycle.running = false;
            (
                lifecycle.shutdown.take(),
                lifecycle.task.take(),
                std::mem::take(&mut lifecycle.backoffs),
            )
        };

        if let Some(shutdown) = shutdown {
            shutdown.notify_one();
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "dispatch task ended abnormally");
            }
        }
        for backoff in backoffs {
            backoff.abort();
        }

        let (cancelled, discarded) = self.inner.store().shutdown();
        for (job, was_processing) in &cancelled {
            self.inner.events.publish(FleetEvent::JobCancelled {
                job_id: job.id,
                printer_id: job.printer_id.clone(),
                was_processing: *was_processing,
            });
        }
        info!(
            cancelled = cancelled.len(),
            discarded, "dispatcher stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.lifecycle).running
    }

    /// Run one dispatch pass now.  Returns the number of jobs started.
    pub fn tick(&self) -> usize {
        dispatch_ready(&self.inner)
    }

    /// Cancel one job.  Returns false if it is unknown or already finished.
    #[instrument(skip(self))]
    pub fn cancel_job(&self, job_id: &JobId) -> bool {
        let cancelled = self.inner.store().cancel(job_id);
        match cancelled {
            Some((job, was_processing)) => {
                info!(printer_id = %job.printer_id, was_processing, "job cancelled");
                self.inner.events.publish(FleetEvent::JobCancelled {
                    job_id: job.id,
                    printer_id: job.printer_id,
                    was_processing,
                });
                true
            }
            None => {
                debug!("cancel requested for unknown or finished job");
                false
            }
        }
    }

    /// Cancel the active job and every waiting job of one printer.
    #[instrument(skip(self))]
    pub fn cancel_printer_jobs(&self, printer_id: &PrinterId) -> usize {
        let cancelled = self.inner.store().cancel_printer(printer_id);
        for (job, was_processing) in &cancelled {
            self.inner.events.publish(FleetEvent::JobCancelled {
                job_id: job.id,
                printer_id: job.printer_id.clone(),
                was_processing: *was_processing,
            });
        }
        info!(count = cancelled.len(), "printer jobs cancelled");
        cancelled.len()
    }

    /// Stop dispatching to a printer.  Queued jobs stay queued.
    pub fn pause_printer(&self, printer_id: &PrinterId) {
        let changed = self.inner.store().set_paused(printer_id, true);
        info!(printer_id = %printer_id, changed, "printer paused");
        self.inner.events.publish(FleetEvent::PrinterPaused {
            printer_id: printer_id.clone(),
        });
    }

    pub fn resume_printer(&self, printer_id: &PrinterId) {
        let changed = self.inner.store().set_paused(printer_id, false);
        info!(printer_id = %printer_id, changed, "printer resumed");
        self.inner.events.publish(FleetEvent::PrinterResumed {
            printer_id: printer_id.clone(),
        });
    }

    /// Forget completed, failed and cancelled jobs.  Returns how many.
    pub fn clear_completed_jobs(&self) -> usize {
        let count = self.inner.store().clear_terminal();
        info!(count, "finished jobs cleared");
        self.inner.events.publish(FleetEvent::JobsCleared { count });
        count
    }

    pub fn job_status(&self, job_id: &JobId) -> Option<PrintJob> {
        self.inner.store().job(job_id).cloned()
    }

    pub fn queue_status(&self, printer_id: &PrinterId) -> Option<QueueStatus> {
        self.inner
            .store()
            .queue_status(printer_id, self.inner.config.queue_preview)
    }

    pub fn all_queue_statuses(&self) -> Vec<QueueStatus> {
        self.inner
            .store()
            .all_queue_statuses(self.inner.config.queue_preview)
    }

    pub fn statistics(&self) -> DispatcherStatistics {
        let running = self.is_running();
        let store = self.inner.store();
        let counters = store.counters();
        DispatcherStatistics {
            printers: store.printer_count(),
            queued_jobs: store.queued_count(),
            active_jobs: store.active_count(),
            retry_pending: store.retry_pending_count(),
            running,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
            retried: counters.retried,
        }
    }
}

impl Inner {
    fn store(&self) -> MutexGuard<'_, JobStore> {
        lock(&self.store)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.config.max_retries, self.config.retry_delay)
    }

    fn finish(self: &Arc<Self>, job: &PrintJob, outcome: Result<serde_json::Value>) {
        match outcome {
            Ok(value) => {
                let completed = self.store().complete(&job.id, value);
                match completed {
                    Some(done) => {
                        info!(job_id = %done.id, printer_id = %done.printer_id, "job completed");
                        self.events.publish(FleetEvent::JobCompleted {
                            job_id: done.id,
                            printer_id: done.printer_id,
                        });
                    }
                    None => debug!(job_id = %job.id, "discarding outcome of cancelled job"),
                }
            }
            Err(e) => {
                let message = match e {
                    FleetError::Execution(detail) => detail,
                    other => other.to_string(),
                };
                let policy = self.retry_policy();
                let outcome = self.store().fail(&job.id, &message, &policy);
                match outcome {
                    FailureOutcome::Retry { job, delay } => {
                        warn!(
                            job_id = %job.id,
                            printer_id = %job.printer_id,
                            retries = job.retries,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "job failed, retrying"
                        );
                        self.events.publish(FleetEvent::JobRetry {
                            job_id: job.id,
                            printer_id: job.printer_id.clone(),
                            retries: job.retries,
                            delay_ms: delay.as_millis() as u64,
                            error: message,
                        });
                        self.schedule_requeue(job.id, delay);
                    }
                    FailureOutcome::Failed(job) => {
                        error!(
                            job_id = %job.id,
                            printer_id = %job.printer_id,
                            retries = job.retries,
                            error = %message,
                            "job failed permanently"
                        );
                        self.events.publish(FleetEvent::JobFailed {
                            job_id: job.id,
                            printer_id: job.printer_id,
                            retries: job.retries,
                            error: message,
                        });
                    }
                    FailureOutcome::Ignored => {
                        debug!(job_id = %job.id, "discarding failure of cancelled job");
                    }
                }
            }
        }
    }

    fn schedule_requeue(self: &Arc<Self>, job_id: JobId, delay: Duration) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.store().requeue_after_backoff(&job_id) {
                debug!(job_id = %job_id, "job requeued after backoff");
            }
        });
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.backoffs.retain(|h| !h.is_finished());
        lifecycle.backoffs.push(handle);
    }
}

fn dispatch_ready(inner: &Arc<Inner>) -> usize {
    let started = inner.store().take_dispatchable();
    for job in &started {
        debug!(job_id = %job.id, printer_id = %job.printer_id, attempt = job.retries + 1, "job started");
        inner.events.publish(FleetEvent::JobStarted {
            job_id: job.id,
            printer_id: job.printer_id.clone(),
            attempt: job.retries + 1,
        });
        tokio::spawn(execute(Arc::clone(inner), job.clone()));
    }
    started.len()
}

async fn execute(inner: Arc<Inner>, job: PrintJob) {
    let executor = Arc::clone(&inner.executor);
    let attempt = job.clone();
    // A panicking executor only fails this attempt.
    let outcome = match tokio::spawn(async move { executor.execute(&attempt).await }).await {
        Ok(outcome) => outcome,
        Err(e) => Err(FleetError::Execution(format!("executor task aborted: {e}"))),
    };
    inner.finish(&job, outcome);
}

async fn run_ticks(inner: Arc<Inner>, shutdown: Arc<Notify>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                debug!("dispatch loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                dispatch_ready(&inner);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
