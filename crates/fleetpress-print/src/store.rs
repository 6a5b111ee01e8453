// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job bookkeeping: per-printer queues plus the jobs that have left
// their queue.
//
// A job lives in exactly one place:
//   - its printer's queue while waiting to be dispatched, or
//   - the tracked set once dispatched (processing, waiting out a retry
//     backoff, or terminal) until `clear_terminal` drops it.
// `running` maps each busy printer to its single processing job.
//
// Nothing in here is async or locked; the dispatcher owns a `JobStore`
// behind a mutex and never holds it across an await point.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use fleetpress_core::types::{JobId, JobStatus, JobSummary, PrintJob, PrinterId};

use crate::retry::{RetryDecision, RetryPolicy};

/// Ordered queue of waiting jobs for one printer.
#[derive(Debug, Default)]
pub struct PrinterQueue {
    jobs: VecDeque<PrintJob>,
    paused: bool,
}

impl PrinterQueue {
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrintJob> {
        self.jobs.iter()
    }

    /// Insert before the first job with a numerically greater priority, so
    /// equal priorities keep arrival order.  Returns the position.
    fn insert_by_priority(&mut self, job: PrintJob) -> usize {
        let position = self
            .jobs
            .iter()
            .position(|queued| queued.priority > job.priority)
            .unwrap_or(self.jobs.len());
        self.jobs.insert(position, job);
        position
    }
}

/// Busy/idle state reported for a printer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Idle,
    Busy,
    Paused,
}

/// Report for one printer queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub printer_id: PrinterId,
    pub state: QueueState,
    pub paused: bool,
    pub queue_length: usize,
    pub active_job: Option<JobSummary>,
    pub next_jobs: Vec<JobSummary>,
}

/// What happened to a job whose attempt failed.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Job goes back to the front of its queue after `delay`.
    Retry { job: PrintJob, delay: Duration },
    /// Retries exhausted; the job is now `Failed`.
    Failed(PrintJob),
    /// The job is no longer processing (cancelled meanwhile); the outcome
    /// is discarded.
    Ignored,
}

/// Job totals since the store was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
}

#[derive(Debug, Default)]
pub struct JobStore {
    queues: BTreeMap<PrinterId, PrinterQueue>,
    running: HashMap<PrinterId, JobId>,
    tracked: HashMap<JobId, PrintJob>,
    counters: JobCounters,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job behind every job of equal or higher priority.  Creates
    /// the printer's queue on first use.  Returns the queue position.
    pub fn enqueue(&mut self, job: PrintJob) -> usize {
        self.queues
            .entry(job.printer_id.clone())
            .or_default()
            .insert_by_priority(job)
    }

    /// Pop the head of every unpaused, idle queue and mark it processing.
    ///
    /// The returned jobs are already registered as running, so a second
    /// call before they finish selects nothing for those printers.
    pub fn take_dispatchable(&mut self) -> Vec<PrintJob> {
        let now = Utc::now();
        let mut started = Vec::new();
        for (printer_id, queue) in self.queues.iter_mut() {
            if queue.paused || self.running.contains_key(printer_id) {
                continue;
            }
            let Some(mut job) = queue.jobs.pop_front() else {
                continue;
            };
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            self.running.insert(printer_id.clone(), job.id);
            self.tracked.insert(job.id, job.clone());
            started.push(job);
        }
        started
    }

    /// Record a successful attempt.  `None` if the job is not processing.
    pub fn complete(&mut self, job_id: &JobId, result: serde_json::Value) -> Option<PrintJob> {
        let job = self.tracked.get_mut(job_id)?;
        if job.status != JobStatus::Processing {
            return None;
        }
        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        job.result = Some(result);
        let job = job.clone();
        self.release(&job.printer_id, job_id);
        self.counters.completed += 1;
        Some(job)
    }

    /// Record a failed attempt and apply the retry policy.
    pub fn fail(&mut self, job_id: &JobId, error: &str, policy: &RetryPolicy) -> FailureOutcome {
        let Some(job) = self.tracked.get_mut(job_id) else {
            return FailureOutcome::Ignored;
        };
        if job.status != JobStatus::Processing {
            return FailureOutcome::Ignored;
        }

        let now = Utc::now();
        let printer_id = job.printer_id.clone();
        job.retries += 1;
        job.last_error = Some(error.to_owned());
        job.last_attempt_at = Some(now);

        let outcome = match policy.decide(job.retries) {
            RetryDecision::RetryAfter(delay) => {
                job.status = JobStatus::Queued;
                self.counters.retried += 1;
                FailureOutcome::Retry {
                    job: job.clone(),
                    delay,
                }
            }
            RetryDecision::Exhausted => {
                job.status = JobStatus::Failed;
                job.failed_at = Some(now);
                self.counters.failed += 1;
                FailureOutcome::Failed(job.clone())
            }
        };

        self.release(&printer_id, job_id);
        outcome
    }

    /// Put a job that finished its backoff back at the front of its queue.
    ///
    /// Returns false if the job was cancelled or cleared while waiting.
    pub fn requeue_after_backoff(&mut self, job_id: &JobId) -> bool {
        match self.tracked.get(job_id) {
            Some(job) if job.status == JobStatus::Queued => {}
            _ => return false,
        }
        let Some(job) = self.tracked.remove(job_id) else {
            return false;
        };
        self.queues
            .entry(job.printer_id.clone())
            .or_default()
            .jobs
            .push_front(job);
        true
    }

    /// Cancel a queued, retry-pending or processing job.
    ///
    /// Returns the cancelled job and whether it was processing, or `None`
    /// if the id is unknown or already terminal.
    pub fn cancel(&mut self, job_id: &JobId) -> Option<(PrintJob, bool)> {
        if let Some(job) = self.tracked.get_mut(job_id) {
            if job.status.is_terminal() {
                return None;
            }
            let was_processing = job.status == JobStatus::Processing;
            job.cancel();
            let job = job.clone();
            if was_processing {
                self.release(&job.printer_id, job_id);
            }
            self.counters.cancelled += 1;
            return Some((job, was_processing));
        }

        for queue in self.queues.values_mut() {
            if let Some(pos) = queue.jobs.iter().position(|j| j.id == *job_id) {
                let mut job = queue.jobs.remove(pos)?;
                job.cancel();
                self.tracked.insert(job.id, job.clone());
                self.counters.cancelled += 1;
                return Some((job, false));
            }
        }
        None
    }

    /// Cancel the processing job and every waiting job for one printer.
    pub fn cancel_printer(&mut self, printer_id: &PrinterId) -> Vec<(PrintJob, bool)> {
        let mut ids: Vec<JobId> = self
            .tracked
            .values()
            .filter(|j| j.printer_id == *printer_id && !j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        if let Some(queue) = self.queues.get(printer_id) {
            ids.extend(queue.jobs.iter().map(|j| j.id));
        }
        ids.iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Returns false if the pause flag already had that value.
    pub fn set_paused(&mut self, printer_id: &PrinterId, paused: bool) -> bool {
        let queue = self.queues.entry(printer_id.clone()).or_default();
        let changed = queue.paused != paused;
        queue.paused = paused;
        changed
    }

    /// Drop completed, failed and cancelled jobs from the tracked set.
    pub fn clear_terminal(&mut self) -> usize {
        let before = self.tracked.len();
        self.tracked.retain(|_, job| !job.status.is_terminal());
        before - self.tracked.len()
    }

    /// Cancel everything processing or waiting on a backoff and empty every
    /// queue.  Returns the cancelled jobs with whether each was processing,
    /// and the number of queued jobs discarded.
    pub fn shutdown(&mut self) -> (Vec<(PrintJob, bool)>, usize) {
        let ids: Vec<JobId> = self
            .tracked
            .values()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        let cancelled: Vec<_> = ids.iter().filter_map(|id| self.cancel(id)).collect();

        let mut discarded = 0;
        for queue in self.queues.values_mut() {
            discarded += queue.jobs.len();
            queue.jobs.clear();
        }
        self.running.clear();
        (cancelled, discarded)
    }

    /// Look a job up in the tracked set, then in every queue.
    pub fn job(&self, job_id: &JobId) -> Option<&PrintJob> {
        self.tracked.get(job_id).or_else(|| {
            self.queues
                .values()
                .flat_map(|q| q.jobs.iter())
                .find(|j| j.id == *job_id)
        })
    }

    pub fn queue(&self, printer_id: &PrinterId) -> Option<&PrinterQueue> {
        self.queues.get(printer_id)
    }

    pub fn running_job(&self, printer_id: &PrinterId) -> Option<&PrintJob> {
        self.running
            .get(printer_id)
            .and_then(|id| self.tracked.get(id))
    }

    pub fn queue_status(&self, printer_id: &PrinterId, preview: usize) -> Option<QueueStatus> {
        let queue = self.queues.get(printer_id)?;
        let active_job = self.running_job(printer_id).map(JobSummary::from);
        let state = if active_job.is_some() {
            QueueState::Busy
        } else if queue.paused {
            QueueState::Paused
        } else {
            QueueState::Idle
        };
        Some(QueueStatus {
            printer_id: printer_id.clone(),
            state,
            paused: queue.paused,
            queue_length: queue.jobs.len(),
            active_job,
            next_jobs: queue.jobs.iter().take(preview).map(JobSummary::from).collect(),
        })
    }

    /// Reports for every printer that has a queue, sorted by printer id.
    pub fn all_queue_statuses(&self, preview: usize) -> Vec<QueueStatus> {
        self.queues
            .keys()
            .filter_map(|id| self.queue_status(id, preview))
            .collect()
    }

    pub fn printer_count(&self) -> usize {
        self.queues.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queues.values().map(PrinterQueue::len).sum()
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    /// Jobs sitting out a retry backoff.
    pub fn retry_pending_count(&self) -> usize {
        self.tracked
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count()
    }

    pub fn counters(&self) -> JobCounters {
        self.counters
    }

    /// Free the printer's slot if `job_id` holds it.
    fn release(&mut self, printer_id: &PrinterId, job_id: &JobId) {
        if self.running.get(printer_id) == Some(job_id) {
            self.running.remove(printer_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    use fleetpress_core::types::{JobRequest, JobType, Priority};

    use super::*;

    fn job(printer: &str, priority: u8) -> PrintJob {
        PrintJob::new(JobRequest::new(printer, JobType::KitchenOrder, json!({})).with_priority(priority))
    }

    fn queued_ids(store: &JobStore, printer: &str) -> Vec<JobId> {
        store
            .queue(&printer.into())
            .map(|q| q.iter().map(|j| j.id).collect())
            .unwrap_or_default()
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::linear(max_retries, Duration::from_millis(100))
    }

    #[test]
    fn higher_priority_goes_first() {
        let mut store = JobStore::new();
        let urgent = job("P1", 1);
        let normal = job("P1", 5);
        let (urgent_id, normal_id) = (urgent.id, normal.id);

        store.enqueue(normal);
        assert_eq!(store.enqueue(urgent), 0);
        assert_eq!(queued_ids(&store, "P1"), vec![urgent_id, normal_id]);
    }

    #[test]
    fn equal_priority_keeps_arrival_order() {
        let mut store = JobStore::new();
        let jobs: Vec<_> = [5, 3, 5, 3, 10, 1].iter().map(|p| job("P1", *p)).collect();
        let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
        for j in jobs {
            store.enqueue(j);
        }
        assert_eq!(
            queued_ids(&store, "P1"),
            vec![ids[5], ids[1], ids[3], ids[0], ids[2], ids[4]]
        );
    }

    #[test]
    fn one_job_per_printer_is_dispatched() {
        let mut store = JobStore::new();
        store.enqueue(job("P1", 5));
        store.enqueue(job("P1", 5));
        store.enqueue(job("P2", 5));

        let started = store.take_dispatchable();
        assert_eq!(started.len(), 2);
        assert!(started.iter().all(|j| j.status == JobStatus::Processing));
        assert!(store.take_dispatchable().is_empty());
        assert_eq!(store.active_count(), 2);
        assert_eq!(store.queued_count(), 1);
    }

    #[test]
    fn paused_queue_is_skipped() {
        let mut store = JobStore::new();
        assert!(store.set_paused(&"P1".into(), true));
        assert!(!store.set_paused(&"P1".into(), true));
        store.enqueue(job("P1", 5));

        assert!(store.take_dispatchable().is_empty());
        store.set_paused(&"P1".into(), false);
        assert_eq!(store.take_dispatchable().len(), 1);
    }

    #[test]
    fn completion_frees_the_slot() {
        let mut store = JobStore::new();
        store.enqueue(job("P1", 5));
        store.enqueue(job("P1", 5));

        let first = store.take_dispatchable().remove(0);
        let done = store.complete(&first.id, json!({"bytes": 12})).expect("complete");
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
        assert_eq!(done.result, Some(json!({"bytes": 12})));

        assert_eq!(store.take_dispatchable().len(), 1);
        assert_eq!(store.counters().completed, 1);
    }

    #[test]
    fn failure_retries_then_fails() {
        let mut store = JobStore::new();
        let j = job("P1", 5);
        let id = j.id;
        store.enqueue(j);

        for attempt in 1..=2u32 {
            store.take_dispatchable();
            match store.fail(&id, "paper out", &policy(3)) {
                FailureOutcome::Retry { job, delay } => {
                    assert_eq!(job.retries, attempt);
                    assert_eq!(job.status, JobStatus::Queued);
                    assert_eq!(delay, Duration::from_millis(100 * attempt as u64));
                }
                other => panic!("expected retry, got {other:?}"),
            }
            assert_eq!(store.active_count(), 0);
            assert!(store.requeue_after_backoff(&id));
            assert_eq!(queued_ids(&store, "P1"), vec![id]);
        }

        store.take_dispatchable();
        match store.fail(&id, "paper out", &policy(3)) {
            FailureOutcome::Failed(job) => {
                assert_eq!(job.retries, 3);
                assert!(job.failed_at.is_some());
                assert_eq!(job.last_error.as_deref(), Some("paper out"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(store.job(&id).expect("tracked").status, JobStatus::Failed);
        assert!(matches!(store.fail(&id, "again", &policy(3)), FailureOutcome::Ignored));
        assert_eq!(store.counters().failed, 1);
        assert_eq!(store.counters().retried, 2);
    }

    #[test]
    fn retried_job_goes_to_the_front() {
        let mut store = JobStore::new();
        let first = job("P1", 5);
        let id = first.id;
        store.enqueue(first);
        store.take_dispatchable();

        let urgent = job("P1", 1);
        let urgent_id = urgent.id;
        store.enqueue(urgent);

        store.fail(&id, "timeout", &policy(3));
        store.requeue_after_backoff(&id);
        assert_eq!(queued_ids(&store, "P1"), vec![id, urgent_id]);
    }

    #[test]
    fn cancel_queued_restores_length() {
        let mut store = JobStore::new();
        store.enqueue(job("P1", 5));
        let before = store.queued_count();

        let j = job("P1", 5);
        let id = j.id;
        store.enqueue(j);
        let (cancelled, was_processing) = store.cancel(&id).expect("found");

        assert!(!was_processing);
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(store.queued_count(), before);
        assert_eq!(store.job(&id).expect("tracked").status, JobStatus::Cancelled);
        assert!(store.cancel(&id).is_none());
    }

    #[test]
    fn cancel_processing_frees_slot_and_drops_late_outcome() {
        let mut store = JobStore::new();
        let j = job("P1", 5);
        let id = j.id;
        store.enqueue(j);
        store.enqueue(job("P1", 5));
        store.take_dispatchable();

        let (_, was_processing) = store.cancel(&id).expect("found");
        assert!(was_processing);
        assert_eq!(store.active_count(), 0);

        let next = store.take_dispatchable();
        assert_eq!(next.len(), 1);
        assert!(store.complete(&id, json!(null)).is_none());
        assert_eq!(store.running_job(&"P1".into()).expect("running").id, next[0].id);
    }

    #[test]
    fn cancel_during_backoff_prevents_requeue() {
        let mut store = JobStore::new();
        let j = job("P1", 5);
        let id = j.id;
        store.enqueue(j);
        store.take_dispatchable();
        store.fail(&id, "timeout", &policy(3));

        assert!(store.cancel(&id).is_some());
        assert!(!store.requeue_after_backoff(&id));
        assert_eq!(store.queued_count(), 0);
    }

    #[test]
    fn cancel_printer_counts_active_and_queued() {
        let mut store = JobStore::new();
        for _ in 0..4 {
            store.enqueue(job("P1", 5));
        }
        store.enqueue(job("P2", 5));
        store.take_dispatchable();

        let cancelled = store.cancel_printer(&"P1".into());
        assert_eq!(cancelled.len(), 4);
        assert_eq!(cancelled.iter().filter(|(_, p)| *p).count(), 1);
        assert!(store.running_job(&"P1".into()).is_none());
        assert_eq!(store.queue(&"P1".into()).expect("queue").len(), 0);
        assert!(store.running_job(&"P2".into()).is_some());
    }

    #[test]
    fn clear_terminal_only_drops_finished_jobs() {
        let mut store = JobStore::new();
        store.enqueue(job("P1", 5));
        store.enqueue(job("P2", 5));
        let started = store.take_dispatchable();
        store.complete(&started[0].id, json!(null));

        assert_eq!(store.clear_terminal(), 1);
        assert!(store.job(&started[0].id).is_none());
        assert!(store.job(&started[1].id).is_some());
    }

    #[test]
    fn shutdown_cancels_active_and_clears_queues() {
        let mut store = JobStore::new();
        for _ in 0..3 {
            store.enqueue(job("P1", 5));
        }
        let active = store.take_dispatchable().remove(0);

        let (cancelled, discarded) = store.shutdown();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].0.id, active.id);
        assert!(cancelled[0].1);
        assert_eq!(discarded, 2);
        assert_eq!(store.queued_count(), 0);
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.job(&active.id).expect("tracked").status, JobStatus::Cancelled);
    }

    #[test]
    fn queue_status_reports_preview() {
        let mut store = JobStore::new();
        for p in [3, 1, 7, 5] {
            store.enqueue(job("P1", p));
        }
        let idle = store.queue_status(&"P1".into(), 2).expect("status");
        assert_eq!(idle.state, QueueState::Idle);
        assert_eq!(idle.queue_length, 4);
        assert_eq!(idle.next_jobs.len(), 2);
        assert_eq!(idle.next_jobs[0].priority, Priority::new(1));

        store.take_dispatchable();
        let busy = store.queue_status(&"P1".into(), 5).expect("status");
        assert_eq!(busy.state, QueueState::Busy);
        assert_eq!(busy.active_job.expect("active").priority, Priority::new(1));
        assert_eq!(busy.queue_length, 3);

        assert!(store.queue_status(&"nope".into(), 5).is_none());
    }

    /// Random add / cancel / dispatch / finish sequences never put two
    /// processing jobs on one printer and never break queue ordering.
    #[test]
    fn random_sequences_keep_invariants() {
        let printers = ["P1", "P2", "P3"];
        for seed in 0..50u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut store = JobStore::new();
            let mut arrival: HashMap<JobId, usize> = HashMap::new();
            let mut known: Vec<JobId> = Vec::new();

            for step in 0..300 {
                match rng.random_range(0..6) {
                    0 | 1 => {
                        let printer = printers[rng.random_range(0..printers.len())];
                        let j = job(printer, rng.random_range(1..=10));
                        arrival.insert(j.id, step);
                        known.push(j.id);
                        store.enqueue(j);
                    }
                    2 => {
                        if !known.is_empty() {
                            let id = known[rng.random_range(0..known.len())];
                            store.cancel(&id);
                        }
                    }
                    3 => {
                        store.take_dispatchable();
                    }
                    4 => {
                        let running: Vec<JobId> = printers
                            .iter()
                            .filter_map(|p| store.running_job(&(*p).into()).map(|j| j.id))
                            .collect();
                        for id in running {
                            if rng.random_bool(0.5) {
                                store.complete(&id, json!(null));
                            } else if let FailureOutcome::Retry { .. } =
                                store.fail(&id, "flaky", &policy(2))
                            {
                                store.requeue_after_backoff(&id);
                            }
                        }
                    }
                    _ => {
                        let printer = printers[rng.random_range(0..printers.len())];
                        store.set_paused(&printer.into(), rng.random_bool(0.3));
                    }
                }

                for printer in printers {
                    let pid: PrinterId = printer.into();
                    let processing = known
                        .iter()
                        .filter_map(|id| store.job(id))
                        .filter(|j| j.printer_id == pid && j.status == JobStatus::Processing)
                        .count();
                    assert!(processing <= 1, "seed {seed}: {processing} processing on {printer}");

                    if let Some(queue) = store.queue(&pid) {
                        let fresh: Vec<&PrintJob> = queue.iter().filter(|j| j.retries == 0).collect();
                        for pair in fresh.windows(2) {
                            let (a, b) = (pair[0], pair[1]);
                            assert!(a.priority <= b.priority, "seed {seed}: priority order");
                            if a.priority == b.priority {
                                assert!(arrival[&a.id] < arrival[&b.id], "seed {seed}: arrival order");
                            }
                        }
                    }
                }
            }
        }
    }
}
