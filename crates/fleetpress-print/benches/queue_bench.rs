// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for priority insertion, dispatch selection and
// registry diffing in the fleetpress-print crate.

use chrono::Utc;
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

use fleetpress_core::types::{
    ConnectionKind, JobRequest, JobType, PrintJob, PrinterRecord, PrinterStatus, PrinterType,
};
use fleetpress_print::registry::PrinterRegistry;
use fleetpress_print::store::JobStore;

fn random_jobs(count: usize, printers: usize, seed: u64) -> Vec<PrintJob> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let printer = format!("P{}", rng.random_range(0..printers));
            let request = JobRequest::new(printer.as_str(), JobType::Receipt, json!({"lines": 12}))
                .with_priority(rng.random_range(1..=10));
            PrintJob::new(request)
        })
        .collect()
}

/// Benchmark queueing 1000 jobs with random priorities onto one printer.
fn bench_enqueue(c: &mut Criterion) {
    let jobs = random_jobs(1000, 1, 7);

    c.bench_function("enqueue (1000 jobs, 1 printer)", |b| {
        b.iter_batched(
            || jobs.clone(),
            |jobs| {
                let mut store = JobStore::new();
                for job in jobs {
                    black_box(store.enqueue(job));
                }
                store
            },
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark one dispatch pass over 50 printers with 20 jobs each.
fn bench_take_dispatchable(c: &mut Criterion) {
    let jobs = random_jobs(1000, 50, 11);

    c.bench_function("take_dispatchable (50 printers)", |b| {
        b.iter_batched(
            || {
                let mut store = JobStore::new();
                for job in jobs.clone() {
                    store.enqueue(job);
                }
                store
            },
            |mut store| black_box(store.take_dispatchable()),
            BatchSize::SmallInput,
        );
    });
}

/// Benchmark diffing a 200-printer probe result where a tenth changed.
fn bench_registry_diff(c: &mut Criterion) {
    let printers: Vec<_> = (0..200)
        .map(|i| {
            PrinterRecord::new(
                format!("net-10.0.{}.{}-9100", i / 250, i % 250),
                format!("Printer {i}"),
                PrinterType::Thermal,
                ConnectionKind::Network,
            )
        })
        .collect();
    let mut registry = PrinterRegistry::new();
    registry.apply(printers.clone(), Utc::now());

    let latest: Vec<_> = printers
        .into_iter()
        .enumerate()
        .map(|(i, p)| if i % 10 == 0 { p.with_status(PrinterStatus::Offline) } else { p })
        .collect();

    c.bench_function("registry diff (200 printers)", |b| {
        b.iter(|| black_box(registry.diff(black_box(&latest))));
    });
}

criterion_group!(benches, bench_enqueue, bench_take_dispatchable, bench_registry_diff);
criterion_main!(benches);
