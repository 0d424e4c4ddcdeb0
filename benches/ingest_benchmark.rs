//! Benchmarks for the ingestion and report paths.
//!
//! Ingestion runs on the DNS hot path and must stay an in-memory insert;
//! reports are measured over a full 30-day window.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use querystats::{Engine, EngineConfig, Entry, FilterResult, Unit};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BASE_HOUR: u32 = 480_000;

fn entries(n: usize) -> Vec<Entry> {
    (0..n)
        .map(|i| {
            let result = if i % 5 == 0 {
                FilterResult::Filtered
            } else {
                FilterResult::NotFiltered
            };
            Entry::new(
                format!("192.168.{}.{}", (i / 250) % 250, i % 250),
                format!("host{}.example.org", i % 2_000),
                result,
                Duration::from_micros(250),
            )
        })
        .collect()
}

fn bench_update(c: &mut Criterion) {
    let tmp_dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(EngineConfig {
        filename: tmp_dir.path().join("stats.db"),
        unit_id: Arc::new(|| BASE_HOUR),
        ..Default::default()
    })
    .unwrap();

    let batch = entries(10_000);
    let mut group = c.benchmark_group("ingest");

    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("update", "single"), |b| {
        let mut i = 0;
        b.iter(|| {
            engine.update(black_box(&batch[i % batch.len()]));
            i += 1;
        })
    });

    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("unit");

    for distinct in [100usize, 1_000, 10_000] {
        let mut unit = Unit::new(BASE_HOUR);
        for entry in entries(distinct) {
            unit.add(entry.result, &entry.domain, &entry.client, 250);
        }

        group.bench_with_input(BenchmarkId::new("serialize", distinct), &unit, |b, unit| {
            b.iter(|| black_box(unit.serialize()))
        });
    }

    group.finish();
}

fn bench_report(c: &mut Criterion) {
    let tmp_dir = tempfile::tempdir().unwrap();
    let hour = Arc::new(AtomicU32::new(BASE_HOUR));
    let clock = hour.clone();
    let engine = Engine::new(EngineConfig {
        filename: tmp_dir.path().join("stats.db"),
        retention_days: 30,
        unit_id: Arc::new(move || clock.load(Ordering::SeqCst)),
        ..Default::default()
    })
    .unwrap();

    let batch = entries(1_000);
    for _ in 0..720 {
        for entry in &batch {
            engine.update(entry);
        }
        hour.fetch_add(1, Ordering::SeqCst);
        engine.flush_step();
    }

    let mut group = c.benchmark_group("report");
    group.sample_size(20);
    group.bench_function(BenchmarkId::new("get_report", "30_days"), |b| {
        b.iter(|| black_box(engine.get_report(None).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_update, bench_serialize, bench_report);
criterion_main!(benches);
