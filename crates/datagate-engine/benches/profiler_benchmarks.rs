//! Benchmarks for batch loading, profiling and outlier detection
//!
//! These measure the per-run statistics cost on generated batches of
//! increasing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use datagate_core::{AnomalyConfig, RawTable};
use datagate_engine::{anomaly, loader, profiler};

/// Generate a raw table with N rows of mixed column types
fn generate_table(rows: usize) -> RawTable {
    let headers = vec![
        "Transaction ID".to_string(),
        "Amount".to_string(),
        "Quantity".to_string(),
        "Category".to_string(),
        "Created At".to_string(),
    ];

    let categories = ["books", "games", "music", "garden"];
    let rows = (0..rows)
        .map(|i| {
            // Every 97th amount is far out, every 13th category missing
            let amount = if i % 97 == 0 {
                10_000.0
            } else {
                10.0 + (i % 50) as f64 * 1.5
            };
            vec![
                Some(format!("tx-{}", i)),
                Some(format!("{:.2}", amount)),
                Some(((i * 7) % 20).to_string()),
                (i % 13 != 0).then(|| categories[i % categories.len()].to_string()),
                Some(format!("2024-05-{:02} 10:{:02}:00", 1 + i % 28, i % 60)),
            ]
        })
        .collect::<Vec<_>>();

    RawTable {
        headers,
        rows_seen: rows.len(),
        rows,
    }
}

/// Benchmark: type detection and batch construction
fn bench_build_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_batch");

    for rows in [1_000, 10_000, 50_000].iter() {
        let table = generate_table(*rows);
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| black_box(loader::build_batch(table.clone(), false)))
        });
    }

    group.finish();
}

/// Benchmark: numeric profiles and quality metrics
fn bench_profile(c: &mut Criterion) {
    let mut group = c.benchmark_group("profile");

    for rows in [1_000, 10_000, 50_000].iter() {
        let loaded = match loader::build_batch(generate_table(*rows), false) {
            Ok(loaded) => loaded,
            Err(e) => panic!("benchmark batch failed to load: {}", e),
        };
        let keys = vec!["transaction_id".to_string()];

        group.bench_with_input(BenchmarkId::new("stats", rows), rows, |b, _| {
            b.iter(|| black_box(profiler::profile(&loaded.batch)))
        });
        group.bench_with_input(BenchmarkId::new("quality", rows), rows, |b, _| {
            b.iter(|| black_box(profiler::quality_metrics(&loaded.batch, &keys)))
        });
    }

    group.finish();
}

/// Benchmark: outlier detection over every profiled column
fn bench_outliers(c: &mut Criterion) {
    let mut group = c.benchmark_group("outliers");
    let config = AnomalyConfig::default();

    for rows in [1_000, 10_000, 50_000].iter() {
        let loaded = match loader::build_batch(generate_table(*rows), false) {
            Ok(loaded) => loaded,
            Err(e) => panic!("benchmark batch failed to load: {}", e),
        };
        let stats = profiler::profile(&loaded.batch);

        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| {
                for (name, profile) in &stats {
                    if let Some(column) = loaded.batch.column(name) {
                        black_box(anomaly::detect_outliers(column, profile, &config));
                    }
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_batch, bench_profile, bench_outliers);

criterion_main!(benches);
