//! Benchmarks for the payload decoder and the Prometheus formatter.
//!
//! Both run on every cycle or scrape, so they are measured in isolation from
//! the async runtime.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use ruuvitag_exporter::{
    Measurement, MetricsRegistry, OutputFormatter, PrometheusFormatter, decode,
};
use std::time::Duration;

/// Full 24-byte data format 5 frame
fn v5_payload() -> Vec<u8> {
    vec![
        0x05, 0x12, 0xFC, 0x53, 0x94, 0xC3, 0x7C, 0x00, 0x04, 0xFF, 0xFC, 0x04, 0x0C, 0xAC, 0x36,
        0x42, 0x00, 0xCD, 0xCB, 0xB8, 0x33, 0x4C, 0x88, 0x4F,
    ]
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let full = v5_payload();
    group.bench_function("v5_full_frame", |b| {
        b.iter(|| black_box(decode(black_box(&full))))
    });

    let minimal = &full[..7];
    group.bench_function("v5_minimal", |b| {
        b.iter(|| black_box(decode(black_box(minimal))))
    });

    let unsupported = [0x03, 0x29, 0x1A, 0x1E, 0xCE, 0x1E];
    group.bench_function("unsupported_format", |b| {
        b.iter(|| black_box(decode(black_box(&unsupported))))
    });

    group.finish();
}

fn bench_format_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_snapshot");
    group.throughput(Throughput::Elements(1));
    let formatter = PrometheusFormatter::default();

    let empty = MetricsRegistry::new().snapshot();
    group.bench_function("empty_registry", |b| {
        b.iter(|| black_box(formatter.format(black_box(&empty))))
    });

    let registry = MetricsRegistry::new();
    for secs in 0..100 {
        registry.record_success(&Measurement {
            temperature: 24.3,
            humidity: 53.49,
            pressure: 1000.44,
        });
        registry.observe_duration(Duration::from_secs(secs));
    }
    let populated = registry.snapshot();
    group.bench_function("populated_registry", |b| {
        b.iter(|| black_box(formatter.format(black_box(&populated))))
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_format_snapshot);
criterion_main!(benches);
