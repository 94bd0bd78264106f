//! Benchmarks for value conversion on both transports' paths.
//!
//! Benchmark targets:
//! - Host encode of scalars and timestamps
//! - Decode of stored values into narrow host types
//! - Pipeline wire encoding of argument lists and response decoding

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;

use chrono::NaiveDate;
use sqlbridge::SqlValue;
use sqlbridge::http::decode_response;
use sqlbridge::value::{HostType, HostValue, decode, encode, to_json_args};

// ============================================================================
// Host Conversion Benchmarks
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.measurement_time(Duration::from_secs(5));

    let timestamp = NaiveDate::from_ymd_opt(2024, 2, 29)
        .and_then(|d| d.and_hms_milli_opt(13, 45, 7, 250))
        .map_or(HostValue::Null, HostValue::Timestamp);
    let samples = [
        ("int", HostValue::Int(42)),
        ("float", HostValue::Float(std::f64::consts::PI)),
        ("text", HostValue::Text("The quick brown fox".to_string())),
        ("bytes", HostValue::Bytes(vec![7; 256])),
        ("timestamp", timestamp),
    ];
    for (name, value) in &samples {
        group.bench_with_input(BenchmarkId::from_parameter(name), value, |b, value| {
            b.iter(|| encode(black_box(value)));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let integer = SqlValue::Integer(1_000);
    let text = SqlValue::Text("2024-02-29 13:45:07.250".to_string());
    group.bench_function("i16", |b| b.iter(|| decode(black_box(&integer), HostType::I16)));
    group.bench_function("timestamp", |b| {
        b.iter(|| decode(black_box(&text), HostType::Timestamp));
    });
    group.finish();
}

// ============================================================================
// Wire Benchmarks
// ============================================================================

fn bench_wire(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    for size in [1_usize, 16, 256] {
        let args: Vec<SqlValue> = (0..size)
            .map(|i| match i % 3 {
                0 => SqlValue::Integer(i64::try_from(i).unwrap_or_default()),
                1 => SqlValue::Text(format!("value-{i}")),
                _ => SqlValue::Blob(vec![0xAB; 32]),
            })
            .collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_args", size), &args, |b, args| {
            b.iter(|| to_json_args(black_box(args)).map(|wire| serde_json::to_string(&wire)));
        });
    }

    let rows: Vec<String> = (0..100)
        .map(|i| format!(r#"[{{"type":"integer","value":"{i}"}},{{"type":"text","value":"row {i}"}}]"#))
        .collect();
    let body = format!(
        r#"{{"results":[{{"type":"ok","response":{{"type":"execute","result":{{"cols":[{{"name":"id"}},{{"name":"name"}}],"rows":[{}],"affected_row_count":0,"last_insert_rowid":null}}}}}},{{"type":"ok","response":{{"type":"close"}}}}]}}"#,
        rows.join(",")
    );
    group.bench_function("decode_response_100_rows", |b| {
        b.iter(|| decode_response(200, black_box(&body)));
    });
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_wire);
criterion_main!(benches);
