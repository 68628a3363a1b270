//! Result normalization benchmarks
//!
//! Measures turning driver rows into `RowResult`s for a few result shapes:
//! - narrow rows of integers
//! - wide rows with mixed types
//! - byte payloads that need text conversion
//! - results with a share of rows that fail to scan
//!
//! Run with: cargo bench --bench normalize_benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pgkeeper::driver::{RowCursor, SqlValue};
use pgkeeper::{normalize, Error, Result};

struct BenchCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Option<Vec<SqlValue>>>,
}

impl RowCursor for BenchCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<Result<Vec<SqlValue>>> {
        self.rows
            .next()
            .map(|row| row.ok_or_else(|| Error::Protocol("scan failed".into())))
    }
}

fn cursor(width: usize, rows: &[Option<Vec<SqlValue>>]) -> BenchCursor {
    BenchCursor {
        columns: (0..width).map(|i| format!("col_{}", i)).collect(),
        rows: rows.to_vec().into_iter(),
    }
}

fn narrow_rows(count: usize) -> Vec<Option<Vec<SqlValue>>> {
    (0..count)
        .map(|i| Some(vec![SqlValue::Int(i as i64), SqlValue::Int((i * 2) as i64)]))
        .collect()
}

fn wide_rows(count: usize) -> Vec<Option<Vec<SqlValue>>> {
    (0..count)
        .map(|i| {
            Some(vec![
                SqlValue::Int(i as i64),
                SqlValue::Text(format!("name-{}", i)),
                SqlValue::Bool(i % 2 == 0),
                SqlValue::Float(i as f64 * 0.5),
                SqlValue::Null,
                SqlValue::Text("constant".into()),
                SqlValue::Int(-(i as i64)),
                SqlValue::Bytes(format!("payload-{}", i).into_bytes()),
            ])
        })
        .collect()
}

fn byte_rows(count: usize) -> Vec<Option<Vec<SqlValue>>> {
    (0..count)
        .map(|i| Some(vec![SqlValue::Bytes(vec![b'a' + (i % 26) as u8; 256])]))
        .collect()
}

fn partly_failing_rows(count: usize) -> Vec<Option<Vec<SqlValue>>> {
    (0..count)
        .map(|i| (i % 10 != 0).then(|| vec![SqlValue::Int(i as i64), SqlValue::Null]))
        .collect()
}

fn shape_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    for row_count in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(row_count as u64));

        let narrow = narrow_rows(row_count);
        group.bench_with_input(BenchmarkId::new("narrow", row_count), &narrow, |b, rows| {
            b.iter(|| black_box(normalize(&mut cursor(2, rows))))
        });

        let wide = wide_rows(row_count);
        group.bench_with_input(BenchmarkId::new("wide", row_count), &wide, |b, rows| {
            b.iter(|| black_box(normalize(&mut cursor(8, rows))))
        });

        let bytes = byte_rows(row_count);
        group.bench_with_input(BenchmarkId::new("bytes", row_count), &bytes, |b, rows| {
            b.iter(|| black_box(normalize(&mut cursor(1, rows))))
        });
    }

    group.finish();
}

fn skip_benchmarks(c: &mut Criterion) {
    let rows = partly_failing_rows(10_000);
    c.bench_function("normalize/skip_10pct", |b| {
        b.iter(|| black_box(normalize(&mut cursor(2, &rows))))
    });
}

fn serialization_benchmarks(c: &mut Criterion) {
    let rows = wide_rows(1_000);
    let normalized = normalize(&mut cursor(8, &rows));
    c.bench_function("rows/to_json_1000", |b| {
        b.iter(|| black_box(serde_json::to_string(&normalized)))
    });
}

criterion_group!(
    benches,
    shape_benchmarks,
    skip_benchmarks,
    serialization_benchmarks
);
criterion_main!(benches);
