// SPDX-License-Identifier: MIT
//! Benchmarks for bundle decoding, table export and stimulus sampling

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::io::Cursor;

use pmdat_reader::{metadata_table, read_trace, Bundle, FieldSelection, TraceInfo};

#[path = "../tests/test_fixtures.rs"]
mod test_fixtures;
use test_fixtures::{bundle_with_pulse, pulse_tree, stim_tree, TraceRecord};

fn traces(points: i32) -> Vec<TraceRecord> {
    (1..=4)
        .map(|count| TraceRecord {
            count,
            points,
            ..TraceRecord::default()
        })
        .collect()
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_bundle");
    for series in [10usize, 100, 1000] {
        let data = bundle_with_pulse(pulse_tree(series, &traces(0)), vec![0; 16]);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(series), &data, |b, data| {
            b.iter(|| Bundle::from_slice(black_box(data)).unwrap())
        });
    }
    group.finish();
}

fn benchmark_metadata_table(c: &mut Criterion) {
    let data = bundle_with_pulse(pulse_tree(200, &traces(0)), vec![0; 16]);
    let bundle = Bundle::from_slice(&data).unwrap();
    let selection = FieldSelection::default();

    c.bench_function("metadata_table_800_traces", |b| {
        b.iter(|| metadata_table(black_box(bundle.pulse_tree()), &selection, 4).unwrap())
    });
}

fn benchmark_read_trace(c: &mut Criterion) {
    const POINTS: i32 = 100_000;
    let probe = pulse_tree(1, &[TraceRecord::default()]);
    let raw_start = 256 + probe.len() + 24;
    let trace = TraceRecord {
        data: raw_start as i32,
        points: POINTS,
        ..TraceRecord::default()
    };
    let raw: Vec<u8> = (0..POINTS).flat_map(|i| (i as i16).to_ne_bytes()).collect();
    let data = bundle_with_pulse(pulse_tree(1, &[trace]), raw);
    let bundle = Bundle::from_slice(&data).unwrap();
    let record = bundle.pulse_tree().records().last().unwrap();
    let info = TraceInfo::from_record(&record).unwrap();

    let mut group = c.benchmark_group("read_trace");
    group.throughput(Throughput::Elements(POINTS as u64));
    group.bench_function("int16_100k", |b| {
        b.iter(|| read_trace(&mut Cursor::new(black_box(&data)), &info).unwrap())
    });
    group.finish();
}

fn benchmark_stimulus(c: &mut Criterion) {
    let stim = stim_tree(-0.07, &[(-0.07, 0.25), (0.02, 500.0), (-0.07, 0.25)]);
    let tree = pmdat_reader::Tree::from_buffer(pmdat_reader::TreeKind::Stimulus, stim).unwrap();
    let model = pmdat_reader::StimTree::from_tree(&tree).unwrap();
    let stimulation = model.stimulation(0).unwrap();

    c.bench_function("sample_stim_trace", |b| {
        b.iter(|| stimulation.sample_stim_trace(black_box(0)).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_decode,
    benchmark_metadata_table,
    benchmark_read_trace,
    benchmark_stimulus
);
criterion_main!(benches);
