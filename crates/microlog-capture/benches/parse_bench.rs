//! Parser throughput benchmarks.
//!
//! Measures single-line record parsing and whole-capture parsing at the
//! sizes a threads scenario and a network drain typically produce.

use criterion::{Criterion, criterion_group, criterion_main};
use microlog_capture::benchmark::parse_benchmark_lines;
use microlog_capture::record::{parse_line, parse_lines};

const HELLO: &str = "[16/10/26 12:34:56.789][DEBUG][pid:00006699][tid:0000139804000365][demo.cpp:056::msg_hello_world][hello world]";
const WORKER: &str = "[16/10/26 12:34:56.790][WARN ][pid:00006699][tid:0000139804000366][demo.cpp:044::worker_warn][world 0000139804000366]";

fn capture_of(lines: usize) -> String {
    let mut text = String::with_capacity(lines * (HELLO.len() + 1));
    for idx in 0..lines {
        text.push_str(if idx % 2 == 0 { HELLO } else { WORKER });
        text.push('\n');
    }
    text
}

fn bench_parse_line(c: &mut Criterion) {
    c.bench_function("parse_line", |b| {
        b.iter(|| {
            criterion::black_box(parse_line(criterion::black_box(HELLO), 1).ok());
        });
    });
}

fn bench_parse_capture(c: &mut Criterion) {
    let small = capture_of(16);
    let large = capture_of(4096);
    c.bench_function("parse_lines_16", |b| {
        b.iter(|| {
            criterion::black_box(parse_lines(&small).ok());
        });
    });
    c.bench_function("parse_lines_4096", |b| {
        b.iter(|| {
            criterion::black_box(parse_lines(&large).ok());
        });
    });
}

fn bench_parse_benchmark(c: &mut Criterion) {
    let text = "singlethread took: 402ms, size: 45350000, bandwidth: 108.31 MB/s\nmultithread took: 305ms, size: 90700000, bandwidth: 273.89 MB/s\n";
    c.bench_function("parse_benchmark_lines", |b| {
        b.iter(|| {
            criterion::black_box(parse_benchmark_lines(text).ok());
        });
    });
}

criterion_group!(
    benches,
    bench_parse_line,
    bench_parse_capture,
    bench_parse_benchmark
);
criterion_main!(benches);
