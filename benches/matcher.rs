//! Benchmarks `classify` against rule sets of increasing size, to track
//! how well the first-byte index keeps match time flat as the database
//! grows.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use magic_rules::{classify, load_database_str, Database};

fn sample_database(rule_count: usize) -> Database {
    let mut text = String::new();
    for i in 0..rule_count {
        // Each rule anchors on a distinct first byte so the index actually
        // partitions the set instead of bucketing everything together.
        let byte = (i % 256) as u8;
        text.push_str(&format!("0 byte {byte} rule_{i}\n"));
    }
    text.push_str("0 string MAGICTAIL tail_match\n");
    load_database_str(&text).0
}

fn bench_classify_by_database_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify_scales_with_rule_count");
    for &rule_count in &[10usize, 200, 2000] {
        let db = sample_database(rule_count);
        let mut buf = vec![0u8; 64];
        buf[0] = b'M';
        buf[1..10].copy_from_slice(b"MAGICTAIL");

        group.bench_with_input(BenchmarkId::from_parameter(rule_count), &db, |b, db| {
            b.iter(|| classify(black_box(db), black_box(&buf)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify_by_database_size);
criterion_main!(benches);
