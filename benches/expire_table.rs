use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use flowcache::ExpireTable;

fn bench_find_or_insert(c: &mut Criterion) {
    let table = ExpireTable::create(65_536, 16).unwrap();
    let keys: Vec<String> = (0..10_000).map(|i| format!("bench-key-{i}")).collect();
    let mut i = 0usize;
    c.bench_function("find_or_insert/steady", |b| {
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            let mut cell = table.find_or_insert(black_box(key.as_bytes()));
            cell[0] = cell[0].wrapping_add(1);
        })
    });
}

fn bench_find_hit(c: &mut Criterion) {
    let table = ExpireTable::create(65_536, 16).unwrap();
    let keys: Vec<String> = (0..10_000).map(|i| format!("bench-key-{i}")).collect();
    for key in &keys {
        table.find_or_insert(key.as_bytes());
    }
    let mut i = 0usize;
    c.bench_function("find/hit", |b| {
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(table.find(black_box(key.as_bytes())).is_some());
        })
    });
}

fn bench_overloaded_insert(c: &mut Criterion) {
    // A table far smaller than the key stream, so almost every insert
    // evicts. This is the steady-overload regime the table is built for.
    let table = ExpireTable::create(1_024, 16).unwrap();
    let keys: Vec<String> = (0..50_000).map(|i| format!("hot-{i}")).collect();
    let mut i = 0usize;
    c.bench_function("find_or_insert/overload", |b| {
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            table.find_or_insert(black_box(key.as_bytes()));
        })
    });
}

criterion_group!(
    benches,
    bench_find_or_insert,
    bench_find_hit,
    bench_overloaded_insert
);
criterion_main!(benches);
