//! Benchmarks for propagation through the graph.
//!
//! Run with: cargo bench -p cascade-core

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use cascade_core::reactive::{EventBus, Signal, Var};
use cascade_core::Owner;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_map_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/map_chain");

    for depth in [1, 10, 100] {
        let bus = EventBus::new();
        let mut stream = bus.stream();
        for _ in 0..depth {
            stream = stream.map(|x: &u64| x.wrapping_add(1));
        }
        let owner = Owner::new();
        let last = Rc::new(Cell::new(0));
        let sink = last.clone();
        stream.foreach(&owner, move |v| sink.set(*v));

        group.bench_with_input(BenchmarkId::new("emit", depth), &bus, |b, bus| {
            b.iter(|| bus.emit(black_box(1)))
        });
        black_box(last.get());
    }

    group.finish();
}

fn bench_combine_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/combine_all");

    for width in [2, 8, 32] {
        let vars: Vec<Var<u64>> = (0..width).map(Var::new).collect();
        let sum = Signal::combine_all(vars.iter().map(Var::signal).collect())
            .map(|values| values.iter().sum::<u64>());
        let owner = Owner::new();
        sum.foreach(&owner, |v| {
            black_box(*v);
        });

        group.bench_with_input(BenchmarkId::new("set_one", width), &vars, |b, vars| {
            let mut n = 0;
            b.iter(|| {
                n += 1;
                vars[0].set(black_box(n));
            })
        });
    }

    group.finish();
}

fn bench_diamond(c: &mut Criterion) {
    let source = Var::new(0u64);
    let left = source.signal().map(|x| x + 1);
    let right = source.signal().map(|x| x * 2);
    let joined = left.combine_with(&right, |a, b| a + b);
    let owner = Owner::new();
    joined.foreach(&owner, |v| {
        black_box(*v);
    });

    c.bench_function("propagation/diamond", |b| {
        let mut n = 0;
        b.iter(|| {
            n += 1;
            source.set(black_box(n));
        })
    });
}

criterion_group!(benches, bench_map_chain, bench_combine_fan_in, bench_diamond);
criterion_main!(benches);
