//! Benchmarks for plan compilation and trigger firing
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stepflow::{ConfigValue, Group, StepId, StepParams, TriggerId};

fn params(key: &str, value: f64) -> StepParams {
    StepParams::from([(key.to_string(), ConfigValue::Float(value))])
}

/// `constant -> gain -> gain -> ...`, registered tail first so the plan
/// has real ordering work to do.
fn chain(len: usize) -> (Group, TriggerId) {
    let group = Group::new("chain");
    let mut ids: Vec<StepId> = (0..len)
        .rev()
        .map(|i| {
            group
                .create_step(format!("g{}", i), "gain", &params("gain", 1.0001))
                .unwrap()
        })
        .collect();
    ids.reverse();
    let source = group
        .create_step("source", "constant", &params("value", 1.0))
        .unwrap();
    group.connect(source, "out", ids[0], "in").unwrap();
    for pair in ids.windows(2) {
        group.connect(pair[0], "out", pair[1], "in").unwrap();
    }
    let t = group.create_trigger("tick").unwrap();
    group.attach(t, source).unwrap();
    (group, t)
}

/// Wide fan-out: one source feeding `width` sums pairwise joined.
fn fan(width: usize) -> (Group, TriggerId) {
    let group = Group::new("fan");
    let source = group
        .create_step("source", "constant", &params("value", 2.0))
        .unwrap();
    let mut layer = Vec::with_capacity(width);
    for i in 0..width {
        let g = group
            .create_step(format!("g{}", i), "gain", &params("gain", i as f64))
            .unwrap();
        group.connect(source, "out", g, "in").unwrap();
        layer.push(g);
    }
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len() / 2 + 1);
        for pair in layer.chunks(2) {
            let sum = group
                .create_step(format!("s{}", group.step_count()), "sum", &StepParams::new())
                .unwrap();
            group.connect(pair[0], "out", sum, "a").unwrap();
            if let Some(&b) = pair.get(1) {
                group.connect(b, "out", sum, "b").unwrap();
            }
            next.push(sum);
        }
        layer = next;
    }
    let t = group.create_trigger("tick").unwrap();
    group.attach(t, source).unwrap();
    (group, t)
}

fn bench_plan_compile(c: &mut Criterion) {
    let mut bench = c.benchmark_group("plan_compile");

    for size in [10, 100, 1000].iter() {
        let (group, t) = chain(*size);
        bench.throughput(Throughput::Elements(*size as u64));
        let tail = group.step_id(&format!("g{}", size - 1)).unwrap();
        bench.bench_with_input(BenchmarkId::new("chain", size), size, |b, _| {
            b.iter(|| {
                // toggling a subscription invalidates the cached plan
                group.attach(t, tail).unwrap();
                group.detach(t, tail).unwrap();
                black_box(group.plan_of(t).unwrap())
            })
        });
    }

    bench.finish();
}

fn bench_fire(c: &mut Criterion) {
    let mut bench = c.benchmark_group("fire");

    for size in [10, 100, 1000].iter() {
        let (group, t) = chain(*size);
        group.fire(t).unwrap();
        bench.throughput(Throughput::Elements(*size as u64 + 1));
        bench.bench_with_input(BenchmarkId::new("chain", size), size, |b, _| {
            b.iter(|| black_box(group.fire(t).unwrap()))
        });
    }

    for width in [16, 256].iter() {
        let (group, t) = fan(*width);
        group.fire(t).unwrap();
        bench.throughput(Throughput::Elements(group.step_count() as u64));
        bench.bench_with_input(BenchmarkId::new("fan", width), width, |b, _| {
            b.iter(|| black_box(group.fire(t).unwrap()))
        });
    }

    bench.finish();
}

fn bench_compute(c: &mut Criterion) {
    let (group, _) = fan(64);
    c.bench_function("compute_fan_64", |b| {
        b.iter(|| black_box(group.compute(black_box(0.001))))
    });
}

criterion_group!(benches, bench_plan_compile, bench_fire, bench_compute);
criterion_main!(benches);
