use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array1, Array2};
use optweights::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

fn make_split(n: usize, k: u32, seed: u64) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let groups: Vec<GroupLabel> = (0..n).map(|i| (i as u32 % k) + 1).collect();
    let x = Array2::from_shape_fn((n, 3), |_| rng.gen::<f64>() * 2.0 - 1.0);
    let y = Array1::from_shape_fn(n, |i| {
        let z = x[[i, 0]] - x[[i, 1]] + 0.2 * groups[i] as f64 - 0.5;
        if rng.gen::<f64>() < 1.0 / (1.0 + (-z).exp()) {
            1.0
        } else {
            0.0
        }
    });
    Dataset::new(x, y, groups).unwrap()
}

fn target(k: u32) -> BTreeMap<GroupLabel, f64> {
    (1..=k).map(|g| (g, 1.0 / k as f64)).collect()
}

fn bench_project(c: &mut Criterion) {
    let mut group = c.benchmark_group("project");
    for &k in &[10, 100, 1000, 10000] {
        let mut rng = StdRng::seed_from_u64(347);
        let v = Array1::from_shape_fn(k, |_| rng.gen::<f64>() * 2.0 - 0.5);
        group.throughput(Throughput::Elements(k as u64));
        group.bench_with_input(BenchmarkId::from_parameter(k), &v, |b, v| {
            b.iter(|| project(v).unwrap());
        });
    }
    group.finish();
}

fn bench_gradient(c: &mut Criterion) {
    let mut group = c.benchmark_group("implicit_gradient");
    for &n in &[100, 1000, 5000] {
        let train = make_split(n, 4, 1);
        let val = make_split(n / 2, 4, 2);
        let index = GroupIndex::new(1..=4);
        let positions = index.positions(train.groups()).unwrap();
        let mapper = WeightMapper::new(index, train.groups()).unwrap();
        let p = GroupWeights::uniform(4);
        let w = mapper.hard_weights(&p, &positions).unwrap();
        let mut model = WeightedLogisticRegression::new(0.01);
        model.fit(train.x(), train.y(), &w).unwrap();
        let w_val = Array1::ones(val.len());
        let engine = ImplicitGradientEngine::default();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| {
                let membership = Membership::Hard(&positions);
                engine
                    .gradient(&model, &train, membership, &mapper, &val, &w_val, &p)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    group.sample_size(10);
    for &n in &[200, 1000] {
        group.bench_function(BenchmarkId::from_parameter(n), |b| {
            b.iter(|| {
                let mut searcher = WeightSearcher::new(
                    make_split(n, 3, 3),
                    make_split(n / 2, 3, 4),
                    &target(3),
                    WeightedLogisticRegression::new(0.01),
                )
                .unwrap();
                searcher.optimize_weights(20, 0.1, 0.5, 5, None).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_project, bench_gradient, bench_search);
criterion_main!(benches);
