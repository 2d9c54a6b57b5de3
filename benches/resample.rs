use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use ekman::derived::{relative_vorticity, EarthModel};
use ekman::resample::resample;
use ekman::{Axis, FlatGrid, GridField, LinearAxis, Param, SampleDomain, SamplingMode, Unit};

fn domain(first: f64, step: f64, n: usize) -> Arc<SampleDomain> {
    Arc::new(
        SampleDomain::linear(
            vec![Axis::longitude(), Axis::latitude()],
            vec![LinearAxis::new(first, step, n), LinearAxis::new(-60.0, 120.0 / n as f64, n)],
        )
        .unwrap(),
    )
}

fn field(d: &Arc<SampleDomain>, name: &str) -> GridField {
    let values = (0..d.len())
        .map(|e| {
            let s = d.sample(e);
            (s[0].to_radians().sin() * s[1].to_radians().cos()) as f32
        })
        .collect();
    FlatGrid::scalar(d.clone(), Param::new(name, Unit::MeterPerSecond), values)
        .unwrap()
        .into()
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    for n in [64usize, 256] {
        let src = domain(0.0, 360.0 / n as f64, n);
        let dst = domain(0.3, 359.0 / n as f64, n);
        let f = field(&src, "t");
        for mode in [SamplingMode::NearestNeighbor, SamplingMode::WeightedAverage] {
            group.bench_with_input(BenchmarkId::new(format!("{:?}", mode), n), &n, |b, _| {
                b.iter(|| resample(black_box(&f), black_box(&dst), mode).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_vorticity(c: &mut Criterion) {
    let d = domain(0.0, 1.0, 128);
    let (u, v) = (field(&d, "u"), field(&d, "v"));
    let earth = EarthModel::default();
    c.bench_function("relative_vorticity_128", |b| {
        b.iter(|| relative_vorticity(black_box(&u), black_box(&v), &earth).unwrap())
    });
}

criterion_group!(benches, bench_resample, bench_vorticity);
criterion_main!(benches);
