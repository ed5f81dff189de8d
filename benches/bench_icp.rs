use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shapemodels_core::PointCloud;
use shapemodels_model::{PdmBuildParams, PointDistributionModel};
use shapemodels_registration::{fit_icp, IcpParams};

/// `m` perturbed copies of a sphere sampled with `n` points.
fn training_set(m: usize, n: usize, seed: u64) -> Vec<PointCloud> {
    let mut rng = StdRng::seed_from_u64(seed);
    let golden = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..m)
        .map(|_| {
            let (sx, sy, sz) = (
                rng.gen_range(0.8..1.2),
                rng.gen_range(0.8..1.2),
                rng.gen_range(0.8..1.2),
            );
            let pts: Vec<[f64; 3]> = (0..n)
                .map(|i| {
                    let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                    let r = (1.0 - z * z).sqrt();
                    let t = golden * i as f64;
                    [sx * r * t.cos(), sy * r * t.sin(), sz * z]
                })
                .collect();
            PointCloud::from_points(&pts)
        })
        .collect()
}

fn bench_icp_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("icp_fit");
    let params = IcpParams {
        iterations: 10,
        ..IcpParams::default()
    };

    for size in [500, 2_000] {
        let shapes = training_set(20, size, 42);
        let pdm = PointDistributionModel::from_training_set(&shapes, &PdmBuildParams::default())
            .unwrap();
        let target = training_set(1, size, 7).remove(0);
        group.bench_with_input(BenchmarkId::new("shapemodels", size), &size, |b, _| {
            b.iter(|| fit_icp(&pdm, &target, &params).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_icp_fit);
criterion_main!(benches);
