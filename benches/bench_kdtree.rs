use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shapemodels_core::PointCloud;
use shapemodels_spatial::KdTree;

fn random_cloud(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..100.0)).collect();
    let y: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..100.0)).collect();
    let z: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..100.0)).collect();
    PointCloud::from_xyz(x, y, z)
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdtree_build");
    for size in [10_000, 100_000] {
        let cloud = random_cloud(size, 42);
        group.bench_with_input(BenchmarkId::new("shapemodels", size), &size, |b, _| {
            b.iter(|| KdTree::build(&cloud))
        });
    }
    group.finish();
}

fn bench_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("kdtree_nearest");
    for size in [100_000, 1_000_000] {
        let cloud = random_cloud(size, 42);
        let tree = KdTree::build(&cloud);
        // Fixed query point in the middle of the range
        let query = [50.0, 50.0, 50.0];
        group.bench_with_input(BenchmarkId::new("shapemodels", size), &size, |b, _| {
            b.iter(|| tree.nearest(&query))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_nearest);
criterion_main!(benches);
