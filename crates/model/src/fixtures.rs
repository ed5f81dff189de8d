//! Shared training data for unit tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shapemodels_core::PointCloud;

use crate::pdm::{PdmBuildParams, PointDistributionModel};

/// `m` noisy copies of an `n`-point helix.
pub(crate) fn training_set(m: usize, n: usize, seed: u64) -> Vec<PointCloud> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..m)
        .map(|_| {
            let pts: Vec<[f64; 3]> = (0..n)
                .map(|i| {
                    let t = i as f64 * 0.6;
                    [
                        t.cos() + rng.gen_range(-0.2..0.2),
                        t.sin() + rng.gen_range(-0.2..0.2),
                        0.3 * t + rng.gen_range(-0.2..0.2),
                    ]
                })
                .collect();
            PointCloud::from_points(&pts)
        })
        .collect()
}

pub(crate) fn helix_model(
    m: usize,
    n: usize,
    seed: u64,
) -> (PointDistributionModel, Vec<PointCloud>) {
    let samples = training_set(m, n, seed);
    let pdm = PointDistributionModel::from_training_set(&samples, &PdmBuildParams::default())
        .expect("helix training set is valid");
    (pdm, samples)
}
