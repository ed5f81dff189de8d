use shapemodels_core::{IndexedPoints, PointCloud};
use shapemodels_model::{
    observations_from_points, posterior, PdmBuildParams, PointDistributionModel,
};
use shapemodels_registration::{fit_icp, IcpParams};

fn ellipse(a: f64, b: f64, tilt: f64) -> PointCloud {
    let pts: Vec<[f64; 3]> = (0..24)
        .map(|i| {
            let t = i as f64 / 24.0 * std::f64::consts::TAU;
            [a * t.cos(), b * t.sin(), tilt * t.cos()]
        })
        .collect();
    PointCloud::from_points(&pts)
}

fn main() {
    // Training set: ellipses with varying axes and tilt
    let axes = [
        (1.0, 0.6, 0.0),
        (1.2, 0.5, 0.1),
        (0.9, 0.7, -0.05),
        (1.1, 0.65, 0.2),
    ];
    let shapes: Vec<PointCloud> = axes
        .iter()
        .map(|&(a, b, tilt)| ellipse(a, b, tilt))
        .collect();
    let pdm = PointDistributionModel::from_training_set(&shapes, &PdmBuildParams::default())
        .expect("training shapes correspond");
    println!("Model: {} points, rank {}", pdm.num_points(), pdm.rank());
    println!("Variances: {:?}", pdm.variances().as_slice());

    // Posterior from four observed points of an unseen shape
    let unseen = ellipse(1.15, 0.55, 0.12);
    let ids = vec![0, 6, 12, 18];
    let observed = IndexedPoints::new(ids.clone(), unseen.select(&ids));
    let post = posterior(&pdm, &observations_from_points(&observed)).expect("valid observations");
    println!(
        "Posterior: rank {}, max error {:.4}",
        post.rank(),
        post.mean_instance().max_point_distance(&unseen)
    );

    // ICP against the unordered target
    let params = IcpParams {
        iterations: 25,
        noise_variance: 0.01,
        convergence_threshold: Some(1e-6),
        ..IcpParams::default()
    };
    let result = fit_icp(&pdm, &unseen, &params).expect("non-empty target");
    println!(
        "ICP: {:?} after {} rounds, max error {:.4}",
        result.termination,
        result.num_iterations,
        result.shape.max_point_distance(&unseen)
    );
    if let Some(last) = result.rounds.last() {
        println!("Final energy: {:.6}", last.energy);
    }
}
