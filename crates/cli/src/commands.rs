use anyhow::{ensure, Context, Result};
use rayon::prelude::*;
use shapemodels_core::PointCloud;
use shapemodels_io::{read_indexed_pts, read_pts, write_pts};
use shapemodels_model::{
    load_model, observations_from_points, posterior, save_model, PdmBuildParams,
    PointDistributionModel,
};
use shapemodels_registration::{fit_icp, IcpParams};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::batch::{collect_inputs, run_batch, stem};
use crate::visualize::{Layer, LogVisualizer, PlySceneVisualizer, Visualizer};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub max_components: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PosteriorOptions {
    pub pdm: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub visualize: bool,
    pub samples: usize,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IcpOptions {
    pub pdm: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub visualize: bool,
    pub iterations: Option<usize>,
    pub convergence_threshold: Option<f64>,
    pub config: Option<PathBuf>,
}

/// Build a model from every `.pts` file in a directory and save it.
pub fn build(opts: &BuildOptions) -> Result<PointDistributionModel> {
    ensure!(
        opts.input.is_dir(),
        "training input {} is not a directory",
        opts.input.display()
    );
    let files = collect_inputs(&opts.input)?;
    let samples = files
        .par_iter()
        .map(|path| read_pts(path).map_err(anyhow::Error::from))
        .collect::<Result<Vec<PointCloud>>>()?;

    let params = PdmBuildParams {
        max_components: opts.max_components,
        ..PdmBuildParams::default()
    };
    let model = PointDistributionModel::from_training_set(&samples, &params)
        .context("cannot build model")?;
    save_model(&opts.output, &model)?;

    info!(
        samples = samples.len(),
        points = model.num_points(),
        rank = model.rank(),
        output = %opts.output.display(),
        "built model"
    );
    Ok(model)
}

/// Fit the posterior for every indexed observation file.
pub fn fit_posterior(opts: &PosteriorOptions) -> Result<usize> {
    let model = load_model(&opts.pdm)?;
    let files = collect_inputs(&opts.input)?;
    prepare_output(&opts.output)?;
    let visualizers = visualizers(opts.visualize, &opts.output);

    let report = run_batch(&files, |path| {
        let points = read_indexed_pts(path)?;
        let fitted = posterior(&model, &observations_from_points(&points))
            .with_context(|| format!("cannot fit {}", path.display()))?;

        let stem = stem(path);
        let mean = fitted.mean_instance();
        write_pts(opts.output.join(format!("{stem}_fitted_posterior.pts")), &mean)?;

        let mut rng = rand::thread_rng();
        let samples: Vec<PointCloud> = (0..opts.samples)
            .map(|k| match opts.seed {
                Some(seed) => fitted.sample_seeded(seed.wrapping_add(k as u64)),
                None => fitted.sample(&mut rng),
            })
            .collect();
        for (k, sample) in samples.iter().enumerate() {
            write_pts(opts.output.join(format!("{stem}_sample_{k}.pts")), sample)?;
        }

        info!(
            file = %path.display(),
            observations = points.len(),
            posterior_rank = fitted.rank(),
            samples = samples.len(),
            "fitted posterior"
        );

        let sample_labels: Vec<String> =
            (0..samples.len()).map(|k| format!("sample_{k}")).collect();
        let mut layers: Vec<Layer<'_>> = vec![("observations", &points.cloud), ("fitted", &mean)];
        layers.extend(sample_labels.iter().map(String::as_str).zip(samples.iter()));
        show_all(&visualizers, &stem, &layers)
    });

    report.into_result()
}

/// Fit the model to every plain point file with ICP.
pub fn fit_icp_batch(opts: &IcpOptions) -> Result<usize> {
    let model = load_model(&opts.pdm)?;
    let params = icp_params(opts)?;
    let files = collect_inputs(&opts.input)?;
    prepare_output(&opts.output)?;
    let visualizers = visualizers(opts.visualize, &opts.output);

    let report = run_batch(&files, |path| {
        let target = read_pts(path)?;
        let result = fit_icp(&model, &target, &params)
            .with_context(|| format!("cannot fit {}", path.display()))?;

        let stem = stem(path);
        write_pts(opts.output.join(format!("{stem}_fitted_icp.pts")), &result.shape)?;

        info!(
            file = %path.display(),
            tracked = result.tracked_ids.len(),
            rounds = result.num_iterations,
            termination = ?result.termination,
            final_energy = result.rounds.last().map(|r| r.energy),
            "fitted icp"
        );

        show_all(
            &visualizers,
            &stem,
            &[("target", &target), ("fitted", &result.shape)],
        )
    });

    report.into_result()
}

/// Parameters from the optional JSON config, overridden by explicit flags.
pub fn icp_params(opts: &IcpOptions) -> Result<IcpParams> {
    let mut params = match &opts.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => IcpParams::default(),
    };
    if let Some(iterations) = opts.iterations {
        params.iterations = iterations;
    }
    if opts.convergence_threshold.is_some() {
        params.convergence_threshold = opts.convergence_threshold;
    }
    Ok(params)
}

fn prepare_output(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))
}

fn visualizers(enabled: bool, output: &Path) -> Vec<Box<dyn Visualizer>> {
    if !enabled {
        return Vec::new();
    }
    vec![
        Box::new(LogVisualizer),
        Box::new(PlySceneVisualizer::new(output)),
    ]
}

fn show_all(visualizers: &[Box<dyn Visualizer>], stem: &str, layers: &[Layer<'_>]) -> Result<()> {
    for vis in visualizers {
        vis.show(stem, layers)?;
    }
    Ok(())
}
