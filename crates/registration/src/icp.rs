use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use shapemodels_core::PointCloud;
use shapemodels_model::{posterior_coefficients, PointDistributionModel, PointObservation};
use shapemodels_spatial::KdTree;
use tracing::debug;

use crate::correspondence::{
    compute_rmse, find_correspondences, nearest_reference_ids, total_squared_distance,
    Correspondence,
};
use crate::error::IcpError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpParams {
    /// Maximum number of correspondence/refit rounds.
    pub iterations: usize,
    /// Isotropic variance of each correspondence observation.
    pub noise_variance: f64,
    /// Stop early once no tracked point moves further than this in a round.
    pub convergence_threshold: Option<f64>,
    /// Reference points to track. Defaults to the reference point nearest to
    /// each target point.
    pub tracked_ids: Option<Vec<usize>>,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            iterations: 20,
            noise_variance: 1.0,
            convergence_threshold: None,
            tracked_ids: None,
        }
    }
}

/// How the fit loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    IterationBudgetExhausted,
}

/// Diagnostics of one correspondence/refit round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoundStats {
    /// Sum of squared correspondence distances before the refit.
    pub squared_distance: f64,
    /// `‖α‖² + Σ dist² / σ²` after the refit, against this round's
    /// correspondences. Never increases from one round to the next.
    pub energy: f64,
    /// Largest displacement of a tracked point caused by the refit.
    pub max_displacement: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IcpResult {
    pub shape: PointCloud,
    pub coefficients: DVector<f64>,
    pub termination: Termination,
    pub num_iterations: usize,
    pub rounds: Vec<RoundStats>,
    pub tracked_ids: Vec<usize>,
}

impl IcpResult {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Initialized,
    Correspondence,
    Refit(Vec<Correspondence>),
    Done(Termination),
}

/// Fits a point distribution model to an unordered target cloud.
///
/// Each round matches every tracked reference point of the current shape to
/// its nearest target point, then replaces the current shape with the
/// posterior mean of the model given those matches. Coefficients are always
/// conditioned from the prior, never accumulated.
#[derive(Debug)]
pub struct IcpFitter<'a> {
    model: &'a PointDistributionModel,
    target: &'a PointCloud,
    target_tree: KdTree,
    tracked_ids: Vec<usize>,
    noise_variance: f64,
    convergence_threshold: Option<f64>,
    remaining: usize,
    coefficients: DVector<f64>,
    current: PointCloud,
    rounds: Vec<RoundStats>,
    state: State,
}

impl<'a> IcpFitter<'a> {
    pub fn new(
        model: &'a PointDistributionModel,
        target: &'a PointCloud,
        params: &IcpParams,
    ) -> Result<Self, IcpError> {
        if target.is_empty() {
            return Err(IcpError::EmptyTarget);
        }

        let tracked_ids = match &params.tracked_ids {
            Some(ids) => {
                let num_points = model.num_points();
                if let Some(&id) = ids.iter().find(|&&id| id >= num_points) {
                    return Err(IcpError::UnknownPointId { id, num_points });
                }
                ids.clone()
            }
            None => nearest_reference_ids(model.reference(), target),
        };

        if target.len() < tracked_ids.len() {
            return Err(IcpError::InsufficientTargetPoints {
                tracked: tracked_ids.len(),
                available: target.len(),
            });
        }

        let coefficients = DVector::zeros(model.rank());
        let current = model.instance(&coefficients);

        Ok(Self {
            model,
            target,
            target_tree: KdTree::build(target),
            tracked_ids,
            noise_variance: params.noise_variance,
            convergence_threshold: params.convergence_threshold,
            remaining: params.iterations,
            coefficients,
            current,
            rounds: Vec::new(),
            state: State::Initialized,
        })
    }

    pub fn tracked_ids(&self) -> &[usize] {
        &self.tracked_ids
    }

    /// Shape after the last completed refit.
    pub fn current(&self) -> &PointCloud {
        &self.current
    }

    /// Advance the state machine by one transition.
    ///
    /// Returns `Ok(true)` while the fit is still running.
    pub fn step(&mut self) -> Result<bool, IcpError> {
        let state = std::mem::replace(&mut self.state, State::Initialized);
        self.state = match state {
            State::Initialized | State::Correspondence => {
                if self.remaining == 0 {
                    State::Done(Termination::IterationBudgetExhausted)
                } else {
                    self.remaining -= 1;
                    State::Refit(find_correspondences(
                        &self.current,
                        &self.tracked_ids,
                        &self.target_tree,
                    ))
                }
            }
            State::Refit(correspondences) => self.refit(&correspondences)?,
            done @ State::Done(_) => done,
        };
        Ok(!matches!(self.state, State::Done(_)))
    }

    /// Run to a terminal state.
    pub fn run(mut self) -> Result<IcpResult, IcpError> {
        while self.step()? {}

        let termination = match self.state {
            State::Done(t) => t,
            _ => Termination::IterationBudgetExhausted,
        };
        debug!(
            rounds = self.rounds.len(),
            ?termination,
            tracked = self.tracked_ids.len(),
            "icp fit finished"
        );

        Ok(IcpResult {
            shape: self.current,
            coefficients: self.coefficients,
            termination,
            num_iterations: self.rounds.len(),
            rounds: self.rounds,
            tracked_ids: self.tracked_ids,
        })
    }

    fn refit(&mut self, correspondences: &[Correspondence]) -> Result<State, IcpError> {
        let observations: Vec<PointObservation> = correspondences
            .iter()
            .map(|c| {
                PointObservation::isotropic(
                    c.point_id,
                    self.target.point(c.target_index),
                    self.noise_variance,
                )
            })
            .collect();

        let posterior = posterior_coefficients(self.model, &observations)?;
        let next = self.model.instance(&posterior.mean);

        let max_displacement = self
            .tracked_ids
            .iter()
            .map(|&id| distance(&next.point(id), &self.current.point(id)))
            .fold(0.0, f64::max);
        let residual: f64 = observations
            .iter()
            .map(|o| squared_distance(&next.point(o.point_id), &o.position))
            .sum();
        let stats = RoundStats {
            squared_distance: total_squared_distance(correspondences),
            energy: posterior.mean.norm_squared() + residual / self.noise_variance,
            max_displacement,
        };

        debug!(
            round = self.rounds.len() + 1,
            rmse = compute_rmse(correspondences),
            energy = stats.energy,
            max_displacement,
            "icp round"
        );

        self.rounds.push(stats);
        self.coefficients = posterior.mean;
        self.current = next;

        let converged = self
            .convergence_threshold
            .is_some_and(|threshold| max_displacement < threshold);
        Ok(if converged {
            State::Done(Termination::Converged)
        } else {
            State::Correspondence
        })
    }
}

/// Fit `model` to `target` with default state-machine driving.
pub fn fit_icp(
    model: &PointDistributionModel,
    target: &PointCloud,
    params: &IcpParams,
) -> Result<IcpResult, IcpError> {
    IcpFitter::new(model, target, params)?.run()
}

fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    squared_distance(a, b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use shapemodels_model::{ModelError, PdmBuildParams};

    /// Model of a 12-point ring whose radius and height vary.
    fn ring_model(m: usize, seed: u64) -> (PointDistributionModel, Vec<PointCloud>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let samples: Vec<PointCloud> = (0..m)
            .map(|_| {
                let radius = 1.0 + rng.gen_range(-0.05..0.05);
                let height = rng.gen_range(-0.1..0.1);
                let pts: Vec<[f64; 3]> = (0..12)
                    .map(|i| {
                        let t = i as f64 * std::f64::consts::TAU / 12.0;
                        [
                            radius * t.cos() + rng.gen_range(-0.01..0.01),
                            radius * t.sin() + rng.gen_range(-0.01..0.01),
                            height * t.cos(),
                        ]
                    })
                    .collect();
                PointCloud::from_points(&pts)
            })
            .collect();
        let pdm = PointDistributionModel::from_training_set(&samples, &PdmBuildParams::default())
            .unwrap();
        (pdm, samples)
    }

    #[test]
    fn zero_iterations_return_the_mean_shape() {
        let (pdm, samples) = ring_model(5, 1);
        let params = IcpParams {
            iterations: 0,
            ..IcpParams::default()
        };
        let result = fit_icp(&pdm, &samples[0], &params).unwrap();

        assert_eq!(result.shape, pdm.mean_instance());
        assert_eq!(result.num_iterations, 0);
        assert!(result.rounds.is_empty());
        assert_eq!(result.termination, Termination::IterationBudgetExhausted);
    }

    #[test]
    fn runs_exactly_the_iteration_budget_without_threshold() {
        let (pdm, samples) = ring_model(5, 2);
        let params = IcpParams {
            iterations: 7,
            ..IcpParams::default()
        };
        let result = fit_icp(&pdm, &samples[1], &params).unwrap();
        assert_eq!(result.num_iterations, 7);
        assert_eq!(result.rounds.len(), 7);
        assert!(!result.converged());
    }

    #[test]
    fn fits_a_training_shape_closely() {
        let (pdm, samples) = ring_model(8, 3);
        let target = &samples[4];
        let params = IcpParams {
            iterations: 10,
            noise_variance: 1e-6,
            ..IcpParams::default()
        };
        let result = fit_icp(&pdm, target, &params).unwrap();

        assert_eq!(result.tracked_ids, (0..12).collect::<Vec<_>>());
        let before = pdm.mean_instance().max_point_distance(target);
        let after = result.shape.max_point_distance(target);
        assert!(after < before, "fit did not improve: {before} -> {after}");
        assert!(after < 1e-2, "residual too large: {after}");
        let first = result.rounds.first().unwrap().squared_distance;
        let last = result.rounds.last().unwrap().squared_distance;
        assert!(last <= first);
    }

    #[test]
    fn convergence_threshold_stops_early() {
        let (pdm, samples) = ring_model(5, 4);
        let params = IcpParams {
            iterations: 500,
            convergence_threshold: Some(1e-6),
            ..IcpParams::default()
        };
        let result = fit_icp(&pdm, &samples[2], &params).unwrap();
        assert!(result.converged());
        assert!(result.num_iterations < 500);
        assert!(result.rounds.last().unwrap().max_displacement < 1e-6);
    }

    #[test]
    fn default_tracked_ids_follow_the_target() {
        let (pdm, samples) = ring_model(4, 5);
        let partial = samples[0].select(&[0, 1, 2, 3]);
        let fitter = IcpFitter::new(&pdm, &partial, &IcpParams::default()).unwrap();
        assert_eq!(
            fitter.tracked_ids(),
            nearest_reference_ids(pdm.reference(), &partial).as_slice()
        );
        assert!(fitter.tracked_ids().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn step_walks_through_states() {
        let (pdm, samples) = ring_model(4, 6);
        let params = IcpParams {
            iterations: 1,
            ..IcpParams::default()
        };
        let mut fitter = IcpFitter::new(&pdm, &samples[0], &params).unwrap();
        assert_eq!(fitter.current(), &pdm.mean_instance());

        assert!(fitter.step().unwrap()); // correspondence
        assert!(fitter.step().unwrap()); // refit
        assert!(!fitter.step().unwrap()); // budget exhausted
        assert!(!fitter.step().unwrap());
        let result = fitter.run().unwrap();
        assert_eq!(result.num_iterations, 1);
    }

    #[test]
    fn empty_target_is_rejected() {
        let (pdm, _) = ring_model(3, 7);
        let err = fit_icp(&pdm, &PointCloud::new(), &IcpParams::default()).unwrap_err();
        assert!(matches!(err, IcpError::EmptyTarget));
    }

    #[test]
    fn too_few_target_points_for_explicit_ids() {
        let (pdm, samples) = ring_model(3, 8);
        let params = IcpParams {
            tracked_ids: Some((0..12).collect()),
            ..IcpParams::default()
        };
        let target = samples[0].select(&[0, 5, 9]);
        let err = fit_icp(&pdm, &target, &params).unwrap_err();
        assert!(matches!(
            err,
            IcpError::InsufficientTargetPoints {
                tracked: 12,
                available: 3
            }
        ));
    }

    #[test]
    fn unknown_explicit_id_is_rejected() {
        let (pdm, samples) = ring_model(3, 9);
        let params = IcpParams {
            tracked_ids: Some(vec![1, 12]),
            ..IcpParams::default()
        };
        let err = fit_icp(&pdm, &samples[0], &params).unwrap_err();
        assert!(matches!(
            err,
            IcpError::UnknownPointId {
                id: 12,
                num_points: 12
            }
        ));
    }

    #[test]
    fn empty_explicit_ids_surface_the_posterior_error() {
        let (pdm, samples) = ring_model(3, 10);
        let params = IcpParams {
            tracked_ids: Some(Vec::new()),
            ..IcpParams::default()
        };
        let err = fit_icp(&pdm, &samples[0], &params).unwrap_err();
        assert!(matches!(err, IcpError::Posterior(ModelError::EmptyEvidence)));
    }

    #[test]
    fn params_load_from_partial_json() {
        let params: IcpParams =
            serde_json::from_str(r#"{ "iterations": 3, "convergence_threshold": 0.01 }"#).unwrap();
        assert_eq!(params.iterations, 3);
        assert_eq!(params.noise_variance, 1.0);
        assert_eq!(params.convergence_threshold, Some(0.01));
        assert_eq!(params.tracked_ids, None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn energy_never_increases(
            seed in 0u64..10_000,
            m in 3usize..8,
            noise_variance in 0.001f64..2.0,
            shift in -0.5f64..0.5,
        ) {
            let (pdm, samples) = ring_model(m, seed);
            let target = PointCloud::from_points(
                &samples[0]
                    .iter_points()
                    .map(|p| [p[0] + shift, p[1] - shift, p[2]])
                    .collect::<Vec<_>>(),
            );
            let params = IcpParams {
                iterations: 15,
                noise_variance,
                ..IcpParams::default()
            };
            let result = fit_icp(&pdm, &target, &params).unwrap();

            for w in result.rounds.windows(2) {
                let slack = 1e-9 * w[0].energy.abs().max(1.0);
                prop_assert!(
                    w[1].energy <= w[0].energy + slack,
                    "energy increased: {} -> {}",
                    w[0].energy,
                    w[1].energy
                );
            }
        }
    }
}
