use nalgebra::{DMatrix, DVector, Matrix3, SymmetricEigen};
use rand::Rng;
use shapemodels_core::{IndexedPoints, PointCloud};
use tracing::debug;

use crate::deformation::DeformationField;
use crate::error::{ModelError, Result};
use crate::pdm::PointDistributionModel;

/// Posterior eigenvalues at or below this fraction of the largest prior
/// variance are dropped from the posterior model.
const POSTERIOR_RELATIVE_TOLERANCE: f64 = 1e-10;

/// A noisy observation of where reference point `point_id` lies.
#[derive(Debug, Clone, PartialEq)]
pub struct PointObservation {
    pub point_id: usize,
    pub position: [f64; 3],
    /// Covariance of the observation noise. Must be symmetric positive definite.
    pub noise: Matrix3<f64>,
}

impl PointObservation {
    /// Observation with unit isotropic noise.
    pub fn new(point_id: usize, position: [f64; 3]) -> Self {
        Self::isotropic(point_id, position, 1.0)
    }

    pub fn isotropic(point_id: usize, position: [f64; 3], variance: f64) -> Self {
        Self::with_noise(point_id, position, Matrix3::identity() * variance)
    }

    pub fn with_noise(point_id: usize, position: [f64; 3], noise: Matrix3<f64>) -> Self {
        Self {
            point_id,
            position,
            noise,
        }
    }
}

/// One unit-noise observation per line of an indexed point file.
pub fn observations_from_points(points: &IndexedPoints) -> Vec<PointObservation> {
    points
        .iter()
        .map(|(id, p)| PointObservation::new(id, p))
        .collect()
}

/// Gaussian posterior over the standardized model coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientPosterior {
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
}

/// Which linear system the conditioning is solved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SolveSpace {
    /// `3m × 3m` system `Q Qᵀ + Σ`.
    Observation,
    /// `K × K` system `I + Qᵀ Σ⁻¹ Q`.
    Coefficient,
}

impl SolveSpace {
    fn smaller(rows: usize, rank: usize) -> Self {
        if rows <= rank {
            SolveSpace::Observation
        } else {
            SolveSpace::Coefficient
        }
    }
}

/// Condition the model coefficients on `observations`.
///
/// Observation `j` is modelled as
/// `position_j = reference[id] + mean[id] + Q_j · α + ε_j` with
/// `α ~ N(0, I)` and `ε_j ~ N(0, noise_j)`. The result is the exact Gaussian
/// posterior of `α`.
pub fn posterior_coefficients(
    model: &PointDistributionModel,
    observations: &[PointObservation],
) -> Result<CoefficientPosterior> {
    let space = SolveSpace::smaller(3 * observations.len(), model.rank());
    solve(model, observations, space)
}

/// Condition `model` on `observations` and return the posterior as a model
/// over the same reference domain.
pub fn posterior(
    model: &PointDistributionModel,
    observations: &[PointObservation],
) -> Result<PosteriorModel> {
    let coefficients = posterior_coefficients(model, observations)?;
    if model.rank() == 0 {
        return Ok(PosteriorModel {
            model: model.clone(),
            coefficients,
        });
    }

    let sd = model.standard_deviations();
    let k = model.rank();
    let c = &coefficients.covariance;
    let scaled = DMatrix::from_fn(k, k, |i, j| sd[i] * c[(i, j)] * sd[j]);
    let eigen = SymmetricEigen::new(scaled);

    let tolerance = POSTERIOR_RELATIVE_TOLERANCE * model.variances().max();
    let mut order: Vec<usize> = (0..k)
        .filter(|&i| eigen.eigenvalues[i] > tolerance)
        .collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut rotation = DMatrix::<f64>::zeros(k, order.len());
    for (col, &i) in order.iter().enumerate() {
        rotation.set_column(col, &eigen.eigenvectors.column(i));
    }
    let basis = model.basis() * rotation;
    let variances =
        DVector::from_iterator(order.len(), order.iter().map(|&i| eigen.eigenvalues[i]));
    let mean = model.deformation(&coefficients.mean);

    debug!(
        observations = observations.len(),
        prior_rank = k,
        posterior_rank = variances.len(),
        "conditioned model on observations"
    );

    Ok(PosteriorModel {
        model: PointDistributionModel::from_parts(
            model.reference().clone(),
            mean,
            basis,
            variances,
        ),
        coefficients,
    })
}

/// The conditional shape distribution given a set of observations.
///
/// It is itself a [`PointDistributionModel`] over the prior's reference
/// domain, so it can be sampled or conditioned again.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorModel {
    model: PointDistributionModel,
    coefficients: CoefficientPosterior,
}

impl PosteriorModel {
    pub fn model(&self) -> &PointDistributionModel {
        &self.model
    }

    pub fn into_model(self) -> PointDistributionModel {
        self.model
    }

    /// Posterior over the prior model's coefficients.
    pub fn coefficients(&self) -> &CoefficientPosterior {
        &self.coefficients
    }

    pub fn rank(&self) -> usize {
        self.model.rank()
    }

    pub fn mean_instance(&self) -> PointCloud {
        self.model.mean_instance()
    }

    pub fn mean_deformation(&self) -> DeformationField {
        self.model.mean_field()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PointCloud {
        self.model.sample(rng)
    }

    pub fn sample_seeded(&self, seed: u64) -> PointCloud {
        self.model.sample_seeded(seed)
    }
}

pub(crate) fn solve(
    model: &PointDistributionModel,
    observations: &[PointObservation],
    space: SolveSpace,
) -> Result<CoefficientPosterior> {
    if observations.is_empty() {
        return Err(ModelError::EmptyEvidence);
    }
    let num_points = model.num_points();
    for obs in observations {
        if obs.point_id >= num_points {
            return Err(ModelError::UnknownPointId {
                id: obs.point_id,
                num_points,
            });
        }
        if !obs.position.iter().all(|v| v.is_finite()) {
            return Err(ModelError::NonFiniteObservation { id: obs.point_id });
        }
    }
    let noise_factors = observations
        .iter()
        .map(noise_factor)
        .collect::<Result<Vec<_>>>()?;

    let k = model.rank();
    if k == 0 {
        return Ok(CoefficientPosterior {
            mean: DVector::zeros(0),
            covariance: DMatrix::zeros(0, 0),
        });
    }

    let posterior = match space {
        SolveSpace::Observation => solve_observation_space(model, observations)?,
        SolveSpace::Coefficient => solve_coefficient_space(model, observations, &noise_factors)?,
    };
    Ok(posterior)
}

/// Lower Cholesky factor of an observation's noise covariance.
fn noise_factor(obs: &PointObservation) -> Result<DMatrix<f64>> {
    let invalid = || ModelError::InvalidNoiseCovariance { id: obs.point_id };
    let noise = DMatrix::from_column_slice(3, 3, obs.noise.as_slice());
    if noise.iter().any(|v| !v.is_finite()) {
        return Err(invalid());
    }
    let asymmetry = (&noise - noise.transpose()).amax();
    if asymmetry > 1e-12 * noise.amax().max(1.0) {
        return Err(invalid());
    }
    noise.cholesky().map(|c| c.l()).ok_or_else(invalid)
}

/// Residual of an observation from the model mean at its point.
fn residual(model: &PointDistributionModel, obs: &PointObservation) -> [f64; 3] {
    let m = model.mean_position(obs.point_id);
    [
        obs.position[0] - m[0],
        obs.position[1] - m[1],
        obs.position[2] - m[2],
    ]
}

fn solve_coefficient_space(
    model: &PointDistributionModel,
    observations: &[PointObservation],
    noise_factors: &[DMatrix<f64>],
) -> Result<CoefficientPosterior> {
    let k = model.rank();
    let mut precision = DMatrix::<f64>::identity(k, k);
    let mut rhs = DVector::<f64>::zeros(k);

    for (obs, l) in observations.iter().zip(noise_factors) {
        let q = model.scaled_rows(obs.point_id);
        let y = DVector::from_row_slice(&residual(model, obs));
        let whitened_q = l
            .solve_lower_triangular(&q)
            .ok_or(ModelError::Numerical("singular noise factor"))?;
        let whitened_y = l
            .solve_lower_triangular(&y)
            .ok_or(ModelError::Numerical("singular noise factor"))?;
        precision += whitened_q.tr_mul(&whitened_q);
        rhs += whitened_q.tr_mul(&whitened_y);
    }

    let chol = precision
        .cholesky()
        .ok_or(ModelError::Numerical("posterior precision is not positive definite"))?;
    Ok(CoefficientPosterior {
        mean: chol.solve(&rhs),
        covariance: symmetrize(chol.inverse()),
    })
}

fn solve_observation_space(
    model: &PointDistributionModel,
    observations: &[PointObservation],
) -> Result<CoefficientPosterior> {
    let k = model.rank();
    let rows = 3 * observations.len();
    let mut q = DMatrix::<f64>::zeros(rows, k);
    let mut y = DVector::<f64>::zeros(rows);
    let mut system = DMatrix::<f64>::zeros(rows, rows);

    for (j, obs) in observations.iter().enumerate() {
        q.rows_mut(3 * j, 3).copy_from(&model.scaled_rows(obs.point_id));
        y.rows_mut(3 * j, 3).copy_from_slice(&residual(model, obs));
        system.fixed_view_mut::<3, 3>(3 * j, 3 * j).copy_from(&obs.noise);
    }
    system += &q * q.transpose();

    let chol = system
        .cholesky()
        .ok_or(ModelError::Numerical("observation system is not positive definite"))?;
    let mean = q.tr_mul(&chol.solve(&y));
    let covariance = DMatrix::identity(k, k) - q.tr_mul(&chol.solve(&q));
    Ok(CoefficientPosterior {
        mean,
        covariance: symmetrize(covariance),
    })
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}
