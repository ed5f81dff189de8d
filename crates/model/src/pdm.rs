use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use shapemodels_core::PointCloud;
use tracing::debug;

use crate::deformation::{build_deformation_field, mean_reference, DeformationField};
use crate::error::{ModelError, Result};

/// Parameters for PCA model construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdmBuildParams {
    /// Upper bound on the number of retained modes. `None` keeps every mode
    /// the data supports (at most `M - 1`).
    pub max_components: Option<usize>,
    /// Eigenvalues at or below `relative_tolerance` times the total energy
    /// of the centered training data are treated as zero. The energy is
    /// floored at machine epsilon times the uncentered energy.
    pub relative_tolerance: f64,
}

impl Default for PdmBuildParams {
    fn default() -> Self {
        Self {
            max_components: None,
            relative_tolerance: 1e-10,
        }
    }
}

/// A low-rank linear Gaussian model of shape variation.
///
/// Shapes are expressed as deformations of a fixed reference domain. With
/// standardized coefficients `α ~ N(0, I)` an instance is
///
/// ```text
/// reference + mean + basis · diag(√variances) · α
/// ```
///
/// The basis has orthonormal columns, one per retained mode, sorted by
/// descending variance.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDistributionModel {
    reference: PointCloud,
    mean: DVector<f64>,
    basis: DMatrix<f64>,
    variances: DVector<f64>,
}

/// Which side of the centred data matrix gets diagonalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Orientation {
    /// `M × M` Gram matrix `X Xᵀ`, used when samples are fewer than dimensions.
    Gram,
    /// `3N × 3N` scatter matrix `Xᵀ X`.
    Covariance,
}

impl PointDistributionModel {
    /// Build a model from a reference domain and training deformation fields.
    ///
    /// The rank is `min(M - 1, 3N)`, further reduced by `max_components` and
    /// by modes without variance. A single training field gives a rank-0
    /// model that can only reproduce its mean.
    pub fn build(
        reference: PointCloud,
        fields: &[DeformationField],
        params: &PdmBuildParams,
    ) -> Result<Self> {
        if fields.is_empty() {
            return Err(ModelError::InsufficientData);
        }
        let n = reference.len();
        if n == 0 {
            return Err(ModelError::EmptyReference);
        }
        for field in fields {
            if field.len() != n {
                return Err(ModelError::ShapeMismatch {
                    expected: n,
                    actual: field.len(),
                });
            }
        }

        let m = fields.len();
        let dim = 3 * n;

        let mut data = DMatrix::<f64>::zeros(m, dim);
        for (row, field) in fields.iter().enumerate() {
            data.row_mut(row).tr_copy_from(&field.flatten());
        }
        let raw_energy = data.norm_squared();
        let mean_row = data.row_mean();
        let mut centered = data;
        for mut row in centered.row_iter_mut() {
            row -= &mean_row;
        }
        let mean = mean_row.transpose();
        // Centering leaves rounding residue of order eps * |data|.
        let energy = centered.norm_squared().max(f64::EPSILON * raw_energy);

        let max_rank = (m - 1)
            .min(dim)
            .min(params.max_components.unwrap_or(usize::MAX));

        let orientation = if m <= dim {
            Orientation::Gram
        } else {
            Orientation::Covariance
        };

        let (basis, eigenvalues) = if max_rank == 0 {
            (DMatrix::zeros(dim, 0), Vec::new())
        } else {
            principal_modes(
                &centered,
                orientation,
                max_rank,
                params.relative_tolerance * energy,
            )
        };

        let dof = (m - 1) as f64;
        let variances =
            DVector::from_iterator(eigenvalues.len(), eigenvalues.iter().map(|l| l / dof));

        debug!(
            samples = m,
            points = n,
            rank = variances.len(),
            ?orientation,
            "built point distribution model"
        );

        Ok(Self {
            reference,
            mean,
            basis,
            variances,
        })
    }

    /// Build a model straight from corresponding training clouds.
    ///
    /// The reference domain is the per-index mean of the samples, and each
    /// sample contributes its deformation relative to that mean.
    pub fn from_training_set(samples: &[PointCloud], params: &PdmBuildParams) -> Result<Self> {
        let reference = mean_reference(samples)?;
        let fields = samples
            .iter()
            .map(|s| build_deformation_field(&reference, s))
            .collect::<Result<Vec<_>>>()?;
        Self::build(reference, &fields, params)
    }

    /// Assemble a model from already computed parts.
    ///
    /// # Panics
    ///
    /// Panics if the dimensions are inconsistent.
    pub(crate) fn from_parts(
        reference: PointCloud,
        mean: DVector<f64>,
        basis: DMatrix<f64>,
        variances: DVector<f64>,
    ) -> Self {
        assert_eq!(mean.len(), 3 * reference.len(), "mean must have 3N entries");
        assert_eq!(basis.nrows(), mean.len(), "basis must have 3N rows");
        assert_eq!(basis.ncols(), variances.len(), "one variance per basis column");
        Self {
            reference,
            mean,
            basis,
            variances,
        }
    }

    pub fn reference(&self) -> &PointCloud {
        &self.reference
    }

    pub fn num_points(&self) -> usize {
        self.reference.len()
    }

    /// Number of retained modes `K`.
    pub fn rank(&self) -> usize {
        self.variances.len()
    }

    /// Mean deformation, flattened.
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn mean_field(&self) -> DeformationField {
        DeformationField::from_flat(&self.mean)
    }

    /// `3N × K` matrix of orthonormal modes.
    pub fn basis(&self) -> &DMatrix<f64> {
        &self.basis
    }

    pub fn variances(&self) -> &DVector<f64> {
        &self.variances
    }

    pub fn standard_deviations(&self) -> DVector<f64> {
        self.variances.map(f64::sqrt)
    }

    /// Flattened deformation for standardized `coefficients`.
    ///
    /// # Panics
    ///
    /// Panics if `coefficients.len() != rank()`.
    pub fn deformation(&self, coefficients: &DVector<f64>) -> DVector<f64> {
        assert_eq!(coefficients.len(), self.rank(), "need one coefficient per mode");
        let scaled = coefficients.component_mul(&self.standard_deviations());
        &self.mean + &self.basis * scaled
    }

    /// Shape instance for standardized `coefficients`.
    pub fn instance(&self, coefficients: &DVector<f64>) -> PointCloud {
        DeformationField::from_flat(&self.deformation(coefficients)).warp(&self.reference)
    }

    pub fn mean_instance(&self) -> PointCloud {
        self.mean_field().warp(&self.reference)
    }

    /// Standardized coefficients of the model shape closest to `field`.
    ///
    /// # Panics
    ///
    /// Panics if the field does not cover the reference domain.
    pub fn project(&self, field: &DeformationField) -> DVector<f64> {
        assert_eq!(field.len(), self.num_points(), "field must cover the reference");
        let centered = field.flatten() - &self.mean;
        let raw = self.basis.tr_mul(&centered);
        raw.component_div(&self.standard_deviations())
    }

    /// Orthogonal projection of `field` onto the model's affine span.
    pub fn reconstruct(&self, field: &DeformationField) -> DeformationField {
        DeformationField::from_flat(&self.deformation(&self.project(field)))
    }

    /// Draw a random shape from the model.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PointCloud {
        let coefficients = DVector::from_iterator(
            self.rank(),
            (0..self.rank()).map(|_| rng.sample(StandardNormal)),
        );
        self.instance(&coefficients)
    }

    /// Draw a reproducible random shape.
    pub fn sample_seeded(&self, seed: u64) -> PointCloud {
        self.sample(&mut StdRng::seed_from_u64(seed))
    }

    /// Basis rows of point `id` scaled by the component standard deviations
    /// (a `3 × K` block).
    pub(crate) fn scaled_rows(&self, id: usize) -> DMatrix<f64> {
        let mut rows = self.basis.rows(3 * id, 3).into_owned();
        for (k, sd) in self.standard_deviations().iter().enumerate() {
            rows.column_mut(k).scale_mut(*sd);
        }
        rows
    }

    /// Position of point `id` under the mean deformation.
    pub(crate) fn mean_position(&self, id: usize) -> [f64; 3] {
        let p = self.reference.point(id);
        [
            p[0] + self.mean[3 * id],
            p[1] + self.mean[3 * id + 1],
            p[2] + self.mean[3 * id + 2],
        ]
    }
}

/// Eigen-decompose the smaller scatter matrix of `centered` and return the
/// unit-norm modes (as `3N`-dimensional columns) with their eigenvalues,
/// sorted descending.
fn principal_modes(
    centered: &DMatrix<f64>,
    orientation: Orientation,
    max_rank: usize,
    tolerance: f64,
) -> (DMatrix<f64>, Vec<f64>) {
    let scatter = match orientation {
        Orientation::Gram => centered * centered.transpose(),
        Orientation::Covariance => centered.tr_mul(centered),
    };
    let eigen = SymmetricEigen::new(scatter);

    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[b]
            .partial_cmp(&eigen.eigenvalues[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let kept: Vec<usize> = order
        .into_iter()
        .filter(|&i| eigen.eigenvalues[i] > tolerance)
        .take(max_rank)
        .collect();

    let dim = centered.ncols();
    let mut basis = DMatrix::<f64>::zeros(dim, kept.len());
    for (col, &i) in kept.iter().enumerate() {
        let mut mode = match orientation {
            Orientation::Gram => centered.tr_mul(&eigen.eigenvectors.column(i)),
            Orientation::Covariance => eigen.eigenvectors.column(i).into_owned(),
        };
        mode.normalize_mut();
        basis.set_column(col, &mode);
    }

    let eigenvalues = kept.iter().map(|&i| eigen.eigenvalues[i]).collect();
    (basis, eigenvalues)
}
