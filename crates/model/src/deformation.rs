use nalgebra::DVector;
use shapemodels_core::PointCloud;

use crate::error::{ModelError, Result};

/// One displacement vector per reference point.
///
/// The flattened form used by the model stores component `d` of point `i`
/// at index `3 * i + d`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeformationField {
    vectors: Vec<[f64; 3]>,
}

impl DeformationField {
    pub fn new(vectors: Vec<[f64; 3]>) -> Self {
        Self { vectors }
    }

    pub fn zeros(num_points: usize) -> Self {
        Self {
            vectors: vec![[0.0; 3]; num_points],
        }
    }

    /// Rebuild a field from its flattened `3N` representation.
    ///
    /// # Panics
    ///
    /// Panics if the length is not a multiple of 3.
    pub fn from_flat(flat: &DVector<f64>) -> Self {
        assert_eq!(flat.len() % 3, 0, "flattened field must have 3N entries");
        let vectors = flat
            .as_slice()
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[[f64; 3]] {
        &self.vectors
    }

    pub fn flatten(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.vectors.len() * 3,
            self.vectors.iter().flat_map(|v| v.iter().copied()),
        )
    }

    /// Displace every reference point by its vector.
    ///
    /// # Panics
    ///
    /// Panics if the reference has a different number of points.
    pub fn warp(&self, reference: &PointCloud) -> PointCloud {
        assert_eq!(
            reference.len(),
            self.len(),
            "deformation field and reference must have the same length"
        );
        let points: Vec<[f64; 3]> = reference
            .iter_points()
            .zip(&self.vectors)
            .map(|(p, v)| [p[0] + v[0], p[1] + v[1], p[2] + v[2]])
            .collect();
        PointCloud::from_points(&points)
    }
}

/// Displacements taking each reference point onto the sample point with the
/// same index.
///
/// Correspondence is purely by index order; the clouds must have equal length.
pub fn build_deformation_field(
    reference: &PointCloud,
    sample: &PointCloud,
) -> Result<DeformationField> {
    if reference.len() != sample.len() {
        return Err(ModelError::ShapeMismatch {
            expected: reference.len(),
            actual: sample.len(),
        });
    }

    let vectors = reference
        .iter_points()
        .zip(sample.iter_points())
        .map(|(r, s)| [s[0] - r[0], s[1] - r[1], s[2] - r[2]])
        .collect();

    Ok(DeformationField::new(vectors))
}

/// Per-index arithmetic mean of a set of corresponding clouds.
///
/// This is the reference domain used for model building: point `i` of the
/// result is the average of point `i` over all samples.
pub fn mean_reference(samples: &[PointCloud]) -> Result<PointCloud> {
    let first = samples.first().ok_or(ModelError::InsufficientData)?;
    let n = first.len();
    if n == 0 {
        return Err(ModelError::EmptyReference);
    }

    let mut sum = vec![[0.0f64; 3]; n];
    for sample in samples {
        if sample.len() != n {
            return Err(ModelError::ShapeMismatch {
                expected: n,
                actual: sample.len(),
            });
        }
        for (acc, p) in sum.iter_mut().zip(sample.iter_points()) {
            acc[0] += p[0];
            acc[1] += p[1];
            acc[2] += p[2];
        }
    }

    let m = samples.len() as f64;
    let mean: Vec<[f64; 3]> = sum
        .into_iter()
        .map(|s| [s[0] / m, s[1] / m, s[2] / m])
        .collect();

    Ok(PointCloud::from_points(&mean))
}
