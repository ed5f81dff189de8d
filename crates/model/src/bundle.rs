//! JSON persistence for point distribution models.
//!
//! A bundle stores the reference domain, the mean deformation, the basis in
//! column-major order with its shape, and the per-mode variances. Dimensions
//! are validated on load so a bundle that deserializes is always usable.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use shapemodels_core::PointCloud;
use std::fs;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::Path;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::pdm::PointDistributionModel;

pub const FORMAT_VERSION: u32 = 1;

const ORTHONORMAL_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub reference: Vec<[f64; 3]>,
    pub mean: Vec<f64>,
    pub basis: MatrixData,
    pub variances: Vec<f64>,
}

/// Dense matrix payload, column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl From<&PointDistributionModel> for ModelBundle {
    fn from(model: &PointDistributionModel) -> Self {
        let basis = model.basis();
        Self {
            format_version: FORMAT_VERSION,
            reference: model.reference().to_points(),
            mean: model.mean().as_slice().to_vec(),
            basis: MatrixData {
                rows: basis.nrows(),
                cols: basis.ncols(),
                data: basis.as_slice().to_vec(),
            },
            variances: model.variances().as_slice().to_vec(),
        }
    }
}

impl ModelBundle {
    /// Check dimensions and values, returning a description of the first
    /// problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.format_version != FORMAT_VERSION {
            return Err(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                self.format_version
            ));
        }
        let n = self.reference.len();
        if n == 0 {
            return Err("reference domain is empty".into());
        }
        if self.mean.len() != 3 * n {
            return Err(format!(
                "mean has {} entries, expected {} for {n} points",
                self.mean.len(),
                3 * n
            ));
        }
        let b = &self.basis;
        if b.rows != 3 * n {
            return Err(format!("basis has {} rows, expected {}", b.rows, 3 * n));
        }
        if b.data.len() != b.rows * b.cols {
            return Err(format!(
                "basis data has {} entries, expected {} x {}",
                b.data.len(),
                b.rows,
                b.cols
            ));
        }
        if self.variances.len() != b.cols {
            return Err(format!(
                "{} variances for {} basis columns",
                self.variances.len(),
                b.cols
            ));
        }
        if self.variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err("variances must be finite and positive".into());
        }
        let finite = self.reference.iter().flatten().all(|v| v.is_finite())
            && self.mean.iter().all(|v| v.is_finite())
            && b.data.iter().all(|v| v.is_finite());
        if !finite {
            return Err("model contains non-finite values".into());
        }
        if self.variances.windows(2).any(|w| w[0] < w[1]) {
            return Err("variances must be sorted in descending order".into());
        }
        let basis = DMatrix::from_column_slice(b.rows, b.cols, &b.data);
        let gram = basis.tr_mul(&basis) - DMatrix::<f64>::identity(b.cols, b.cols);
        if b.cols > 0 && gram.amax() > ORTHONORMAL_TOLERANCE {
            return Err("basis columns are not orthonormal".into());
        }
        Ok(())
    }

    pub fn into_model(self) -> std::result::Result<PointDistributionModel, String> {
        self.validate()?;
        Ok(PointDistributionModel::from_parts(
            PointCloud::from_points(&self.reference),
            DVector::from_vec(self.mean),
            DMatrix::from_vec(self.basis.rows, self.basis.cols, self.basis.data),
            DVector::from_vec(self.variances),
        ))
    }
}

/// Write `model` as a JSON bundle.
pub fn save_model(path: impl AsRef<Path>, model: &PointDistributionModel) -> Result<()> {
    let path = path.as_ref();
    let fail = |reason: String| ModelError::ModelSave {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::create(path).map_err(|e| fail(e.to_string()))?;
    let mut w = BufWriter::new(file);
    serde_json::to_writer(&mut w, &ModelBundle::from(model)).map_err(|e| fail(e.to_string()))?;
    w.flush().map_err(|e| fail(e.to_string()))?;

    debug!(path = %path.display(), rank = model.rank(), "saved model");
    Ok(())
}

/// Read and validate a JSON bundle written by [`save_model`].
pub fn load_model(path: impl AsRef<Path>) -> Result<PointDistributionModel> {
    let path = path.as_ref();
    let fail = |reason: String| ModelError::ModelLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| fail(e.to_string()))?;
    let bundle: ModelBundle =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| fail(e.to_string()))?;
    let model = bundle.into_model().map_err(fail)?;

    debug!(
        path = %path.display(),
        points = model.num_points(),
        rank = model.rank(),
        "loaded model"
    );
    Ok(model)
}
