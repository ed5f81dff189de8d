//! Statistical shape models over a fixed reference domain.
//!
//! A [`PointDistributionModel`] is built by PCA over the deformation fields of
//! corresponding training shapes. It can be sampled, projected onto, and
//! conditioned on noisy point observations to give a [`PosteriorModel`].

pub mod bundle;
pub mod deformation;
pub mod error;
pub mod pdm;
pub mod posterior;

#[cfg(test)]
mod fixtures;

pub use bundle::{load_model, save_model, ModelBundle};
pub use deformation::{build_deformation_field, mean_reference, DeformationField};
pub use error::{ModelError, Result};
pub use pdm::{PdmBuildParams, PointDistributionModel};
pub use posterior::{
    observations_from_points, posterior, posterior_coefficients, CoefficientPosterior,
    PointObservation, PosteriorModel,
};
