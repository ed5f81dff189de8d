use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, fitting or persisting a shape model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Point counts disagree where index correspondence is required.
    #[error("shape mismatch: expected {expected} points, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// No training samples were supplied.
    #[error("insufficient data: at least one training sample is required")]
    InsufficientData,

    #[error("reference domain has no points")]
    EmptyReference,

    /// Posterior fitting was called without observations.
    #[error("posterior fitting requires at least one observation")]
    EmptyEvidence,

    #[error("point id {id} is outside the reference domain of {num_points} points")]
    UnknownPointId { id: usize, num_points: usize },

    #[error("observed position at point id {id} is not finite")]
    NonFiniteObservation { id: usize },

    #[error("noise covariance at point id {id} is not symmetric positive definite")]
    InvalidNoiseCovariance { id: usize },

    /// A decomposition that must succeed on well-formed input did not.
    #[error("numerical failure: {0}")]
    Numerical(&'static str),

    #[error("failed to load model from {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("failed to save model to {}: {reason}", path.display())]
    ModelSave { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
