use shapemodels_model::ModelError;
use thiserror::Error;

/// Errors raised by model-based ICP fitting.
#[derive(Debug, Error)]
pub enum IcpError {
    #[error("target point cloud is empty")]
    EmptyTarget,

    /// The target must offer at least one point per tracked reference point.
    #[error("target has {available} points but {tracked} reference points are tracked")]
    InsufficientTargetPoints { tracked: usize, available: usize },

    #[error("tracked point id {id} is outside the reference domain of {num_points} points")]
    UnknownPointId { id: usize, num_points: usize },

    #[error("refit failed: {0}")]
    Posterior(#[from] ModelError),
}
