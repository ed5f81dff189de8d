#![forbid(unsafe_code)]

pub mod correspondence;
pub mod error;
pub mod icp;

pub use correspondence::{find_correspondences, nearest_reference_ids, Correspondence};
pub use error::IcpError;
pub use icp::{fit_icp, IcpFitter, IcpParams, IcpResult, RoundStats, Termination};
