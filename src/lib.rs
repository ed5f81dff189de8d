//! Statistical shape models for 3D point clouds.
//!
//! This facade re-exports the workspace crates so downstream users can depend
//! on a single package:
//!
//! - [`core`]: point cloud containers
//! - [`spatial`]: k-d tree nearest-neighbour queries
//! - [`io`]: `.pts` text formats and PLY scene output
//! - [`model`]: deformation fields, PDM construction and posterior fitting
//! - [`registration`]: non-rigid ICP against unordered targets
#![forbid(unsafe_code)]

pub use shapemodels_core as core;
pub use shapemodels_io as io;
pub use shapemodels_model as model;
pub use shapemodels_registration as registration;
pub use shapemodels_spatial as spatial;
