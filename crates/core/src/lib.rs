#![forbid(unsafe_code)]

pub mod cloud;
pub mod indexed;

pub use cloud::{Colors, PointCloud};
pub use indexed::IndexedPoints;
