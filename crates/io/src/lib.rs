#![forbid(unsafe_code)]

pub mod error;
pub mod ply;
pub mod pts;

pub use error::{FieldSpec, PtsError};
pub use ply::{write_ply, write_ply_to};
pub use pts::{
    parse_indexed_pts, parse_pts, read_indexed_pts, read_pts, write_indexed_pts, write_pts,
};
