//! Core types for deformable volume registration.
//!
//! * [`image`]: volumes with physical geometry
//! * [`spatial`]: points, vectors, spacing and direction matrices
//! * [`transform`]: point transforms and dense displacement fields
//! * [`interpolation`]: sampling at continuous indices
//! * [`filter`]: smoothing, pyramids, resampling, histogram matching and warping

pub mod error;
pub mod image;
pub mod spatial;
pub mod transform;
pub mod interpolation;
pub mod filter;

pub use error::FilterError;
pub use image::{Image, ImageGeometry};
pub use spatial::{Point, Vector, Spacing, Direction};
pub use transform::DisplacementField;
