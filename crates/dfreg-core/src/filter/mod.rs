//! Image filters.
//!
//! Filters take images by reference and return new images; inputs are never
//! modified.

pub mod gaussian;
pub mod downsample;
pub mod pyramid;
pub mod resample;
pub mod histogram_matching;
pub mod warp;

pub use gaussian::{GaussianFilter, SigmaUnits};
pub use resample::ResampleImageFilter;
pub use pyramid::MultiResolutionPyramid;
pub use downsample::DownsampleFilter;
pub use histogram_matching::{HistogramMatchingFilter, IntensityStats, QuantileMapping};
pub use warp::WarpImageFilter;
