//! Sampling of voxel data at continuous indices.

pub mod trait_;
pub mod linear;
pub mod nearest;

pub use trait_::{inside_mask, Interpolator};
pub use linear::LinearInterpolator;
pub use nearest::NearestNeighborInterpolator;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

/// Interpolation policy selectable at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    /// Trilinear interpolation.
    #[default]
    Linear,
    /// Nearest voxel value.
    NearestNeighbor,
}

impl<B: Backend> Interpolator<B> for Interpolation {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        match self {
            Interpolation::Linear => LinearInterpolator.interpolate(data, indices),
            Interpolation::NearestNeighbor => NearestNeighborInterpolator.interpolate(data, indices),
        }
    }
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Interpolation::Linear),
            "nearest" | "nearest_neighbor" => Ok(Interpolation::NearestNeighbor),
            other => Err(format!("unknown interpolation '{other}', expected 'linear' or 'nearest'")),
        }
    }
}
