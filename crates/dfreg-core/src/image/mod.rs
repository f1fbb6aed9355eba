//! Volumes with physical metadata.
//!
//! [`Image`] couples a burn tensor with an [`ImageGeometry`] describing how
//! voxel indices map to physical coordinates.

pub mod image;
pub mod geometry;
pub mod grid;

pub use image::Image;
pub use geometry::ImageGeometry;
pub use grid::generate_grid_3d;
