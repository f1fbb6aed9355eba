//! Spatial transforms.
//!
//! Transforms map points from an output (fixed) physical space into an
//! input (moving) physical space, which is the direction resampling needs.

pub mod trait_;
pub mod identity;
pub mod displacement_field;

pub use trait_::Transform;
pub use identity::IdentityTransform;
pub use displacement_field::{DisplacementField, DisplacementFieldTransform};
