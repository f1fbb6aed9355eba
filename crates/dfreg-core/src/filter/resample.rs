//! Resample image filter.
//!
//! [`ResampleImageFilter`] resamples an image onto a new grid using a
//! transform and an interpolator.

use std::marker::PhantomData;
use burn::tensor::backend::Backend;
use crate::image::{Image, ImageGeometry};
use crate::transform::Transform;
use crate::interpolation::{inside_mask, Interpolator};

/// Resample image filter.
///
/// For every voxel of the output grid the filter takes its physical point,
/// maps it through the transform into the input image's physical space,
/// converts it to the input's continuous index and interpolates there.
///
/// The transform therefore maps Output Space -> Input Space (fixed to moving
/// for registration results). Samples that fall outside the input take the
/// default value (0 unless set with [`with_default_value`](Self::with_default_value)).
///
/// # Type Parameters
/// * `B` - The Burn backend
/// * `T` - The transform type
/// * `I` - The interpolator type
pub struct ResampleImageFilter<B, T, I>
where
    B: Backend,
    T: Transform<B, 3>,
    I: Interpolator<B>,
{
    output: ImageGeometry<3>,
    transform: T,
    interpolator: I,
    default_value: f32,
    _phantom: PhantomData<B>,
}

impl<B, T, I> ResampleImageFilter<B, T, I>
where
    B: Backend,
    T: Transform<B, 3>,
    I: Interpolator<B>,
{
    /// Create a new resample filter.
    ///
    /// # Arguments
    /// * `output` - Output grid
    /// * `transform` - Transform from output space to input space
    /// * `interpolator` - Interpolator for input image sampling
    pub fn new(output: ImageGeometry<3>, transform: T, interpolator: I) -> Self {
        Self {
            output,
            transform,
            interpolator,
            default_value: 0.0,
            _phantom: PhantomData,
        }
    }

    /// Create from a reference image, using its grid as the output grid.
    pub fn new_from_reference(reference: &Image<B, 3>, transform: T, interpolator: I) -> Self {
        Self::new(*reference.geometry(), transform, interpolator)
    }

    /// Value written where the mapped point falls outside the input grid.
    pub fn with_default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    pub fn output_geometry(&self) -> &ImageGeometry<3> {
        &self.output
    }

    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Apply filter to an input image.
    pub fn apply(&self, input: &Image<B, 3>) -> Image<B, 3> {
        let device = input.device();

        let output_points = self.output.physical_points::<B>(&device);
        let input_points = self.transform.transform_points(output_points);
        let input_indices = input.world_to_index_tensor(input_points);

        let [d, h, w] = input.shape();
        let inside = inside_mask(input_indices.clone(), [w, h, d]);
        let values = self.interpolator.interpolate(input.data(), input_indices);
        let outside = inside.clone().neg().add_scalar(1.0);
        let values = values * inside + outside.mul_scalar(self.default_value);
        Image::from_geometry(values.reshape(self.output.shape()), self.output)
    }
}
