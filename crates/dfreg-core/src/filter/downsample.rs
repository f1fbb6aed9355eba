use burn::tensor::{Int, Tensor};
use burn::tensor::backend::Backend;
use crate::image::Image;

/// Downsample filter.
///
/// Reduces the image size by integer factors by keeping every n-th voxel.
/// The first voxel is kept, so the origin is unchanged while the spacing
/// grows by the factor.
///
/// Factors are given per physical axis `(x, y, z)`; a single value applies to
/// every axis. A factor larger than the axis is capped at the axis size so no
/// dimension drops below one voxel.
pub struct DownsampleFilter<B: Backend> {
    factors: Vec<usize>,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> DownsampleFilter<B> {
    /// Create a new downsample filter.
    ///
    /// # Arguments
    /// * `factors` - Downsampling factor per physical axis (values below 1 act as 1).
    pub fn new(factors: Vec<usize>) -> Self {
        Self {
            factors,
            _b: std::marker::PhantomData,
        }
    }

    /// Factors actually applied to an image of the given tensor shape,
    /// in physical axis order.
    pub fn effective_factors<const D: usize>(&self, shape: [usize; D]) -> [usize; D] {
        let mut factors = [1usize; D];
        for (axis, factor) in factors.iter_mut().enumerate() {
            let requested = self.factors.get(axis).or(self.factors.first()).copied().unwrap_or(1).max(1);
            let size = shape[D - 1 - axis].max(1);
            if requested > size {
                tracing::warn!(axis, requested, size, "Capping shrink factor at axis size");
            }
            *factor = requested.min(size);
        }
        factors
    }

    /// Apply the filter to an image.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        let mut data = image.data().clone();
        let device = data.device();
        let shape = image.shape();
        let factors = self.effective_factors(shape);

        let mut spacing = *image.spacing();
        for tensor_axis in 0..D {
            let axis = D - 1 - tensor_axis;
            let factor = factors[axis];
            if factor <= 1 {
                continue;
            }

            let indices: Vec<i32> = (0..shape[tensor_axis]).step_by(factor).map(|i| i as i32).collect();
            let indices = Tensor::<B, 1, Int>::from_ints(indices.as_slice(), &device);
            data = data.select(tensor_axis, indices);
            spacing[axis] *= factor as f64;
        }

        Image::new(data, *image.origin(), spacing, *image.direction())
    }
}
