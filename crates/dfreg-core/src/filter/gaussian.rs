use burn::tensor::{Int, Shape, Tensor};
use burn::tensor::backend::Backend;
use burn::tensor::ops::ConvOptions;
use crate::image::Image;
use crate::spatial::Spacing;

/// Units in which Gaussian standard deviations are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigmaUnits {
    /// Millimetres; converted to voxels with the image spacing.
    #[default]
    Physical,
    /// Voxels; spacing is ignored.
    Voxel,
}

/// Gaussian smoothing filter.
///
/// Applies separable 1D convolutions along each axis. Borders are handled by
/// replicating the edge voxel, so a constant volume stays constant.
///
/// Sigmas are given per physical axis `(x, y, z)`; a single value applies to
/// every axis.
pub struct GaussianFilter<B: Backend> {
    sigmas: Vec<f64>,
    units: SigmaUnits,
    max_kernel_width: usize,
    _b: std::marker::PhantomData<B>,
}

impl<B: Backend> GaussianFilter<B> {
    /// Create a filter with standard deviations in physical units (mm).
    pub fn new(sigmas: Vec<f64>) -> Self {
        Self {
            sigmas,
            units: SigmaUnits::Physical,
            max_kernel_width: 32,
            _b: std::marker::PhantomData,
        }
    }

    /// Create a filter with standard deviations in voxels.
    pub fn in_voxels(sigmas: Vec<f64>) -> Self {
        Self {
            units: SigmaUnits::Voxel,
            ..Self::new(sigmas)
        }
    }

    /// Set the maximum kernel width (radius * 2 + 1).
    pub fn with_max_kernel_width(mut self, width: usize) -> Self {
        self.max_kernel_width = width.max(1);
        self
    }

    pub fn units(&self) -> SigmaUnits {
        self.units
    }

    /// Apply the filter to an image.
    pub fn apply<const D: usize>(&self, image: &Image<B, D>) -> Image<B, D> {
        image.with_data(self.apply_tensor(image.data().clone(), image.spacing()))
    }

    /// Apply the filter to a tensor in `[D, H, W]` order.
    ///
    /// # Arguments
    /// * `input` - Input tensor
    /// * `spacing` - Physical spacing of the data, `(x, y, z)` order
    pub fn apply_tensor<const D: usize>(&self, input: Tensor<B, D>, spacing: &Spacing<D>) -> Tensor<B, D> {
        let mut data = input;
        let device = data.device();

        for tensor_axis in 0..D {
            let axis = D - 1 - tensor_axis;
            let sigma = self.sigmas.get(axis).or(self.sigmas.first()).copied().unwrap_or(0.0);
            if sigma <= 1e-6 {
                continue;
            }

            let voxel_sigma = match self.units {
                SigmaUnits::Physical => sigma / spacing[axis],
                SigmaUnits::Voxel => sigma,
            };
            let radius = (3.0 * voxel_sigma).ceil() as usize;
            let width = (2 * radius + 1).min(self.max_kernel_width);
            let radius = (width - 1) / 2;
            if radius == 0 {
                continue;
            }

            let kernel = Self::generate_kernel(voxel_sigma, radius);
            let kernel_tensor = Tensor::<B, 1>::from_floats(kernel.as_slice(), &device);
            data = Self::convolve_1d::<D>(data, kernel_tensor, tensor_axis);
        }
        data
    }

    fn generate_kernel(sigma: f64, radius: usize) -> Vec<f32> {
        let two_sigma2 = 2.0 * sigma * sigma;
        let values: Vec<f64> = (0..=2 * radius)
            .map(|i| {
                let x = i as f64 - radius as f64;
                (-x * x / two_sigma2).exp()
            })
            .collect();
        let sum: f64 = values.iter().sum();
        values.into_iter().map(|v| (v / sum) as f32).collect()
    }

    fn convolve_1d<const D: usize>(input: Tensor<B, D>, kernel: Tensor<B, 1>, dim: usize) -> Tensor<B, D> {
        let dims: [usize; D] = input.dims();
        let device = input.device();

        // Move the target axis last
        let mut permute_indices = [0isize; D];
        let mut idx = 0;
        for i in 0..D {
            if i != dim {
                permute_indices[idx] = i as isize;
                idx += 1;
            }
        }
        permute_indices[D - 1] = dim as isize;
        let permuted = input.permute(permute_indices);
        let permuted_dims: [usize; D] = permuted.dims();

        let length = dims[dim];
        let batch = dims.iter().product::<usize>() / length.max(1);

        let kernel_size = kernel.dims()[0];
        let radius = kernel_size / 2;

        // Replicate padding through a clamped index gather
        let padded_index: Vec<i32> = (0..length + 2 * radius)
            .map(|i| (i as i64 - radius as i64).clamp(0, length as i64 - 1) as i32)
            .collect();
        let padded_index = Tensor::<B, 1, Int>::from_ints(padded_index.as_slice(), &device);
        let padded = permuted.reshape([batch, 1, length]).select(2, padded_index);

        let output = burn::tensor::module::conv1d(
            padded,
            kernel.reshape([1, 1, kernel_size]),
            None,
            ConvOptions::new([1], [0], [1], 1),
        );

        let mut inverse = [0isize; D];
        for (new_pos, &old_pos) in permute_indices.iter().enumerate() {
            inverse[old_pos as usize] = new_pos as isize;
        }
        output.reshape(Shape::new(permuted_dims)).permute(inverse)
    }
}
