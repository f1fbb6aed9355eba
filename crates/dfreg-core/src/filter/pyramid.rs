use burn::tensor::backend::Backend;
use crate::image::Image;
use super::gaussian::GaussianFilter;
use super::downsample::DownsampleFilter;

/// Multi-resolution image pyramid.
///
/// Level 0 is the coarsest. Each level is the input smoothed with a Gaussian
/// (sigma in voxels of the input) and then subsampled by integer shrink
/// factors. A level with factor 1 and sigma 0 is the input itself.
pub struct MultiResolutionPyramid<B: Backend, const D: usize> {
    images: Vec<Image<B, D>>,
}

impl<B: Backend, const D: usize> MultiResolutionPyramid<B, D> {
    /// Create a pyramid from an input image and schedules.
    ///
    /// # Arguments
    /// * `input` - The original high-resolution image.
    /// * `shrink_factors` - Shrink factors for each level `[level][axis]`.
    /// * `smoothing_sigmas` - Smoothing sigmas in voxels for each level `[level][axis]`.
    ///
    /// # Panics
    /// Panics if schedules have different lengths.
    pub fn new(input: &Image<B, D>, shrink_factors: &[Vec<usize>], smoothing_sigmas: &[Vec<f64>]) -> Self {
        assert_eq!(shrink_factors.len(), smoothing_sigmas.len(), "Schedule lengths must match");

        let images = shrink_factors
            .iter()
            .zip(smoothing_sigmas.iter())
            .map(|(factors, sigmas)| Self::build_level(input, factors, sigmas))
            .collect();

        Self { images }
    }

    /// Pyramid with the power-of-two schedule of [`default_schedule`](Self::default_schedule).
    pub fn with_levels(input: &Image<B, D>, levels: usize) -> Self {
        let (factors, sigmas) = Self::default_schedule(levels);
        Self::new(input, &factors, &sigmas)
    }

    fn build_level(input: &Image<B, D>, factors: &[usize], sigmas: &[f64]) -> Image<B, D> {
        let identity_shrink = factors.iter().all(|&f| f <= 1);
        let identity_smooth = sigmas.iter().all(|&s| s <= 1e-6);

        let smoothed = if identity_smooth {
            input.clone()
        } else {
            GaussianFilter::in_voxels(sigmas.to_vec()).apply(input)
        };

        let level = if identity_shrink {
            smoothed
        } else {
            DownsampleFilter::new(factors.to_vec()).apply(&smoothed)
        };

        tracing::debug!(?factors, shape = ?level.shape(), "Built pyramid level");
        level
    }

    /// Get image at specific level.
    ///
    /// # Panics
    /// Panics if `level` is out of range.
    pub fn get_level(&self, level: usize) -> &Image<B, D> {
        &self.images[level]
    }

    /// Get number of levels.
    pub fn levels(&self) -> usize {
        self.images.len()
    }

    /// Finest level (the input resolution for default schedules).
    pub fn finest(&self) -> Option<&Image<B, D>> {
        self.images.last()
    }

    /// Create a default schedule for N levels with power-of-2 shrinking.
    ///
    /// Returns `(shrink_factors, smoothing_sigmas)`, coarsest first.
    /// E.g. `levels = 3` gives factors `[4, 2, 1]` and sigmas `[2.0, 1.0, 0.0]`.
    /// Factors saturate at `usize::MAX` for very deep pyramids.
    pub fn default_schedule(levels: usize) -> (Vec<Vec<usize>>, Vec<Vec<f64>>) {
        (0..levels)
            .map(|i| {
                let shift = u32::try_from(levels - 1 - i).unwrap_or(u32::MAX);
                let factor = 1usize.checked_shl(shift).unwrap_or(usize::MAX);
                let sigma = if factor > 1 { 0.5 * factor as f64 } else { 0.0 };
                (vec![factor; D], vec![sigma; D])
            })
            .unzip()
    }
}
