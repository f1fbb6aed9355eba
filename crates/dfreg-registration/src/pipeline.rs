//! End-to-end deformable registration.
//!
//! Normalises intensities, builds pyramids, runs the multi-resolution
//! Demons scheduler and warps the original moving volume onto the fixed grid.

use burn::tensor::backend::Backend;
use dfreg_core::filter::{MultiResolutionPyramid, ResampleImageFilter, WarpImageFilter};
use dfreg_core::image::Image;
use dfreg_core::interpolation::LinearInterpolator;
use dfreg_core::transform::{DisplacementField, IdentityTransform};
use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, Result};
use crate::multires::{MultiResolutionDemons, RegistrationSummary};
use crate::validation::{validate_image_shapes, GEOMETRY_TOLERANCE};

/// Everything a run produces. Owned by the caller.
#[derive(Debug, Clone)]
pub struct RegistrationOutput<B: Backend> {
    /// Moving volume warped onto the fixed grid.
    pub warped: Image<B, 3>,
    /// Displacement field on the fixed grid, physical units.
    pub field: DisplacementField<B>,
    pub summary: RegistrationSummary,
}

pub struct DeformableRegistration {
    config: RegistrationConfig,
}

impl DeformableRegistration {
    pub fn new(config: RegistrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Register `moving` to `fixed`. Neither input is modified.
    pub fn execute<B: Backend>(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>) -> Result<RegistrationOutput<B>> {
        self.config.validate()?;

        let aligned_moving = self.bring_to_fixed_grid(fixed, moving)?;

        let normalized = if self.config.histogram.enabled {
            tracing::info!(
                bins = self.config.histogram.bins,
                match_points = self.config.histogram.match_points,
                threshold_at_mean = self.config.histogram.threshold_at_mean,
                "Matching moving histogram to fixed"
            );
            self.config.histogram.filter().apply(&aligned_moving, fixed)?
        } else {
            aligned_moving
        };

        let fixed_pyramid = MultiResolutionPyramid::with_levels(fixed, self.config.levels);
        let moving_pyramid = MultiResolutionPyramid::with_levels(&normalized, self.config.levels);

        let (field, summary) = MultiResolutionDemons::new(self.config.demons).execute(
            &fixed_pyramid,
            &moving_pyramid,
            &self.config.schedule(),
        )?;
        let field = field.resample(fixed.geometry());

        let warped = WarpImageFilter::new(self.config.interpolation).apply(moving, &field, fixed);

        Ok(RegistrationOutput { warped, field, summary })
    }

    fn bring_to_fixed_grid<B: Backend>(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>) -> Result<Image<B, 3>> {
        if fixed.geometry().same_grid(moving.geometry(), GEOMETRY_TOLERANCE) {
            return Ok(moving.clone());
        }

        if !self.config.resample_moving_to_fixed {
            validate_image_shapes(fixed, moving)?;
            return Err(RegistrationError::geometry_mismatch(
                "moving volume is not on the fixed grid and resampling is disabled",
            ));
        }

        tracing::info!(
            fixed_shape = ?fixed.shape(),
            moving_shape = ?moving.shape(),
            "Resampling moving volume onto fixed grid"
        );
        Ok(ResampleImageFilter::new(*fixed.geometry(), IdentityTransform, LinearInterpolator::new()).apply(moving))
    }
}
