//! Validation utilities for registration inputs and configuration.
//!
//! Every check here runs before any computation starts, so a bad request
//! fails without producing partial output.

use burn::tensor::backend::Backend;
use dfreg_core::image::{Image, ImageGeometry};
use dfreg_core::transform::DisplacementField;
use crate::error::{RegistrationError, Result};

/// Tolerance used when comparing origins, spacings and directions.
pub const GEOMETRY_TOLERANCE: f64 = 1e-6;

/// Validate that two images have the same shape.
pub fn validate_image_shapes<B: Backend>(fixed: &Image<B, 3>, moving: &Image<B, 3>) -> Result<()> {
    let fixed_shape = fixed.shape();
    let moving_shape = moving.shape();

    if fixed_shape != moving_shape {
        return Err(RegistrationError::ShapeMismatch {
            expected: fixed_shape.to_vec(),
            actual: moving_shape.to_vec(),
        });
    }

    Ok(())
}

/// Validate that two images sample the same physical grid.
pub fn validate_same_grid<B: Backend>(fixed: &Image<B, 3>, moving: &Image<B, 3>) -> Result<()> {
    validate_image_shapes(fixed, moving)?;
    if !fixed.geometry().same_grid(moving.geometry(), GEOMETRY_TOLERANCE) {
        return Err(RegistrationError::geometry_mismatch(describe_mismatch(fixed.geometry(), moving.geometry())));
    }
    Ok(())
}

/// Validate that a displacement field is defined on the fixed grid.
pub fn validate_field_grid<B: Backend>(field: &DisplacementField<B>, fixed: &Image<B, 3>) -> Result<()> {
    if !field.geometry().same_grid(fixed.geometry(), GEOMETRY_TOLERANCE) {
        return Err(RegistrationError::geometry_mismatch(format!(
            "initial field is not on the fixed grid: {}",
            describe_mismatch(fixed.geometry(), field.geometry())
        )));
    }
    Ok(())
}

fn describe_mismatch(expected: &ImageGeometry<3>, actual: &ImageGeometry<3>) -> String {
    format!(
        "expected shape {:?}, origin {:?}, spacing {:?}; got shape {:?}, origin {:?}, spacing {:?}",
        expected.shape(),
        expected.origin().to_array(),
        expected.spacing().to_array(),
        actual.shape(),
        actual.origin().to_array(),
        actual.spacing().to_array(),
    )
}

/// Validate a per-level threshold table.
///
/// Thresholds must be finite, positive and non-increasing from the coarsest
/// level to the finest.
pub fn validate_thresholds(thresholds: &[f64]) -> Result<()> {
    if thresholds.is_empty() {
        return Err(RegistrationError::invalid_configuration("threshold table is empty"));
    }

    if let Some(bad) = thresholds.iter().find(|t| !t.is_finite() || **t <= 0.0) {
        return Err(RegistrationError::invalid_configuration(format!(
            "thresholds must be finite and positive, got {}",
            bad
        )));
    }

    if let Some(pair) = thresholds.windows(2).find(|w| w[1] > w[0]) {
        return Err(RegistrationError::invalid_configuration(format!(
            "thresholds must not increase from coarse to fine levels: {} is followed by {}",
            pair[0], pair[1]
        )));
    }

    Ok(())
}

/// Validate a per-level iteration budget table.
///
/// A zero budget is allowed and leaves the level's initial field untouched.
pub fn validate_iterations(iterations: &[usize], levels: usize) -> Result<()> {
    if iterations.len() != levels {
        return Err(RegistrationError::invalid_configuration(format!(
            "expected {} iteration budgets, got {}",
            levels,
            iterations.len()
        )));
    }

    if let Some(bad) = iterations.iter().find(|&&n| n > 1_000_000) {
        return Err(RegistrationError::invalid_configuration(format!("Iterations too large: {}", bad)));
    }

    Ok(())
}

/// Validate a standard deviation given in voxels.
pub fn validate_standard_deviation(name: &str, sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(RegistrationError::invalid_configuration(format!(
            "{} must be finite and non-negative, got {}",
            name, sigma
        )));
    }
    Ok(())
}
