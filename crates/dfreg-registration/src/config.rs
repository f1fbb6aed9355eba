//! Run configuration.
//!
//! [`RegistrationConfig`] gathers everything a registration run needs and
//! round-trips through JSON. Missing fields take the reference defaults.

use dfreg_core::filter::HistogramMatchingFilter;
use dfreg_core::interpolation::Interpolation;
use serde::{Deserialize, Serialize};
use crate::convergence::REFERENCE_THRESHOLDS;
use crate::demons::DemonsConfig;
use crate::error::{RegistrationError, Result};
use crate::multires::RegistrationSchedule;
use crate::validation::validate_iterations;

/// Largest accepted pyramid depth. The coarsest level shrinks by `2^(levels - 1)`.
pub const MAX_LEVELS: usize = 16;

/// Histogram matching parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramConfig {
    pub enabled: bool,
    pub bins: usize,
    pub match_points: usize,
    pub threshold_at_mean: bool,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bins: 1024,
            match_points: 7,
            threshold_at_mean: true,
        }
    }
}

impl HistogramConfig {
    pub fn filter(&self) -> HistogramMatchingFilter {
        HistogramMatchingFilter::new(self.bins, self.match_points).with_threshold_at_mean(self.threshold_at_mean)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Number of pyramid levels.
    pub levels: usize,
    /// Iteration budget per level, coarsest first.
    pub iterations: Vec<usize>,
    /// RMS change threshold per level, coarsest first; must not increase.
    pub thresholds: Vec<f64>,
    pub demons: DemonsConfig,
    pub histogram: HistogramConfig,
    /// Interpolation used for the final warp.
    pub interpolation: Interpolation,
    /// Resample the moving volume onto the fixed grid when the grids differ.
    pub resample_moving_to_fixed: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            iterations: vec![40, 40, 32, 32],
            thresholds: REFERENCE_THRESHOLDS.to_vec(),
            demons: DemonsConfig::default(),
            histogram: HistogramConfig::default(),
            interpolation: Interpolation::Linear,
            resample_moving_to_fixed: true,
        }
    }
}

impl RegistrationConfig {
    /// Change the level count, resizing the per-level tables.
    ///
    /// Existing entries are kept; new finer levels repeat the last entry.
    pub fn with_levels(mut self, levels: usize) -> Self {
        self.levels = levels;
        resize_repeating_last(&mut self.iterations, levels, 32);
        resize_repeating_last(&mut self.thresholds, levels, 0.2);
        self
    }

    pub fn schedule(&self) -> RegistrationSchedule {
        RegistrationSchedule::new(self.iterations.clone(), self.thresholds.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 {
            return Err(RegistrationError::invalid_configuration("at least one level is required"));
        }
        if self.levels > MAX_LEVELS {
            return Err(RegistrationError::invalid_configuration(format!(
                "at most {} levels are supported, got {}",
                MAX_LEVELS, self.levels
            )));
        }
        validate_iterations(&self.iterations, self.levels)?;
        if self.thresholds.len() != self.levels {
            return Err(RegistrationError::invalid_configuration(format!(
                "expected {} thresholds, got {}",
                self.levels,
                self.thresholds.len()
            )));
        }
        self.schedule().validate()?;
        self.demons.validate()?;
        if self.histogram.enabled {
            self.histogram
                .filter()
                .validate()
                .map_err(|e| RegistrationError::invalid_configuration(e.to_string()))?;
        }
        Ok(())
    }
}

fn resize_repeating_last<T: Copy>(values: &mut Vec<T>, len: usize, fallback: T) {
    let fill = values.last().copied().unwrap_or(fallback);
    values.resize(len, fill);
}
