//! Demons registration at a single resolution level.
//!
//! Each iteration warps the moving image with the current field, computes
//! the optical-flow force
//!
//! `update = s * g / (s^2 / lambda + |g|^2)`, `s = f - m(x + u)`
//!
//! with `g` the fixed image gradient (physical units) and `lambda` the mean
//! squared spacing, adds the update to the field and smooths the field with a
//! Gaussian (in voxels). The root-mean-square length of the update is the
//! convergence signal.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};
use dfreg_core::filter::GaussianFilter;
use dfreg_core::image::Image;
use dfreg_core::interpolation::{inside_mask, Interpolator, LinearInterpolator};
use dfreg_core::transform::DisplacementField;
use serde::{Deserialize, Serialize};
use crate::error::{RegistrationError, Result};
use crate::validation::{validate_field_grid, validate_same_grid, validate_standard_deviation};

/// Parameters of the Demons force and regularisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemonsConfig {
    /// Gaussian standard deviation (voxels) applied to the whole field after each update.
    pub standard_deviation: f64,
    /// Smooth the field after each update.
    pub smooth_displacement_field: bool,
    /// Smooth the update before adding it (fluid-like regularisation).
    pub smooth_update_field: bool,
    /// Standard deviation (voxels) of the update smoothing.
    pub update_field_standard_deviation: f64,
    /// Voxels whose intensity difference is below this get no update.
    pub intensity_difference_threshold: f64,
    /// Voxels whose force denominator is below this get no update.
    pub denominator_threshold: f64,
    /// Largest Gaussian kernel width used for smoothing.
    pub max_kernel_width: usize,
}

impl Default for DemonsConfig {
    fn default() -> Self {
        Self {
            standard_deviation: 1.0,
            smooth_displacement_field: true,
            smooth_update_field: false,
            update_field_standard_deviation: 1.0,
            intensity_difference_threshold: 0.001,
            denominator_threshold: 1e-9,
            max_kernel_width: 32,
        }
    }
}

impl DemonsConfig {
    pub fn validate(&self) -> Result<()> {
        validate_standard_deviation("standard_deviation", self.standard_deviation)?;
        validate_standard_deviation("update_field_standard_deviation", self.update_field_standard_deviation)?;
        if !(self.intensity_difference_threshold >= 0.0 && self.intensity_difference_threshold.is_finite()) {
            return Err(RegistrationError::invalid_configuration(format!(
                "intensity_difference_threshold must be finite and non-negative, got {}",
                self.intensity_difference_threshold
            )));
        }
        if !(self.denominator_threshold > 0.0 && self.denominator_threshold.is_finite()) {
            return Err(RegistrationError::invalid_configuration(format!(
                "denominator_threshold must be finite and positive, got {}",
                self.denominator_threshold
            )));
        }
        if self.max_kernel_width == 0 {
            return Err(RegistrationError::invalid_configuration("max_kernel_width must be at least 1"));
        }
        Ok(())
    }
}

/// Engine life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DemonsState {
    Initialized,
    Iterating,
    Converged,
    IterationLimitReached,
    Failed,
}

impl DemonsState {
    /// Converged and IterationLimitReached both return a field.
    pub fn is_success(&self) -> bool {
        matches!(self, DemonsState::Converged | DemonsState::IterationLimitReached)
    }
}

/// What the engine reports after every iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport {
    pub level: usize,
    /// 1-based count of completed iterations.
    pub iteration: usize,
    pub rms_change: f64,
    /// Mean squared intensity difference before the update.
    pub metric: f64,
}

/// Result of one engine run.
#[derive(Debug, Clone)]
pub struct DemonsOutcome<B: Backend> {
    pub field: DisplacementField<B>,
    pub state: DemonsState,
    pub iterations: usize,
    pub rms_history: Vec<f64>,
    pub final_metric: f64,
}

/// Quantities of the fixed image reused by every iteration.
struct FixedTerms<B: Backend> {
    values: Tensor<B, 1>,
    gradient: [Tensor<B, 1>; 3],
    gradient_norm2: Tensor<B, 1>,
    points: Tensor<B, 2>,
    normalizer: f64,
}

/// Demons registration engine.
pub struct DemonsRegistration {
    config: DemonsConfig,
    state: DemonsState,
    level: usize,
}

impl DemonsRegistration {
    pub fn new(config: DemonsConfig) -> Self {
        Self {
            config,
            state: DemonsState::Initialized,
            level: 0,
        }
    }

    pub fn config(&self) -> &DemonsConfig {
        &self.config
    }

    pub fn state(&self) -> DemonsState {
        self.state
    }

    /// Resolution level reported in iteration reports and errors.
    pub fn set_level(&mut self, level: usize) {
        self.level = level;
    }

    /// Run the engine.
    ///
    /// `threshold_fn` is called after every iteration and returns the RMS
    /// threshold currently in force; the run converges as soon as the RMS
    /// change of an iteration is at or below it. At most `max_iterations`
    /// iterations are performed.
    pub fn execute<B, F>(
        &mut self,
        fixed: &Image<B, 3>,
        moving: &Image<B, 3>,
        initial_field: DisplacementField<B>,
        max_iterations: usize,
        mut threshold_fn: F,
    ) -> Result<DemonsOutcome<B>>
    where
        B: Backend,
        F: FnMut(&IterationReport) -> f64,
    {
        self.state = DemonsState::Initialized;
        if let Err(err) = self.check_inputs(fixed, moving, &initial_field) {
            self.state = DemonsState::Failed;
            return Err(err);
        }

        if max_iterations == 0 {
            self.state = DemonsState::IterationLimitReached;
            return Ok(DemonsOutcome {
                field: initial_field,
                state: self.state,
                iterations: 0,
                rms_history: Vec::new(),
                final_metric: f64::NAN,
            });
        }

        let terms = Self::fixed_terms(fixed);
        let field_smoother = GaussianFilter::<B>::in_voxels(vec![self.config.standard_deviation])
            .with_max_kernel_width(self.config.max_kernel_width);
        let update_smoother = GaussianFilter::<B>::in_voxels(vec![self.config.update_field_standard_deviation])
            .with_max_kernel_width(self.config.max_kernel_width);

        let mut field = initial_field;
        let mut rms_history = Vec::with_capacity(max_iterations);
        let mut final_metric = f64::NAN;
        self.state = DemonsState::Iterating;

        for iteration in 1..=max_iterations {
            let (update, rms_change, metric) = self.compute_update(&terms, moving, &field);

            let update = if self.config.smooth_update_field {
                Self::smooth_components(&update, &update_smoother)
            } else {
                update
            };

            field = field.add(&update);
            if self.config.smooth_displacement_field {
                field = Self::smooth_components(&field, &field_smoother);
            }

            if !rms_change.is_finite() || !field.is_finite() {
                self.state = DemonsState::Failed;
                return Err(RegistrationError::numerical_failure(
                    self.level,
                    iteration,
                    format!("displacement update is not finite (rms change {})", rms_change),
                ));
            }

            rms_history.push(rms_change);
            final_metric = metric;

            let report = IterationReport {
                level: self.level,
                iteration,
                rms_change,
                metric,
            };
            let threshold = threshold_fn(&report);
            tracing::debug!(
                level = self.level,
                iteration,
                rms_change,
                threshold,
                metric,
                "Demons iteration"
            );

            if rms_change <= threshold {
                self.state = DemonsState::Converged;
                break;
            }
        }

        if self.state == DemonsState::Iterating {
            self.state = DemonsState::IterationLimitReached;
        }

        Ok(DemonsOutcome {
            field,
            state: self.state,
            iterations: rms_history.len(),
            rms_history,
            final_metric,
        })
    }

    fn check_inputs<B: Backend>(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, field: &DisplacementField<B>) -> Result<()> {
        self.config.validate()?;
        validate_same_grid(fixed, moving)?;
        validate_field_grid(field, fixed)
    }

    fn fixed_terms<B: Backend>(fixed: &Image<B, 3>) -> FixedTerms<B> {
        let geometry = fixed.geometry();
        let n = geometry.num_voxels();
        let device = fixed.device();

        // Gradient along each index axis, in intensity per millimetre
        let index_gradient: Vec<Tensor<B, 1>> = (0..3)
            .map(|axis| {
                let tensor_axis = 2 - axis;
                central_difference(fixed.data().clone(), tensor_axis)
                    .div_scalar(geometry.spacing()[axis])
                    .reshape([n])
            })
            .collect();

        // Rotate into physical space
        let direction = geometry.direction();
        let gradient: [Tensor<B, 1>; 3] = std::array::from_fn(|row| {
            (0..3).fold(Tensor::<B, 1>::zeros([n], &device), |acc, col| {
                let weight = direction[(row, col)];
                if weight == 0.0 {
                    acc
                } else {
                    acc + index_gradient[col].clone().mul_scalar(weight)
                }
            })
        });

        let gradient_norm2 = gradient
            .iter()
            .fold(Tensor::<B, 1>::zeros([n], &device), |acc, g| acc + g.clone().powf_scalar(2.0));

        FixedTerms {
            values: fixed.data().clone().reshape([n]),
            gradient,
            gradient_norm2,
            points: geometry.physical_points::<B>(&device),
            normalizer: geometry.spacing().mean_squared(),
        }
    }

    /// Returns the update field, its RMS length and the mean squared difference.
    fn compute_update<B: Backend>(
        &self,
        terms: &FixedTerms<B>,
        moving: &Image<B, 3>,
        field: &DisplacementField<B>,
    ) -> (DisplacementField<B>, f64, f64) {
        let [d, h, w] = moving.shape();

        let mapped = terms.points.clone() + field.vectors();
        let indices = moving.world_to_index_tensor(mapped);
        let inside = inside_mask(indices.clone(), [w, h, d]);
        let warped = LinearInterpolator::new().interpolate(moving.data(), indices);

        let speed = terms.values.clone() - warped;
        let speed2 = speed.clone().powf_scalar(2.0);
        let denominator = speed2.clone().div_scalar(terms.normalizer) + terms.gradient_norm2.clone();

        let active = speed
            .clone()
            .abs()
            .greater_equal_elem(self.config.intensity_difference_threshold)
            .float()
            * denominator.clone().greater_equal_elem(self.config.denominator_threshold).float()
            * inside.clone();
        let scale = speed * active / denominator.clamp_min(self.config.denominator_threshold);

        let n = terms.values.dims()[0];
        let columns: Vec<Tensor<B, 2>> = terms
            .gradient
            .iter()
            .map(|g| (g.clone() * scale.clone()).reshape([n, 1]))
            .collect();
        let update = Tensor::cat(columns, 1);

        let processed = inside.clone().sum().into_scalar().elem::<f64>().max(1.0);
        let sum_squared_change = update.clone().powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        let sum_squared_difference = (speed2 * inside).sum().into_scalar().elem::<f64>();

        let rms_change = (sum_squared_change / processed).sqrt();
        let metric = sum_squared_difference / processed;

        (DisplacementField::from_vectors(update, *field.geometry()), rms_change, metric)
    }

    fn smooth_components<B: Backend>(field: &DisplacementField<B>, smoother: &GaussianFilter<B>) -> DisplacementField<B> {
        let spacing = *field.geometry().spacing();
        let components = field.components().map(|c| smoother.apply_tensor(c, &spacing));
        DisplacementField::from_components(components, *field.geometry())
    }
}

/// Central differences along `axis` with replicated borders.
///
/// Result is in intensity per voxel.
fn central_difference<B: Backend>(data: Tensor<B, 3>, axis: usize) -> Tensor<B, 3> {
    let size = data.dims()[axis];
    let device = data.device();
    if size < 2 {
        return data.zeros_like();
    }

    let forward: Vec<i32> = (0..size).map(|i| (i + 1).min(size - 1) as i32).collect();
    let backward: Vec<i32> = (0..size).map(|i| i.saturating_sub(1) as i32).collect();
    let forward = data.clone().select(axis, Tensor::<B, 1, Int>::from_ints(forward.as_slice(), &device));
    let backward = data.select(axis, Tensor::<B, 1, Int>::from_ints(backward.as_slice(), &device));

    (forward - backward).div_scalar(2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use dfreg_core::image::ImageGeometry;

    type B = NdArray<f32>;

    fn blob(shape: [usize; 3], center: [f32; 3], sigma: f32) -> Image<B, 3> {
        let [d, h, w] = shape;
        let mut data = Vec::with_capacity(d * h * w);
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    let dx = x as f32 - center[0];
                    let dy = y as f32 - center[1];
                    let dz = z as f32 - center[2];
                    data.push(100.0 * (-(dx * dx + dy * dy + dz * dz) / (2.0 * sigma * sigma)).exp());
                }
            }
        }
        Image::from_vec(data, ImageGeometry::with_shape(shape), &Default::default())
    }

    #[test]
    fn test_central_difference_of_ramp() {
        let device = Default::default();
        let values: Vec<f32> = (0..4 * 4 * 4).map(|i| (i % 4) as f32 * 3.0).collect();
        let data = Tensor::<B, 3>::from_data(burn::tensor::TensorData::new(values, [4, 4, 4]), &device);

        let gx = central_difference(data.clone(), 2).into_data().to_vec::<f32>().unwrap();
        assert_eq!(&gx[0..4], &[1.5, 3.0, 3.0, 1.5]);

        let gz = central_difference(data, 0).into_data().to_vec::<f32>().unwrap();
        assert!(gz.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_identical_images_converge_immediately() {
        let image = blob([12, 12, 12], [6.0, 6.0, 6.0], 2.5);
        let field = DisplacementField::zeros(*image.geometry(), &Default::default());
        let mut engine = DemonsRegistration::new(DemonsConfig::default());

        let outcome = engine.execute(&image, &image, field, 10, |_| 0.01).unwrap();
        assert_eq!(outcome.state, DemonsState::Converged);
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.field.max_magnitude() < 1e-6);
        assert_eq!(engine.state(), DemonsState::Converged);
    }

    #[test]
    fn test_zero_budget_returns_initial_field() {
        let fixed = blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
        let moving = blob([8, 8, 8], [5.0, 4.0, 4.0], 2.0);
        let field = DisplacementField::zeros(*fixed.geometry(), &Default::default());
        let mut engine = DemonsRegistration::new(DemonsConfig::default());

        let outcome = engine.execute(&fixed, &moving, field, 0, |_| 0.0).unwrap();
        assert_eq!(outcome.state, DemonsState::IterationLimitReached);
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.rms_history.is_empty());
        assert_eq!(outcome.field.max_magnitude(), 0.0);
    }

    #[test]
    fn test_threshold_is_consulted_every_iteration() {
        let fixed = blob([12, 12, 12], [6.0, 6.0, 6.0], 2.0);
        let moving = blob([12, 12, 12], [7.0, 6.0, 6.0], 2.0);
        let field = DisplacementField::zeros(*fixed.geometry(), &Default::default());
        let mut engine = DemonsRegistration::new(DemonsConfig::default());

        let mut calls = Vec::new();
        let outcome = engine
            .execute(&fixed, &moving, field, 5, |report| {
                calls.push(report.iteration);
                0.0
            })
            .unwrap();

        assert_eq!(outcome.state, DemonsState::IterationLimitReached);
        assert_eq!(outcome.iterations, 5);
        assert_eq!(calls, vec![1, 2, 3, 4, 5]);
        assert!(outcome.rms_history.iter().all(|r| *r > 0.0));
    }

    #[test]
    fn test_displacement_points_towards_moving_blob() {
        let fixed = blob([16, 16, 16], [8.0, 8.0, 8.0], 2.5);
        let moving = blob([16, 16, 16], [9.0, 8.0, 8.0], 2.5);
        let field = DisplacementField::zeros(*fixed.geometry(), &Default::default());
        let mut engine = DemonsRegistration::new(DemonsConfig::default());

        let mut metrics = Vec::new();
        let outcome = engine
            .execute(&fixed, &moving, field, 30, |report| {
                metrics.push(report.metric);
                1e-6
            })
            .unwrap();
        let v = outcome.field.vector_at_index([8, 8, 8]);
        assert!(v[0] > 0.3, "x displacement {}", v[0]);
        assert!(v[1].abs() < 0.2);
        assert!(v[2].abs() < 0.2);
        // Warping with the estimate reduces the mismatch
        assert!(metrics[metrics.len() - 1] < 0.5 * metrics[0], "{:?}", metrics);
        assert_eq!(outcome.final_metric, metrics[metrics.len() - 1]);
    }

    #[test]
    fn test_nan_voxel_fails_on_first_iteration() {
        let fixed = blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
        let mut values = blob([8, 8, 8], [4.5, 4.0, 4.0], 2.0).to_vec();
        values[4 * 64 + 4 * 8 + 4] = f32::NAN;
        let moving = Image::<B, 3>::from_vec(values, *fixed.geometry(), &Default::default());
        let field = DisplacementField::zeros(*fixed.geometry(), &Default::default());

        let mut engine = DemonsRegistration::new(DemonsConfig::default());
        engine.set_level(2);
        let result = engine.execute(&fixed, &moving, field, 10, |_| 0.01);

        assert!(
            matches!(result, Err(RegistrationError::NumericalFailure { level: 2, iteration: 1, .. })),
            "{:?}",
            result.err()
        );
        assert_eq!(engine.state(), DemonsState::Failed);
    }

    #[test]
    fn test_mismatched_grids_fail() {
        let fixed = blob([8, 8, 8], [4.0, 4.0, 4.0], 2.0);
        let moving = blob([8, 8, 9], [4.0, 4.0, 4.0], 2.0);
        let field = DisplacementField::zeros(*fixed.geometry(), &Default::default());
        let mut engine = DemonsRegistration::new(DemonsConfig::default());

        let result = engine.execute(&fixed, &moving, field, 5, |_| 0.1);
        assert!(matches!(result, Err(RegistrationError::ShapeMismatch { .. })));
        assert_eq!(engine.state(), DemonsState::Failed);
    }
}
