use burn::tensor::backend::Backend;
use dfreg_core::filter::MultiResolutionPyramid;
use dfreg_core::transform::DisplacementField;
use serde::{Deserialize, Serialize};
use crate::convergence::{ConvergenceController, REFERENCE_THRESHOLDS};
use crate::demons::{DemonsConfig, DemonsRegistration, DemonsState};
use crate::error::{RegistrationError, Result};
use crate::validation::validate_iterations;

/// Per-level iteration budgets and RMS thresholds, coarsest level first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationSchedule {
    pub iterations: Vec<usize>,
    pub thresholds: Vec<f64>,
}

impl RegistrationSchedule {
    pub fn new(iterations: Vec<usize>, thresholds: Vec<f64>) -> Self {
        Self { iterations, thresholds }
    }

    /// Four levels with budgets `{40, 40, 32, 32}` and thresholds `{0.8, 0.75, 0.4, 0.2}`.
    pub fn reference() -> Self {
        Self::new(vec![40, 40, 32, 32], REFERENCE_THRESHOLDS.to_vec())
    }

    /// Same budget and threshold on every level.
    pub fn uniform(levels: usize, iterations: usize, threshold: f64) -> Self {
        Self::new(vec![iterations; levels], vec![threshold; levels])
    }

    pub fn levels(&self) -> usize {
        self.iterations.len()
    }

    pub fn validate(&self) -> Result<()> {
        validate_iterations(&self.iterations, self.thresholds.len())?;
        ConvergenceController::new(self.thresholds.clone()).map(|_| ())
    }
}

impl Default for RegistrationSchedule {
    fn default() -> Self {
        Self::reference()
    }
}

/// How one level ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: usize,
    pub shape: [usize; 3],
    pub threshold: f64,
    pub iterations: usize,
    pub state: DemonsState,
    pub rms_history: Vec<f64>,
    pub final_metric: f64,
}

/// Report of a complete multi-resolution run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationSummary {
    pub levels: Vec<LevelSummary>,
}

impl RegistrationSummary {
    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.iterations).sum()
    }

    pub fn converged_levels(&self) -> usize {
        self.levels.iter().filter(|l| l.state == DemonsState::Converged).count()
    }
}

/// Coarse-to-fine Demons registration.
///
/// Runs the engine once per pyramid level, coarsest first. The field of each
/// level, resampled onto the next level's grid, initialises that level.
/// Levels run strictly in order.
pub struct MultiResolutionDemons {
    config: DemonsConfig,
}

impl MultiResolutionDemons {
    pub fn new(config: DemonsConfig) -> Self {
        Self { config }
    }

    /// Execute the multi-resolution registration.
    ///
    /// # Arguments
    /// * `fixed` - Pyramid of the fixed image
    /// * `moving` - Pyramid of the (normalised) moving image, same level count
    /// * `schedule` - Iteration budgets and thresholds, one entry per level
    ///
    /// Returns the field on the finest fixed level together with a per-level
    /// summary.
    pub fn execute<B: Backend>(
        &self,
        fixed: &MultiResolutionPyramid<B, 3>,
        moving: &MultiResolutionPyramid<B, 3>,
        schedule: &RegistrationSchedule,
    ) -> Result<(DisplacementField<B>, RegistrationSummary)> {
        schedule.validate()?;
        self.config.validate()?;

        let levels = fixed.levels();
        if moving.levels() != levels {
            return Err(RegistrationError::invalid_configuration(format!(
                "fixed pyramid has {} levels but moving pyramid has {}",
                levels,
                moving.levels()
            )));
        }
        if schedule.levels() != levels {
            return Err(RegistrationError::invalid_configuration(format!(
                "schedule has {} levels but pyramids have {}",
                schedule.levels(),
                levels
            )));
        }

        // One controller per run, owned here
        let mut controller = ConvergenceController::new(schedule.thresholds.clone())?;
        let mut engine = DemonsRegistration::new(self.config);
        let mut field: Option<DisplacementField<B>> = None;
        let mut summary = RegistrationSummary::default();

        for level in 0..levels {
            let fixed_level = fixed.get_level(level);
            let moving_level = moving.get_level(level);
            let iterations = schedule.iterations[level];

            let initial = match field.take() {
                None => DisplacementField::zeros(*fixed_level.geometry(), &fixed_level.device()),
                Some(previous) => previous.resample(fixed_level.geometry()),
            };

            tracing::info!(
                level,
                levels,
                shape = ?fixed_level.shape(),
                iterations,
                threshold = controller.threshold(),
                "Starting resolution level"
            );

            engine.set_level(level);
            let outcome = engine.execute(fixed_level, moving_level, initial, iterations, |report| {
                controller.on_iteration(report)
            })?;

            let threshold = controller.threshold();
            match outcome.state {
                DemonsState::Converged => tracing::info!(
                    level,
                    iterations = outcome.iterations,
                    rms_change = ?outcome.rms_history.last(),
                    "Level converged"
                ),
                _ => tracing::warn!(
                    level,
                    iterations = outcome.iterations,
                    threshold,
                    rms_change = ?outcome.rms_history.last(),
                    "Level reached its iteration limit without converging"
                ),
            }

            summary.levels.push(LevelSummary {
                level,
                shape: fixed_level.shape(),
                threshold,
                iterations: outcome.iterations,
                state: outcome.state,
                rms_history: outcome.rms_history,
                final_metric: outcome.final_metric,
            });
            field = Some(outcome.field);
            controller.on_level_complete();
        }

        let field = field.ok_or_else(|| RegistrationError::invalid_configuration("pyramids have no levels"))?;

        tracing::info!(
            levels,
            total_iterations = summary.total_iterations(),
            converged_levels = summary.converged_levels(),
            max_displacement = field.max_magnitude(),
            rms_displacement = field.rms_magnitude(),
            "Multi-resolution registration finished"
        );

        Ok((field, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use dfreg_core::image::{Image, ImageGeometry};

    type B = NdArray<f32>;

    fn blob(center: [f32; 3]) -> Image<B, 3> {
        let n = 16;
        let mut data = Vec::with_capacity(n * n * n);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    let d2 = (x as f32 - center[0]).powi(2) + (y as f32 - center[1]).powi(2) + (z as f32 - center[2]).powi(2);
                    data.push(50.0 * (-d2 / 18.0).exp());
                }
            }
        }
        Image::from_vec(data, ImageGeometry::with_shape([n, n, n]), &Default::default())
    }

    #[test]
    fn test_schedule_validation() {
        assert!(RegistrationSchedule::reference().validate().is_ok());
        assert!(RegistrationSchedule::new(vec![10, 10], vec![0.5]).validate().is_err());
        assert!(RegistrationSchedule::new(vec![10, 10], vec![0.1, 0.5]).validate().is_err());
    }

    #[test]
    fn test_level_count_mismatch() {
        let image = blob([8.0, 8.0, 8.0]);
        let fixed = MultiResolutionPyramid::with_levels(&image, 3);
        let moving = MultiResolutionPyramid::with_levels(&image, 2);
        let scheduler = MultiResolutionDemons::new(DemonsConfig::default());

        let result = scheduler.execute(&fixed, &moving, &RegistrationSchedule::uniform(3, 5, 0.1));
        assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));

        let moving = MultiResolutionPyramid::with_levels(&image, 3);
        let result = scheduler.execute(&fixed, &moving, &RegistrationSchedule::uniform(2, 5, 0.1));
        assert!(matches!(result, Err(RegistrationError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_numerical_failure_reports_its_level() {
        let fixed = MultiResolutionPyramid::with_levels(&blob([8.0, 8.0, 8.0]), 2);
        let mut values = blob([9.0, 8.0, 8.0]).to_vec();
        values[8 * 256 + 8 * 16 + 8] = f32::NAN;
        let moving = Image::<B, 3>::from_vec(values, ImageGeometry::with_shape([16, 16, 16]), &Default::default());
        let moving = MultiResolutionPyramid::with_levels(&moving, 2);

        // The coarse level does no work, so the NaN first surfaces on level 1
        let schedule = RegistrationSchedule::new(vec![0, 5], vec![0.1, 0.1]);
        let result = MultiResolutionDemons::new(DemonsConfig::default()).execute(&fixed, &moving, &schedule);

        assert!(
            matches!(result, Err(RegistrationError::NumericalFailure { level: 1, iteration: 1, .. })),
            "{:?}",
            result.err()
        );
    }

    #[test]
    fn test_levels_run_coarse_to_fine() {
        let fixed = MultiResolutionPyramid::with_levels(&blob([8.0, 8.0, 8.0]), 3);
        let moving = MultiResolutionPyramid::with_levels(&blob([9.0, 8.0, 8.0]), 3);
        let schedule = RegistrationSchedule::new(vec![5, 5, 5], vec![1e-6, 1e-6, 1e-6]);

        let (field, summary) = MultiResolutionDemons::new(DemonsConfig::default())
            .execute(&fixed, &moving, &schedule)
            .unwrap();

        assert_eq!(field.shape(), [16, 16, 16]);
        assert_eq!(summary.levels.len(), 3);
        assert_eq!(summary.levels[0].shape, [4, 4, 4]);
        assert_eq!(summary.levels[2].shape, [16, 16, 16]);
        assert!(summary.levels.iter().all(|l| l.iterations <= 5));
        assert!(summary.total_iterations() <= 15);
        assert!(field.vector_at_index([8, 8, 8])[0] > 0.0);
    }
}
