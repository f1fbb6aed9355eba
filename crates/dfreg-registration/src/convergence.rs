//! Per-level convergence thresholds.
//!
//! The controller holds a table of RMS thresholds, one per resolution level,
//! and the index of the active level. The engine asks it for the threshold
//! after each iteration; the scheduler tells it when a level is done.

use crate::demons::IterationReport;
use crate::error::Result;
use crate::validation::validate_thresholds;

/// Reference thresholds for four levels, coarsest first.
pub const REFERENCE_THRESHOLDS: [f64; 4] = [0.8, 0.75, 0.4, 0.2];

#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceController {
    thresholds: Vec<f64>,
    level: usize,
}

impl ConvergenceController {
    /// Create a controller at level 0.
    ///
    /// The table must be non-empty with finite, positive, non-increasing values.
    pub fn new(thresholds: Vec<f64>) -> Result<Self> {
        validate_thresholds(&thresholds)?;
        Ok(Self { thresholds, level: 0 })
    }

    /// Threshold of the active level.
    pub fn threshold(&self) -> f64 {
        self.thresholds[self.level]
    }

    /// Called after every engine iteration; returns the threshold to apply.
    pub fn on_iteration(&self, report: &IterationReport) -> f64 {
        let threshold = self.threshold();
        tracing::trace!(
            level = self.level,
            iteration = report.iteration,
            rms_change = report.rms_change,
            threshold,
            "Convergence check"
        );
        threshold
    }

    /// Advance to the next level, staying on the last one once reached.
    pub fn on_level_complete(&mut self) {
        if self.level + 1 < self.thresholds.len() {
            self.level += 1;
        }
    }

    pub fn current_level(&self) -> usize {
        self.level
    }

    pub fn level_count(&self) -> usize {
        self.thresholds.len()
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Back to level 0.
    pub fn reset(&mut self) {
        self.level = 0;
    }
}

impl Default for ConvergenceController {
    fn default() -> Self {
        Self {
            thresholds: REFERENCE_THRESHOLDS.to_vec(),
            level: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn report(iteration: usize) -> IterationReport {
        IterationReport {
            level: 0,
            iteration,
            rms_change: 1.0,
            metric: 0.0,
        }
    }

    #[test]
    fn test_reference_sequence() {
        let mut controller = ConvergenceController::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(controller.on_iteration(&report(1)));
            controller.on_level_complete();
        }
        assert_eq!(seen, REFERENCE_THRESHOLDS.to_vec());
        assert_eq!(controller.current_level(), 3);
    }

    #[test]
    fn test_reset() {
        let mut controller = ConvergenceController::new(vec![0.5, 0.25]).unwrap();
        controller.on_level_complete();
        assert_eq!(controller.threshold(), 0.25);
        controller.reset();
        assert_eq!(controller.current_level(), 0);
        assert_eq!(controller.threshold(), 0.5);
    }

    #[test]
    fn test_rejects_bad_tables() {
        assert!(ConvergenceController::new(vec![]).is_err());
        assert!(ConvergenceController::new(vec![0.2, 0.8]).is_err());
        assert!(ConvergenceController::new(vec![-1.0]).is_err());
    }

    proptest! {
        #[test]
        fn test_saturates_at_last_level(
            completions in 0usize..50,
            iterations in 0usize..20
        ) {
            let mut controller = ConvergenceController::default();
            for _ in 0..completions {
                for i in 0..iterations {
                    controller.on_iteration(&report(i + 1));
                }
                controller.on_level_complete();
            }
            prop_assert!(controller.current_level() < controller.level_count());
            prop_assert_eq!(controller.current_level(), completions.min(3));
            prop_assert_eq!(controller.threshold(), REFERENCE_THRESHOLDS[completions.min(3)]);
        }

        #[test]
        fn test_thresholds_never_increase(
            mut table in proptest::collection::vec(0.01f64..10.0, 1..8),
            completions in 0usize..20
        ) {
            table.sort_by(|a, b| b.total_cmp(a));
            let mut controller = ConvergenceController::new(table).unwrap();
            let mut previous = f64::INFINITY;
            for _ in 0..completions {
                let threshold = controller.on_iteration(&report(1));
                prop_assert!(threshold <= previous);
                previous = threshold;
                controller.on_level_complete();
            }
        }
    }
}
