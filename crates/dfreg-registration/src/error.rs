//! Error types for registration operations.
//!
//! Non-convergence is not an error: a level that exhausts its iteration
//! budget ends in [`DemonsState::IterationLimitReached`](crate::demons::DemonsState)
//! and the run continues.

use dfreg_core::FilterError;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Fixed and moving volumes (or a field) do not share a usable grid.
    #[error("Input geometry mismatch: {0}")]
    InputGeometryMismatch(String),

    /// Shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// NaN or infinite values appeared while iterating.
    #[error("Numerical failure at level {level}, iteration {iteration}: {message}")]
    NumericalFailure {
        level: usize,
        iteration: usize,
        message: String,
    },

    /// Invalid configuration, detected before any computation.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Intensity normalisation failed.
    #[error("Intensity normalization failed: {0}")]
    Normalization(#[from] FilterError),
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create an input geometry mismatch error.
    pub fn geometry_mismatch(msg: impl Into<String>) -> Self {
        Self::InputGeometryMismatch(msg.into())
    }

    /// Create a numerical failure error.
    pub fn numerical_failure(level: usize, iteration: usize, msg: impl Into<String>) -> Self {
        Self::NumericalFailure {
            level,
            iteration,
            message: msg.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }
}
