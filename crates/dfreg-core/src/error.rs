//! Errors reported by fallible filters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid filter parameter: {0}")]
    InvalidParameter(String),

    #[error("Input volume is empty")]
    EmptyInput,
}
