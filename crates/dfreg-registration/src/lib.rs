//! Multi-resolution Demons deformable registration.
//!
//! The main entry point is [`DeformableRegistration`], which chains
//! histogram matching, pyramid construction, [`MultiResolutionDemons`] and
//! the final warp. The pieces are usable on their own:
//!
//! * [`demons::DemonsRegistration`] registers one resolution level,
//! * [`convergence::ConvergenceController`] supplies per-level RMS thresholds,
//! * [`multires::MultiResolutionDemons`] drives the levels coarse to fine.

pub mod config;
pub mod convergence;
pub mod demons;
pub mod error;
pub mod multires;
pub mod pipeline;
pub mod validation;

pub use config::{HistogramConfig, RegistrationConfig, MAX_LEVELS};
pub use convergence::ConvergenceController;
pub use demons::{DemonsConfig, DemonsOutcome, DemonsRegistration, DemonsState, IterationReport};
pub use error::{RegistrationError, Result};
pub use multires::{LevelSummary, MultiResolutionDemons, RegistrationSchedule, RegistrationSummary};
pub use pipeline::{DeformableRegistration, RegistrationOutput};
