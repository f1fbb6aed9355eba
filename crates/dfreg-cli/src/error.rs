use dfreg_registration::RegistrationError;
use thiserror::Error;

/// Failures of a command, split by the stage that produced them.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read {artifact}: {message}")]
    Read { artifact: String, message: String },

    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("failed to write {artifact}: {message}")]
    Write { artifact: String, message: String },

    /// Every output write that failed; the others were still written.
    #[error("{}", join(.0))]
    Outputs(Vec<PipelineError>),
}

impl PipelineError {
    pub fn read(artifact: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Read {
            artifact: artifact.into(),
            message: format!("{err:#}"),
        }
    }

    pub fn write(artifact: impl Into<String>, err: anyhow::Error) -> Self {
        Self::Write {
            artifact: artifact.into(),
            message: format!("{err:#}"),
        }
    }
}

fn join(errors: &[PipelineError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}
