//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Job description errors: fatal, no instances run
    #[error("Invalid job description: {0}")]
    Configuration(String),

    // Step errors: fail the owning instance only
    #[error("Step '{step}' failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    // Artifact errors
    #[error("Artifact '{name}' missing: {path} does not exist")]
    ArtifactMissing { name: String, path: String },

    #[error("Artifact name collision: '{name}' is produced by more than one instance")]
    ArtifactNameCollision { name: String },

    // Cancellation
    #[error("Instance cancelled before completion")]
    Cancelled,

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}
