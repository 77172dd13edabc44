//! Error types for lsim-output.

use thiserror::Error;

/// Errors that can occur when writing model output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("model error: {0}")]
    Model(#[from] lsim_core::LsimError),
}

/// Alias for `Result<T, OutputError>`.
pub type OutputResult<T> = Result<T, OutputError>;
