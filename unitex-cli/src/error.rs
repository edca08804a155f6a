//! CLI-level error type.

use thiserror::Error;
use unitex::error::EngineError;

/// Errors surfaced to the terminal with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid or inconsistent command-line arguments.
    #[error("invalid arguments: {0}")]
    Args(String),

    /// The engine rejected or failed the request.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The batch ran, but some jobs failed.
    #[error("{failed} of {total} jobs failed")]
    Batch { failed: usize, total: usize },
}
