//! Error types for Crumb core library.

use thiserror::Error;

/// Result type alias using Crumb Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Crumb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging could not be initialised
    #[error("Tracing error: {0}")]
    Tracing(String),
}
