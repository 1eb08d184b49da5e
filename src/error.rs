//! Error types for ratewarden.

use thiserror::Error;

/// Main error type for ratewarden operations.
#[derive(Error, Debug)]
pub enum WardenError {
    /// A limiter was configured with a zero window, limit, capacity or interval
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration or rule file could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ratewarden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
