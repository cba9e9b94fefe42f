//! Error types for quadseg

use thiserror::Error;

/// Errors that can occur while validating input, building configurations or
/// running an operation.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Empty, ragged or otherwise malformed input buffer
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Operation name not in the catalog
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Decoding or encoding failure
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for quadseg operations
pub type Result<T> = std::result::Result<T, ProcessingError>;
