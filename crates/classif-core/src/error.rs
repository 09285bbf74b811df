//! Error types for the classifier workspace.

use thiserror::Error;

/// Main error type for classifier training and evaluation.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Model construction or forward error
    #[error("Model error: {0}")]
    Model(String),

    /// Dataset or loader error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint record could not be written or read
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Dashboard sink rejected a record
    #[error("Dashboard error: {0}")]
    Dashboard(String),

    /// Metric computation error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

/// Specialized Result type for classifier operations.
pub type Result<T> = std::result::Result<T, Error>;
