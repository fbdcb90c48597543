//! Error types for container image I/O

use thiserror::Error;

/// Main error type for container and image I/O operations
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Unsupported component type: {0}")]
    UnsupportedType(String),

    #[error("Unrecognized storage type: {0}")]
    UnrecognizedStorageType(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Rank mismatch: {0}")]
    RankMismatch(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a container file: {0}")]
    NotAContainer(String),

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u32),

    #[error("Container I/O failure: {0}")]
    ContainerIo(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Specialized Result type for container operations
pub type Result<T> = std::result::Result<T, ContainerError>;

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::ContainerIo(err.to_string())
    }
}

impl From<serde_json::Error> for ContainerError {
    fn from(err: serde_json::Error) -> Self {
        ContainerError::Configuration(err.to_string())
    }
}
