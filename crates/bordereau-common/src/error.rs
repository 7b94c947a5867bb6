//! Error types shared across the Bordereau workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, BordereauError>;

/// Main error type for shared Bordereau code
#[derive(Error, Debug)]
pub enum BordereauError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown queue status: {0}")]
    UnknownStatus(String),

    #[error("Unknown file kind: {0}")]
    UnknownKind(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
