//! Model-related error types.

use thiserror::Error;

/// Errors that can occur while building or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid layer configuration: {message}")]
    InvalidLayerConfig { message: String },

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Invalid input `{name}`: {message}")]
    InvalidInput { name: &'static str, message: String },

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub(crate) fn invalid_input(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            name,
            message: message.into(),
        }
    }
}
