//! Error types for comprobar
//!
//! A single error enum covers every failure the harness can hit. None of
//! them is recoverable: a golden artifact is either produced exactly or the
//! run aborts.

use thiserror::Error;

/// Result type alias for comprobar operations
pub type Result<T> = std::result::Result<T, ComprobarError>;

/// Errors produced while computing, serializing or verifying golden artifacts
#[derive(Debug, Error)]
pub enum ComprobarError {
    /// Configuration rejected at setup (e.g. `embed_dim % num_heads != 0`)
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What is wrong with the configuration
        reason: String,
    },

    /// Tensor shape is malformed or unsupported
    #[error("Invalid shape: {reason}")]
    InvalidShape {
        /// Description of the shape problem
        reason: String,
    },

    /// Data length does not match the declared shape
    #[error("Data size {data_size} does not match shape {shape:?} (expected {expected})")]
    DataShapeMismatch {
        /// Number of elements supplied
        data_size: usize,
        /// Declared shape
        shape: Vec<usize>,
        /// Element count implied by the shape
        expected: usize,
    },

    /// Tensor shape differs from the one an operation requires
    #[error("Shape mismatch in {operation}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Operation that checked the shape
        operation: String,
        /// Required shape
        expected: Vec<usize>,
        /// Offending shape
        actual: Vec<usize>,
    },

    /// Named tensor is missing from a bundle
    #[error("Tensor '{name}' not found")]
    TensorNotFound {
        /// Missing key
        name: String,
    },

    /// Tensor stored with a different element type than requested
    #[error("Tensor '{name}' has dtype {actual}, expected {expected}")]
    DtypeMismatch {
        /// Tensor key
        name: String,
        /// Requested dtype
        expected: String,
        /// Stored dtype
        actual: String,
    },

    /// Container bytes are malformed
    #[error("Format error: {reason}")]
    FormatError {
        /// What failed to parse
        reason: String,
    },

    /// Encoding an artifact failed
    #[error("Serialization error: {reason}")]
    SerializationError {
        /// Underlying cause
        reason: String,
    },

    /// Filesystem I/O failed
    #[error("I/O error: {message}")]
    IoError {
        /// Underlying cause with context
        message: String,
    },

    /// Pretrained parameters or tokenizer could not be loaded
    #[error("Model load error: {reason}")]
    ModelLoadError {
        /// Underlying cause
        reason: String,
    },

    /// A golden artifact was replayed and did not match
    #[error("Verification failed: {reason}")]
    VerificationFailed {
        /// Summary of the divergence
        reason: String,
    },

    /// Model or tokenizer failed during decoding
    #[error("Inference error: {reason}")]
    InferenceError {
        /// Underlying cause
        reason: String,
    },
}

impl From<std::io::Error> for ComprobarError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ComprobarError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}
