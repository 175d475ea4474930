//! Error types for the fathom library.
//!
//! All errors are represented by the [`FathomError`] enum. Validation errors
//! raised while turning a search expression into an executable query use the
//! [`FathomError::Search`] variant and abort the search that produced them;
//! shard and node errors are recorded against the owning node and degrade
//! result completeness without aborting the overall search.

use std::io;

use thiserror::Error;

/// The main error type for fathom operations.
#[derive(Error, Debug)]
pub enum FathomError {
    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Search expression validation errors (unknown field, missing value,
    /// malformed range, unsupported condition for a field type).
    #[error("Search error: {0}")]
    Search(String),

    /// Per-shard errors (corrupt shard, unreadable shard).
    #[error("Shard error: {0}")]
    Shard(String),

    /// Per-node transport or execution errors.
    #[error("Node error: {0}")]
    Node(String),

    /// Operation cancelled by cooperative termination.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with FathomError.
pub type Result<T> = std::result::Result<T, FathomError>;

impl FathomError {
    /// Create a new search validation error.
    pub fn search<S: Into<String>>(msg: S) -> Self {
        FathomError::Search(msg.into())
    }

    /// Create a new shard error.
    pub fn shard<S: Into<String>>(msg: S) -> Self {
        FathomError::Shard(msg.into())
    }

    /// Create a new node error.
    pub fn node<S: Into<String>>(msg: S) -> Self {
        FathomError::Node(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        FathomError::Cancelled(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        FathomError::InvalidOperation(msg.into())
    }

    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        FathomError::SerializationError(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        FathomError::Other(msg.into())
    }

    /// True if this error was raised by cooperative termination rather than
    /// a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FathomError::Cancelled(_))
    }
}
