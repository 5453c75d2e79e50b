//! Error types for the linkshelf crate.

use thiserror::Error;

use crate::llm::GenerationError;

/// Errors returned by store, repository and cache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Target document is missing (or owned by someone else).
    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// No signed-in identity for an operation that requires one.
    #[error("Not signed in")]
    Unauthenticated,

    /// Signed in, but not allowed to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// External generation call failed or returned an unusable payload.
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Store adapter call failed for any reason.
    #[error("Store error: {0}")]
    Store(String),

    /// A stored document does not match the expected entity shape.
    #[error("Malformed document {collection}/{id}: {reason}")]
    Decode {
        collection: String,
        id: String,
        reason: String,
    },

    /// Invalid parameters provided by the caller.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
