//! Shared error definitions for gateway primitives.

use thiserror::Error;

/// Result alias used throughout the gateway.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing gateway primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// Tool identifier failed validation.
    #[error("invalid tool id `{id}`: {reason}")]
    InvalidToolId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Trace identifier failed validation.
    #[error("invalid trace id: {reason}")]
    InvalidTraceId {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool descriptor failed validation.
    #[error("invalid tool descriptor: {reason}")]
    InvalidDescriptor {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Two descriptors in the same manifest share an id.
    #[error("tool `{id}` is declared more than once")]
    DuplicateTool {
        /// Identifier declared twice.
        id: String,
    },

    /// Manifest document could not be decoded.
    #[error("invalid manifest: {source}")]
    Manifest {
        /// Source decoding error.
        #[from]
        source: serde_json::Error,
    },
}
