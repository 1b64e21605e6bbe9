//! Error types for cluster operations.

use sealbox_core::ResourceKey;
use thiserror::Error;

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur when talking to the cluster API.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The named object does not exist.
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ResourceKey },

    /// A create collided with an existing object.
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ResourceKey },

    /// An update would mutate an immutable secret.
    #[error("secret {key} is immutable, data and type cannot change")]
    Immutable { key: ResourceKey },

    /// An update raced with a concurrent writer.
    #[error("conflicting write to {kind} {key}")]
    Conflict { kind: &'static str, key: ResourceKey },

    /// The object was rejected by the API.
    #[error("invalid object: {0}")]
    Invalid(String),

    /// Object payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Transport-level failure talking to the API.
    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    /// Whether the error is a missing-object lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// Whether retrying the same write can ever succeed.
    ///
    /// Immutability and validation failures are permanent until the input
    /// changes; conflicts and API errors are worth a retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ClusterError::Immutable { .. } | ClusterError::Invalid(_) | ClusterError::Codec(_)
        )
    }
}
