//! Error types for the controller: engine-level failures and the
//! per-reconcile failure taxonomy.

use sealbox_cluster::ClusterError;
use sealbox_core::{CoreError, ResourceKey};
use sealbox_crypto::CryptoError;
use thiserror::Error;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors from the controller's own machinery: key management, rotation,
/// and the read-only unseal/rotate entry points.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No key has been generated or loaded yet.
    #[error("key registry is empty")]
    EmptyRegistry,

    /// The configured key name prefix is not usable as a resource name.
    #[error("invalid key prefix {prefix:?}: {reason}")]
    KeyPrefix { prefix: String, reason: String },

    /// A submitted object was not of the expected kind.
    #[error("unexpected resource kind, want SealedSecret")]
    UnexpectedKind,

    /// The renewal task has already shut down.
    #[error("key renewal task is not running")]
    RenewerStopped,

    /// A background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Failure of a single reconcile pass.
///
/// The variant decides both the event reason reported on the sealed secret
/// and whether the work queue retries the key.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No known private key could decrypt the payload; wrong key, tampered
    /// ciphertext, or a renamed/rescoped resource. Permanent.
    #[error("{0}")]
    Unseal(#[source] CoreError),

    /// The target secret exists but is not owned, managed, or patchable.
    /// Permanent until an operator annotates it.
    #[error("secret {key} already exists and is not managed by this sealed secret")]
    NotManaged { key: ResourceKey },

    /// The target secret is immutable. Permanent.
    #[error("target Secret is immutable, delete the Secret and let it be recreated")]
    Immutable { key: ResourceKey },

    /// API-level failure; transient unless the cluster says otherwise.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl ReconcileError {
    /// Whether retrying without an input change can ever succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            ReconcileError::Unseal(_)
            | ReconcileError::NotManaged { .. }
            | ReconcileError::Immutable { .. } => true,
            ReconcileError::Cluster(err) => err.is_permanent(),
        }
    }

    /// Event reason reported on the sealed secret for this failure.
    pub fn event_reason(&self) -> &'static str {
        match self {
            ReconcileError::Unseal(_) => "ErrUnsealFailed",
            _ => "ErrUpdateFailed",
        }
    }
}
