//! Error types for the sealbox core model.

use sealbox_crypto::CryptoError;
use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while sealing or unsealing a resource.
///
/// Every variant is a permanent, cryptographic-class failure from the
/// controller's point of view: retrying cannot help until the input changes.
#[derive(Debug, Error)]
pub enum CoreError {
    /// One or more encrypted items could not be decrypted.
    #[error("unseal failed: {details}")]
    Unseal { details: String },

    /// `data` and `encryptedData` are mutually exclusive.
    #[error("sealed secret declares both data and encryptedData")]
    AmbiguousData,

    /// Legacy whole-secret `data` present but its acceptance is disabled.
    #[error("using deprecated 'data' field; use 'encryptedData' or enable accept_deprecated_data")]
    DeprecatedData,

    /// A non-cluster-wide secret must carry a namespace.
    #[error("secret must declare a namespace")]
    MissingNamespace,

    /// An encrypted item is not valid base64.
    #[error("invalid base64 in item {key}: {reason}")]
    Base64 { key: String, reason: String },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
