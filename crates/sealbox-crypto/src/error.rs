//! Error types for the sealbox crypto layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while sealing or unsealing data.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The ciphertext cannot contain a valid length prefix and wrapped key.
    #[error("sealed data is too short")]
    TooShort,

    /// No candidate private key could unwrap the session key.
    #[error("no key could decrypt secret")]
    NoDecryptionKey,

    /// The OAEP label is not valid UTF-8.
    #[error("encryption label is not valid UTF-8")]
    LabelNotUtf8,

    /// Authenticated decryption failed: tampered ciphertext or wrong label.
    #[error("authenticated decryption failed")]
    Aead,

    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key encoding error: {0}")]
    KeyEncoding(String),

    #[error("certificate error: {0}")]
    Certificate(String),
}
