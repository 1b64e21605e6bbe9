//! # Sealbox Crypto
//!
//! Hybrid encryption primitives for sealbox: AES-256-GCM payload encryption
//! with RSA-OAEP key wrapping, plus RSA key-pair generation, self-signed
//! certificates, and public-key fingerprints.
//!
//! This crate contains no I/O and no cluster awareness. It is pure
//! computation over key material and byte strings.
//!
//! ## Key Types
//!
//! - [`Fingerprint`] - Stable digest identifying a public key
//! - [`CryptoError`] - Crypto-layer failure taxonomy
//!
//! ## The hybrid scheme
//!
//! RSA alone cannot encrypt large payloads. Each encryption draws a fresh
//! 32-byte session key, seals the plaintext with AES-256-GCM under that key,
//! and wraps the session key with RSA-OAEP(SHA-256). The OAEP label binds
//! the ciphertext to a namespace/name/scope identity so it cannot be
//! replayed under a different one.

pub mod error;
pub mod fingerprint;
pub mod hybrid;
pub mod keys;

pub use error::{CryptoError, Result};
pub use fingerprint::Fingerprint;
pub use hybrid::{hybrid_decrypt, hybrid_encrypt, SESSION_KEY_BYTES};
pub use keys::{
    cert_chain_to_pem, cert_not_before, generate_key_pair, parse_cert_chain,
    private_key_from_pem, private_key_to_pem, self_signed_certificate,
};
