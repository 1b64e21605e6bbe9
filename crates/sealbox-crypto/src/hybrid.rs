//! Hybrid AES-256-GCM + RSA-OAEP encryption.
//!
//! Wire format: `[u16 BE wrapped-key length][RSA-OAEP wrapped session key]
//! [AES-GCM sealed payload]`. The session key is generated fresh for every
//! encryption and never reused, which is what makes the all-zero GCM nonce
//! sound.

use std::collections::HashMap;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rsa::rand_core::CryptoRngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{CryptoError, Result};
use crate::fingerprint::Fingerprint;

/// Size in bytes of the single-use symmetric session key.
pub const SESSION_KEY_BYTES: usize = 32;

/// AES-GCM nonce size in bytes.
const NONCE_BYTES: usize = 12;

fn oaep_padding(label: &[u8]) -> Result<Oaep> {
    let label = std::str::from_utf8(label).map_err(|_| CryptoError::LabelNotUtf8)?;
    Ok(Oaep::new_with_label::<Sha256, _>(label))
}

/// Encrypt `plaintext` for `public_key`, binding the result to `label`.
///
/// The label must be reproduced exactly at decryption time; it carries the
/// namespace/name/scope identity the ciphertext is sealed for.
pub fn hybrid_encrypt<R: CryptoRngCore>(
    rng: &mut R,
    public_key: &RsaPublicKey,
    plaintext: &[u8],
    label: &[u8],
) -> Result<Vec<u8>> {
    let mut session_key = [0u8; SESSION_KEY_BYTES];
    rng.fill_bytes(&mut session_key);

    let cipher = Aes256Gcm::new_from_slice(&session_key).map_err(|_| CryptoError::Aead)?;

    let wrapped_key = public_key.encrypt(rng, oaep_padding(label)?, &session_key)?;

    // Length prefix so the pieces can be separated again.
    let mut ciphertext = Vec::with_capacity(2 + wrapped_key.len() + plaintext.len() + 16);
    ciphertext.extend_from_slice(&(wrapped_key.len() as u16).to_be_bytes());
    ciphertext.extend_from_slice(&wrapped_key);

    // Session key is single-use, so the zero nonce is safe.
    let zero_nonce = Nonce::from([0u8; NONCE_BYTES]);
    let sealed = cipher
        .encrypt(&zero_nonce, plaintext)
        .map_err(|_| CryptoError::Aead)?;
    ciphertext.extend_from_slice(&sealed);

    Ok(ciphertext)
}

/// Decrypt `ciphertext` by trying every candidate private key.
///
/// Keys are indexed by fingerprint and tried in map iteration order; a
/// ciphertext sealed under a rotated-out key still decrypts as long as the
/// key is retained. The GCM tag authenticates the payload before any
/// plaintext is accepted, so a structurally valid OAEP unwrap with a wrong
/// key cannot produce a false accept.
pub fn hybrid_decrypt(
    private_keys: &HashMap<Fingerprint, RsaPrivateKey>,
    ciphertext: &[u8],
    label: &[u8],
) -> Result<Vec<u8>> {
    for private_key in private_keys.values() {
        if let Ok(plaintext) = single_decrypt(private_key, ciphertext, label) {
            return Ok(plaintext);
        }
    }
    Err(CryptoError::NoDecryptionKey)
}

fn single_decrypt(
    private_key: &RsaPrivateKey,
    ciphertext: &[u8],
    label: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < 2 {
        return Err(CryptoError::TooShort);
    }
    let wrapped_len = u16::from_be_bytes([ciphertext[0], ciphertext[1]]) as usize;
    if ciphertext.len() < wrapped_len + 2 {
        return Err(CryptoError::TooShort);
    }

    let wrapped_key = &ciphertext[2..wrapped_len + 2];
    let sealed = &ciphertext[wrapped_len + 2..];

    let session_key = private_key.decrypt(oaep_padding(label)?, wrapped_key)?;

    let cipher = Aes256Gcm::new_from_slice(&session_key).map_err(|_| CryptoError::Aead)?;
    let zero_nonce = Nonce::from([0u8; NONCE_BYTES]);
    cipher
        .decrypt(&zero_nonce, sealed)
        .map_err(|_| CryptoError::Aead)
}
