//! Public-key fingerprints.
//!
//! A fingerprint is the SHA-256 digest of a public key's DER-encoded
//! SubjectPublicKeyInfo. It is the stable lookup key for the key registry,
//! independent of whatever name the key pair was persisted under.

use std::fmt;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Result};

/// A 32-byte SHA-256 fingerprint of a public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of an RSA public key.
    pub fn of_public_key(public_key: &RsaPublicKey) -> Result<Self> {
        let der = public_key
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let digest = Sha256::digest(der.as_bytes());
        Ok(Self(digest.into()))
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    /// Renders as `SHA256:<unpadded base64>`, the conventional form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SHA256:{}", STANDARD_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..16])
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;
    use rsa::RsaPrivateKey;

    #[test]
    fn fingerprint_is_stable_for_same_key() {
        let key = RsaPrivateKey::new(&mut thread_rng(), 1024).unwrap();
        let f1 = Fingerprint::of_public_key(&key.to_public_key()).unwrap();
        let f2 = Fingerprint::of_public_key(&key.to_public_key()).unwrap();
        assert_eq!(f1, f2);
    }

    #[test]
    fn fingerprint_differs_between_keys() {
        let mut rng = thread_rng();
        let k1 = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let k2 = RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let f1 = Fingerprint::of_public_key(&k1.to_public_key()).unwrap();
        let f2 = Fingerprint::of_public_key(&k2.to_public_key()).unwrap();
        assert_ne!(f1, f2);
    }

    #[test]
    fn display_is_prefixed() {
        let fp = Fingerprint::from_bytes([0x42; 32]);
        let s = fp.to_string();
        assert!(s.starts_with("SHA256:"));
        assert!(!s.ends_with('='));
    }
}
