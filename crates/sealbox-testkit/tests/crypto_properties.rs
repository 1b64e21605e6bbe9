//! Property tests for the hybrid crypto layer and the seal/unseal model.

use std::collections::HashMap;

use proptest::prelude::*;
use rand::thread_rng;
use rsa::RsaPrivateKey;

use sealbox_core::{ObjectMeta, SealedSecret, Secret, UnsealOptions};
use sealbox_crypto::{hybrid_decrypt, hybrid_encrypt, Fingerprint};
use sealbox_testkit::generators::{label, plaintext, secret_items};
use sealbox_testkit::shared_test_key;

fn keyring(keys: &[&RsaPrivateKey]) -> HashMap<Fingerprint, RsaPrivateKey> {
    keys.iter()
        .map(|key| {
            let fp = Fingerprint::of_public_key(&key.to_public_key()).unwrap();
            (fp, (*key).clone())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn round_trip(plain in plaintext(256), label in label(64)) {
        let key = shared_test_key(0);
        let ciphertext =
            hybrid_encrypt(&mut thread_rng(), &key.to_public_key(), &plain, &label).unwrap();
        let recovered = hybrid_decrypt(&keyring(&[key]), &ciphertext, &label).unwrap();
        prop_assert_eq!(recovered, plain);
    }

    #[test]
    fn label_binding(plain in plaintext(64), l1 in label(64), l2 in label(64)) {
        prop_assume!(l1 != l2);
        let key = shared_test_key(0);
        let ciphertext =
            hybrid_encrypt(&mut thread_rng(), &key.to_public_key(), &plain, &l1).unwrap();
        prop_assert!(hybrid_decrypt(&keyring(&[key]), &ciphertext, &l2).is_err());
    }

    #[test]
    fn multi_key_decrypt(plain in plaintext(64)) {
        let k1 = shared_test_key(0);
        let k2 = shared_test_key(1);
        let ciphertext =
            hybrid_encrypt(&mut thread_rng(), &k2.to_public_key(), &plain, b"l").unwrap();

        // Succeeds with the sealing key present, in either set order.
        let recovered = hybrid_decrypt(&keyring(&[k1, k2]), &ciphertext, b"l").unwrap();
        prop_assert_eq!(&recovered, &plain);
        let recovered = hybrid_decrypt(&keyring(&[k2, k1]), &ciphertext, b"l").unwrap();
        prop_assert_eq!(&recovered, &plain);

        // Fails when only the other key is known.
        prop_assert!(hybrid_decrypt(&keyring(&[k1]), &ciphertext, b"l").is_err());
    }

    #[test]
    fn seal_unseal_preserves_items(items in secret_items(6)) {
        let key = shared_test_key(0);
        let secret = Secret {
            metadata: ObjectMeta {
                namespace: "myns".to_string(),
                name: "testsecret".to_string(),
                ..Default::default()
            },
            data: items
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
            ..Default::default()
        };

        let sealed =
            SealedSecret::seal(&mut thread_rng(), &key.to_public_key(), &secret).unwrap();
        let unsealed = sealed
            .unseal(&keyring(&[key]), UnsealOptions::default())
            .unwrap();

        for (k, v) in &items {
            prop_assert_eq!(unsealed.data[k].as_bytes(), v.as_slice());
        }
        prop_assert_eq!(unsealed.data.len(), items.len());
    }

    #[test]
    fn truncated_ciphertext_never_panics(plain in plaintext(64), cut in 0usize..16) {
        let key = shared_test_key(0);
        let mut ciphertext =
            hybrid_encrypt(&mut thread_rng(), &key.to_public_key(), &plain, b"l").unwrap();
        let keep = ciphertext.len().saturating_sub(cut + 1);
        ciphertext.truncate(keep);
        prop_assert!(hybrid_decrypt(&keyring(&[key]), &ciphertext, b"l").is_err());
    }
}
