//! The key registry: every sealing key the controller has ever generated
//! or discovered, plus the pointer to the most recent one.
//!
//! Keys are never discarded once registered; old ciphertexts must keep
//! decrypting after rotation. New encryptions always use the most-recent
//! key, chosen by certificate ordering time rather than discovery order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_cert::Certificate;

use sealbox_cluster::Cluster;
use sealbox_core::{ObjectMeta, ResourceKey, Secret};
use sealbox_crypto::{
    cert_chain_to_pem, cert_not_before, generate_key_pair, parse_cert_chain, private_key_from_pem,
    private_key_to_pem, self_signed_certificate, Fingerprint,
};

use crate::config::KeyRenewalConfig;
use crate::error::{ControllerError, Result};

/// Label that marks a secret as a persisted sealing key pair.
pub const SEALED_KEY_LABEL: &str = "sealbox.io/sealed-key";

/// Value of [`SEALED_KEY_LABEL`] on keys eligible for discovery.
pub const SEALED_KEY_ACTIVE: &str = "active";

/// Secret type of persisted key pairs.
const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";
const TLS_KEY_ITEM: &str = "tls.key";
const TLS_CERT_ITEM: &str = "tls.crt";

/// One sealing key: private key, certificate chain, fingerprint, and the
/// ordering time rotation decisions are based on.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// Name of the secret this key pair is persisted under.
    pub name: String,
    pub private_key: RsaPrivateKey,
    pub cert_chain: Vec<Certificate>,
    pub fingerprint: Fingerprint,
    /// The instant rotation decisions order this key by: generation time
    /// for freshly generated keys, the certificate's notBefore (or the
    /// record's creation time) for keys discovered at load.
    pub ordering_time: DateTime<Utc>,
}

/// Mutex-guarded key collection. The lock is only ever held for map and
/// pointer operations; key generation happens before it is taken.
pub struct KeyRegistry {
    cluster: Arc<dyn Cluster>,
    config: KeyRenewalConfig,
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    keys: HashMap<Fingerprint, KeyMaterial>,
    most_recent: Option<Fingerprint>,
}

impl KeyRegistry {
    /// Create an empty registry persisting keys through `cluster`.
    pub fn new(cluster: Arc<dyn Cluster>, config: KeyRenewalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cluster,
            config,
            inner: Mutex::new(RegistryInner {
                keys: HashMap::new(),
                most_recent: None,
            }),
        })
    }

    /// Generate a fresh key pair, persist it, and register it as the new
    /// most-recent key.
    ///
    /// The slow RSA work runs on a blocking thread before the registry lock
    /// is ever touched. If persistence fails the key is not registered:
    /// an in-memory-only key would vanish on restart and orphan every
    /// ciphertext sealed under it.
    pub async fn generate_key(&self) -> Result<Fingerprint> {
        let key_size = self.config.key_size;
        let validity = self.config.validity;
        let common_name = self.config.common_name.clone();

        let (private_key, cert) = tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            let key = generate_key_pair(&mut rng, key_size)?;
            let cert = self_signed_certificate(&key, validity, &common_name)?;
            Ok::<_, ControllerError>((key, cert))
        })
        .await
        .map_err(|e| ControllerError::Task(e.to_string()))??;

        let cert_chain = vec![cert];
        let stored = self.persist_key(&private_key, &cert_chain).await?;

        let fingerprint = Fingerprint::of_public_key(&private_key.to_public_key())?;
        // Ordered by generation time, not the certificate's notBefore: the
        // certificate only has second precision, and a rotation moments
        // after the previous one must still advance the pointer.
        let ordering_time = Utc::now();
        self.register_key(KeyMaterial {
            name: stored.metadata.name.clone(),
            private_key,
            cert_chain,
            fingerprint,
            ordering_time,
        });

        tracing::info!(
            name = %stored.metadata.name,
            fingerprint = %fingerprint,
            "generated new sealing key"
        );
        Ok(fingerprint)
    }

    async fn persist_key(
        &self,
        private_key: &RsaPrivateKey,
        cert_chain: &[Certificate],
    ) -> Result<Secret> {
        let key_pem = private_key_to_pem(private_key)?;
        let cert_pem = cert_chain_to_pem(cert_chain)?;

        let mut labels = self.config.extra_labels.clone();
        labels.insert(SEALED_KEY_LABEL.to_string(), SEALED_KEY_ACTIVE.to_string());

        let secret = Secret {
            metadata: ObjectMeta {
                namespace: self.config.namespace.clone(),
                generate_name: format!("{}-", self.config.key_prefix),
                labels,
                annotations: self.config.extra_annotations.clone(),
                ..Default::default()
            },
            secret_type: TLS_SECRET_TYPE.to_string(),
            data: BTreeMap::from([
                (TLS_KEY_ITEM.to_string(), key_pem.into_bytes().into()),
                (TLS_CERT_ITEM.to_string(), cert_pem.into_bytes().into()),
            ]),
            ..Default::default()
        };
        Ok(self.cluster.create_secret(&secret).await?)
    }

    /// Register a key, idempotently by fingerprint.
    ///
    /// The most-recent pointer moves only for a strictly later ordering
    /// time, so keys discovered in any order converge to the same result.
    pub fn register_key(&self, material: KeyMaterial) {
        let mut inner = self.inner.lock().unwrap();
        let newer = match inner.most_recent {
            None => true,
            Some(current) => {
                material.ordering_time
                    > inner
                        .keys
                        .get(&current)
                        .map(|k| k.ordering_time)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC)
            }
        };
        let fingerprint = material.fingerprint;
        inner.keys.entry(fingerprint).or_insert(material);
        if newer {
            inner.most_recent = Some(fingerprint);
        }
    }

    /// Load every persisted key pair carrying the discovery label.
    ///
    /// Unparseable records are skipped with a warning: one corrupt key
    /// must not keep the controller from starting with the rest.
    pub async fn load_existing_keys(&self) -> Result<usize> {
        let secrets = self
            .cluster
            .list_secrets_with_label(&self.config.namespace, SEALED_KEY_LABEL, SEALED_KEY_ACTIVE)
            .await?;

        let mut materials = Vec::new();
        for secret in &secrets {
            match parse_key_secret(secret) {
                Ok(material) => materials.push(material),
                Err(err) => {
                    tracing::warn!(
                        key = %ResourceKey::of(&secret.metadata),
                        error = %err,
                        "skipping unreadable sealing key"
                    );
                }
            }
        }

        // Ascending order keeps the most-recent pointer converging on the
        // latest key even though register_key is order-independent anyway.
        materials.sort_by_key(|m| m.ordering_time);
        let count = materials.len();
        for material in materials {
            tracing::info!(
                name = %material.name,
                fingerprint = %material.fingerprint,
                "registered existing sealing key"
            );
            self.register_key(material);
        }
        Ok(count)
    }

    /// The renewal configuration this registry was built with.
    pub fn config(&self) -> &KeyRenewalConfig {
        &self.config
    }

    /// Whether any key is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().keys.is_empty()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().keys.len()
    }

    /// Ordering time of the most-recent key.
    pub fn most_recent_ordering_time(&self) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().unwrap();
        inner
            .most_recent
            .and_then(|fp| inner.keys.get(&fp))
            .map(|k| k.ordering_time)
    }

    /// The most-recent key's private half.
    pub fn latest_private_key(&self) -> Result<RsaPrivateKey> {
        self.with_latest(|k| k.private_key.clone())
    }

    /// The most-recent key's public half, for new encryptions.
    pub fn latest_public_key(&self) -> Result<RsaPublicKey> {
        self.with_latest(|k| k.private_key.to_public_key())
    }

    /// The most-recent key's certificate chain.
    pub fn latest_cert_chain(&self) -> Result<Vec<Certificate>> {
        self.with_latest(|k| k.cert_chain.clone())
    }

    /// The most-recent key's certificate chain, PEM-encoded for serving.
    pub fn cert_chain_pem(&self) -> Result<String> {
        let chain = self.latest_cert_chain()?;
        Ok(cert_chain_to_pem(&chain)?)
    }

    /// Snapshot of every private key, for decrypt attempts.
    pub fn all_private_keys(&self) -> HashMap<Fingerprint, RsaPrivateKey> {
        let inner = self.inner.lock().unwrap();
        inner
            .keys
            .iter()
            .map(|(fp, k)| (*fp, k.private_key.clone()))
            .collect()
    }

    fn with_latest<T>(&self, f: impl FnOnce(&KeyMaterial) -> T) -> Result<T> {
        let inner = self.inner.lock().unwrap();
        inner
            .most_recent
            .and_then(|fp| inner.keys.get(&fp))
            .map(f)
            .ok_or(ControllerError::EmptyRegistry)
    }
}

/// Parse a persisted TLS-type secret back into key material.
fn parse_key_secret(secret: &Secret) -> Result<KeyMaterial> {
    let key_pem = secret
        .data
        .get(TLS_KEY_ITEM)
        .ok_or_else(|| missing_item(secret, TLS_KEY_ITEM))?;
    let cert_pem = secret
        .data
        .get(TLS_CERT_ITEM)
        .ok_or_else(|| missing_item(secret, TLS_CERT_ITEM))?;

    let key_pem = std::str::from_utf8(key_pem.as_bytes())
        .map_err(|_| missing_item(secret, TLS_KEY_ITEM))?;
    let private_key = private_key_from_pem(key_pem)?;
    let cert_chain = parse_cert_chain(cert_pem.as_bytes())?;

    let fingerprint = Fingerprint::of_public_key(&private_key.to_public_key())?;
    // Legacy records carry certificates without a meaningful notBefore;
    // fall back to when the record itself was created.
    let not_before = cert_not_before(&cert_chain[0]);
    let ordering_time = if not_before.timestamp() > 0 {
        not_before
    } else {
        secret.metadata.creation_timestamp.unwrap_or(not_before)
    };

    Ok(KeyMaterial {
        name: secret.metadata.name.clone(),
        private_key,
        cert_chain,
        fingerprint,
        ordering_time,
    })
}

fn missing_item(secret: &Secret, item: &str) -> ControllerError {
    ControllerError::Cluster(sealbox_cluster::ClusterError::Invalid(format!(
        "key secret {} has no usable {item}",
        ResourceKey::of(&secret.metadata)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::thread_rng;
    use sealbox_cluster::MemoryCluster;

    fn test_config() -> KeyRenewalConfig {
        KeyRenewalConfig {
            key_size: 2048,
            namespace: "sealbox-system".to_string(),
            ..Default::default()
        }
    }

    fn registry() -> KeyRegistry {
        KeyRegistry::new(Arc::new(MemoryCluster::new()), test_config()).unwrap()
    }

    fn material(ordering_time: DateTime<Utc>) -> KeyMaterial {
        let mut rng = thread_rng();
        let private_key = generate_key_pair(&mut rng, 1024).unwrap();
        let cert = self_signed_certificate(
            &private_key,
            std::time::Duration::from_secs(3600),
            "test",
        )
        .unwrap();
        let fingerprint = Fingerprint::of_public_key(&private_key.to_public_key()).unwrap();
        KeyMaterial {
            name: format!("key-{}", ordering_time.timestamp()),
            private_key,
            cert_chain: vec![cert],
            fingerprint,
            ordering_time,
        }
    }

    #[test]
    fn most_recent_follows_ordering_time_not_registration_order() {
        let older = material(Utc::now() - Duration::days(2));
        let newer = material(Utc::now() - Duration::days(1));

        // Newest first: the pointer must not move backwards.
        let reg = registry();
        reg.register_key(newer.clone());
        reg.register_key(older.clone());
        assert_eq!(
            reg.most_recent_ordering_time().unwrap(),
            newer.ordering_time
        );

        // Oldest first converges to the same answer.
        let reg = registry();
        reg.register_key(older.clone());
        reg.register_key(newer.clone());
        assert_eq!(
            reg.most_recent_ordering_time().unwrap(),
            newer.ordering_time
        );
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn register_is_idempotent_by_fingerprint() {
        let reg = registry();
        let m = material(Utc::now());
        reg.register_key(m.clone());
        reg.register_key(m);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn empty_registry_refuses_latest() {
        let reg = registry();
        assert!(matches!(
            reg.latest_private_key(),
            Err(ControllerError::EmptyRegistry)
        ));
        assert!(reg.most_recent_ordering_time().is_none());
    }

    #[tokio::test]
    async fn generate_persists_then_registers() {
        let cluster = Arc::new(MemoryCluster::new());
        let reg = KeyRegistry::new(cluster.clone(), test_config()).unwrap();

        let fp = reg.generate_key().await.unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(
            Fingerprint::of_public_key(&reg.latest_public_key().unwrap()).unwrap(),
            fp
        );

        let persisted = cluster
            .list_secrets_with_label("sealbox-system", SEALED_KEY_LABEL, SEALED_KEY_ACTIVE)
            .await
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert!(persisted[0].metadata.name.starts_with("sealbox-key-"));
        assert_eq!(persisted[0].secret_type, TLS_SECRET_TYPE);
        assert!(persisted[0].data.contains_key(TLS_KEY_ITEM));
        assert!(persisted[0].data.contains_key(TLS_CERT_ITEM));
    }

    #[tokio::test]
    async fn load_round_trips_generated_keys() {
        let cluster = Arc::new(MemoryCluster::new());
        let reg = KeyRegistry::new(cluster.clone(), test_config()).unwrap();
        reg.generate_key().await.unwrap();
        reg.generate_key().await.unwrap();

        let reloaded = KeyRegistry::new(cluster, test_config()).unwrap();
        let count = reloaded.load_existing_keys().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.latest_private_key().is_ok());
    }

    #[tokio::test]
    async fn rapid_generations_always_advance_most_recent() {
        let cluster = Arc::new(MemoryCluster::new());
        let reg = KeyRegistry::new(cluster, test_config()).unwrap();

        // Back-to-back generations land within the same certificate
        // second; the later one must still become most recent.
        reg.generate_key().await.unwrap();
        let second = reg.generate_key().await.unwrap();
        assert_eq!(
            Fingerprint::of_public_key(&reg.latest_public_key().unwrap()).unwrap(),
            second
        );
    }

    #[tokio::test]
    async fn load_skips_unreadable_records() {
        let cluster = Arc::new(MemoryCluster::new());
        let reg = KeyRegistry::new(cluster.clone(), test_config()).unwrap();
        reg.generate_key().await.unwrap();

        // A labeled secret with garbage instead of a key.
        let mut bogus = Secret::default();
        bogus.metadata.namespace = "sealbox-system".to_string();
        bogus.metadata.name = "sealbox-key-corrupt".to_string();
        bogus.metadata.labels.insert(
            SEALED_KEY_LABEL.to_string(),
            SEALED_KEY_ACTIVE.to_string(),
        );
        bogus
            .data
            .insert(TLS_KEY_ITEM.to_string(), b"not a pem".to_vec().into());
        cluster.seed_secret(bogus);

        let reloaded = KeyRegistry::new(cluster, test_config()).unwrap();
        assert_eq!(reloaded.load_existing_keys().await.unwrap(), 1);
        assert_eq!(reloaded.len(), 1);
    }

    #[tokio::test]
    async fn extra_labels_cannot_override_discovery_label() {
        let mut config = test_config();
        config
            .extra_labels
            .insert(SEALED_KEY_LABEL.to_string(), "inactive".to_string());
        config
            .extra_labels
            .insert("team".to_string(), "platform".to_string());
        let cluster = Arc::new(MemoryCluster::new());
        let reg = KeyRegistry::new(cluster.clone(), config).unwrap();

        reg.generate_key().await.unwrap();
        let persisted = cluster
            .list_secrets_with_label("sealbox-system", SEALED_KEY_LABEL, SEALED_KEY_ACTIVE)
            .await
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(
            persisted[0].metadata.labels.get("team").map(String::as_str),
            Some("platform")
        );
    }
}
