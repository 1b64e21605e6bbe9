//! Test fixtures: a memory cluster wired to a key registry and a
//! controller, ready to seal and reconcile.

use std::sync::Arc;
use std::time::Duration;

use rand::thread_rng;
use rsa::RsaPrivateKey;

use sealbox_cluster::{Cluster, MemoryCluster};
use sealbox_controller::{Controller, ControllerConfig, KeyRegistry, KeyRenewalConfig};
use sealbox_core::{ObjectMeta, ResourceKey, SealedSecret, Secret};
use sealbox_crypto::generate_key_pair;

/// Key size for fixtures. Small enough to keep test suites fast, large
/// enough for OAEP with SHA-256 to fit a wrapped session key.
pub const TEST_KEY_BITS: usize = 1024;

/// A complete in-process sealbox: memory cluster, key registry with one
/// freshly generated key, and a controller over both.
pub struct TestFixture {
    pub cluster: Arc<MemoryCluster>,
    pub registry: Arc<KeyRegistry>,
    pub controller: Arc<Controller>,
}

impl TestFixture {
    /// Build a fixture with one generated key and default controller
    /// behaviour.
    pub async fn new() -> Self {
        Self::with_config(ControllerConfig::default()).await
    }

    pub async fn with_config(config: ControllerConfig) -> Self {
        let cluster = Arc::new(MemoryCluster::new());
        let registry = Arc::new(
            KeyRegistry::new(
                cluster.clone() as Arc<dyn Cluster>,
                KeyRenewalConfig {
                    key_size: TEST_KEY_BITS,
                    ..Default::default()
                },
            )
            .expect("default renewal config"),
        );
        registry
            .generate_key()
            .await
            .expect("generating fixture key");
        let controller = Controller::new(cluster.clone(), registry.clone(), config);
        Self {
            cluster,
            registry,
            controller,
        }
    }

    /// Seal a secret under the registry's most-recent key.
    pub fn seal(&self, secret: &Secret) -> SealedSecret {
        let public_key = self
            .registry
            .latest_public_key()
            .expect("fixture has a key");
        SealedSecret::seal(&mut thread_rng(), &public_key, secret).expect("sealing fixture secret")
    }

    /// Wait until the controller has produced the given secret.
    ///
    /// Panics after `timeout`; reconciliation in a fixture is local and
    /// should complete in milliseconds.
    pub async fn wait_for_secret(&self, key: &ResourceKey, timeout: Duration) -> Secret {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(secret) = self
                .cluster
                .get_secret(key)
                .await
                .expect("memory cluster read")
            {
                return secret;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("secret {key} was never produced");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until an event with the given reason is recorded for `key`.
    pub async fn wait_for_event(&self, key: &ResourceKey, reason: &str, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self
                .cluster
                .events_for(key)
                .iter()
                .any(|e| e.reason == reason)
            {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("event {reason} for {key} was never recorded");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A plain secret with string data items.
pub fn plain_secret(namespace: &str, name: &str, items: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        },
        data: items
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_bytes().into()))
            .collect(),
        ..Default::default()
    }
}

/// A pre-generated RSA key shared across property-test cases.
///
/// Key generation dominates test time; properties that only need "some
/// valid key pair" reuse these instead of generating per case.
pub fn shared_test_key(index: usize) -> &'static RsaPrivateKey {
    use std::sync::OnceLock;
    static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| {
        let mut rng = thread_rng();
        (0..3)
            .map(|_| generate_key_pair(&mut rng, TEST_KEY_BITS).expect("test key generation"))
            .collect()
    });
    &keys[index % keys.len()]
}
