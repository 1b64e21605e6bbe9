//! In-memory implementation of the Cluster trait.
//!
//! Backs tests and single-process deployments. Same visible semantics as a
//! real API server for the calls the controller makes: generated names,
//! assigned uids, immutability enforcement, and watch fan-out.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rand::Rng;
use sealbox_core::{ApiObject, ResourceKey, SealedSecret, SealedSecretStatus, Secret};
use tokio::sync::broadcast;

use crate::error::{ClusterError, Result};
use crate::traits::{Cluster, Event, WatchEvent};

const WATCH_BUFFER: usize = 256;

/// Alphabet used for generated name suffixes. Vowels and lookalike
/// characters are excluded so generated names never spell anything.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";
const SUFFIX_LEN: usize = 5;

/// In-memory cluster implementation.
///
/// All data is lost when dropped. Thread-safe via RwLock; no lock is held
/// across an await point.
pub struct MemoryCluster {
    inner: RwLock<MemoryClusterInner>,
    watch_tx: broadcast::Sender<WatchEvent>,
}

struct MemoryClusterInner {
    sealed_secrets: BTreeMap<ResourceKey, SealedSecret>,
    secrets: BTreeMap<ResourceKey, Secret>,
    events: Vec<Event>,
    next_uid: u64,
}

impl MemoryCluster {
    /// Create a new empty in-memory cluster.
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            inner: RwLock::new(MemoryClusterInner {
                sealed_secrets: BTreeMap::new(),
                secrets: BTreeMap::new(),
                events: Vec::new(),
                next_uid: 1,
            }),
            watch_tx,
        }
    }

    /// Create or replace a sealed secret, as an external client would.
    ///
    /// Assigns a uid on first creation and notifies watchers.
    pub fn apply_sealed_secret(&self, mut sealed: SealedSecret) -> SealedSecret {
        let key = ResourceKey::of(&sealed.metadata);
        {
            let mut inner = self.inner.write().unwrap();
            match inner.sealed_secrets.get(&key) {
                Some(existing) => {
                    sealed.metadata.uid = existing.metadata.uid.clone();
                    sealed.metadata.generation = existing.metadata.generation + 1;
                }
                None => {
                    sealed.metadata.uid = inner.assign_uid();
                    sealed.metadata.generation = 1;
                }
            }
            inner.sealed_secrets.insert(key, sealed.clone());
        }
        self.notify(WatchEvent::Applied(ApiObject::SealedSecret(sealed.clone())));
        sealed
    }

    /// Delete a sealed secret and notify watchers.
    pub fn delete_sealed_secret(&self, key: &ResourceKey) -> Option<SealedSecret> {
        let removed = self.inner.write().unwrap().sealed_secrets.remove(key);
        if let Some(sealed) = &removed {
            self.notify(WatchEvent::Deleted(ApiObject::SealedSecret(sealed.clone())));
        }
        removed
    }

    /// Insert a secret directly, bypassing create semantics. Test seam for
    /// pre-existing secrets the controller did not make.
    pub fn seed_secret(&self, mut secret: Secret) -> Secret {
        let key = ResourceKey::of(&secret.metadata);
        let mut inner = self.inner.write().unwrap();
        if secret.metadata.uid.is_empty() {
            secret.metadata.uid = inner.assign_uid();
        }
        inner.secrets.insert(key, secret.clone());
        secret
    }

    /// All events recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.inner.read().unwrap().events.clone()
    }

    /// Events recorded about the given object.
    pub fn events_for(&self, key: &ResourceKey) -> Vec<Event> {
        self.inner
            .read()
            .unwrap()
            .events
            .iter()
            .filter(|e| &e.regarding == key)
            .cloned()
            .collect()
    }

    fn notify(&self, event: WatchEvent) {
        // An error here only means no subscriber is listening.
        let _ = self.watch_tx.send(event);
    }
}

impl MemoryClusterInner {
    fn assign_uid(&mut self) -> String {
        let uid = format!("uid-{:04}", self.next_uid);
        self.next_uid += 1;
        uid
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn get_sealed_secret(&self, key: &ResourceKey) -> Result<Option<SealedSecret>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.sealed_secrets.get(key).cloned())
    }

    async fn list_sealed_secrets(&self) -> Result<Vec<SealedSecret>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.sealed_secrets.values().cloned().collect())
    }

    async fn update_sealed_secret_status(
        &self,
        key: &ResourceKey,
        status: SealedSecretStatus,
    ) -> Result<SealedSecret> {
        let updated = {
            let mut inner = self.inner.write().unwrap();
            let sealed = inner.sealed_secrets.get_mut(key).ok_or_else(|| {
                ClusterError::NotFound {
                    kind: "SealedSecret",
                    key: key.clone(),
                }
            })?;
            sealed.status = Some(status);
            sealed.clone()
        };
        self.notify(WatchEvent::Applied(ApiObject::SealedSecret(
            updated.clone(),
        )));
        Ok(updated)
    }

    async fn get_secret(&self, key: &ResourceKey) -> Result<Option<Secret>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.secrets.get(key).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let mut stored = secret.clone();
        {
            let mut inner = self.inner.write().unwrap();

            if stored.metadata.name.is_empty() {
                if stored.metadata.generate_name.is_empty() {
                    return Err(ClusterError::Invalid(
                        "secret needs a name or generateName".to_string(),
                    ));
                }
                stored.metadata.name = loop {
                    let candidate =
                        format!("{}{}", stored.metadata.generate_name, random_suffix());
                    let key = ResourceKey::new(stored.metadata.namespace.clone(), &candidate);
                    if !inner.secrets.contains_key(&key) {
                        break candidate;
                    }
                };
            }

            let key = ResourceKey::of(&stored.metadata);
            if inner.secrets.contains_key(&key) {
                return Err(ClusterError::AlreadyExists {
                    kind: "Secret",
                    key,
                });
            }
            stored.metadata.uid = inner.assign_uid();
            inner.secrets.insert(key, stored.clone());
        }
        self.notify(WatchEvent::Applied(ApiObject::Secret(stored.clone())));
        Ok(stored)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret> {
        let key = ResourceKey::of(&secret.metadata);
        let stored = {
            let mut inner = self.inner.write().unwrap();
            let existing = inner.secrets.get(&key).ok_or_else(|| ClusterError::NotFound {
                kind: "Secret",
                key: key.clone(),
            })?;

            if existing.immutable == Some(true)
                && (secret.data != existing.data
                    || secret.secret_type != existing.secret_type
                    || secret.immutable != Some(true))
            {
                return Err(ClusterError::Immutable { key });
            }

            let mut stored = secret.clone();
            stored.metadata.uid = existing.metadata.uid.clone();
            inner.secrets.insert(key, stored.clone());
            stored
        };
        self.notify(WatchEvent::Applied(ApiObject::Secret(stored.clone())));
        Ok(stored)
    }

    async fn delete_secret(&self, key: &ResourceKey) -> Result<()> {
        let removed = self.inner.write().unwrap().secrets.remove(key);
        match removed {
            Some(secret) => {
                self.notify(WatchEvent::Deleted(ApiObject::Secret(secret)));
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                kind: "Secret",
                key: key.clone(),
            }),
        }
    }

    async fn list_secrets_with_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<Secret>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .secrets
            .values()
            .filter(|s| {
                s.metadata.namespace == namespace
                    && s.metadata.labels.get(label).map(String::as_str) == Some(value)
            })
            .cloned()
            .collect())
    }

    async fn record_event(&self, event: Event) -> Result<()> {
        tracing::debug!(
            regarding = %event.regarding,
            reason = %event.reason,
            "event: {}",
            event.message
        );
        self.inner.write().unwrap().events.push(event);
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}
