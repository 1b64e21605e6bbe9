//! The reconciliation engine: watches sealed secrets, unseals them with the
//! registry's keys, and reconciles the result into target secrets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use sealbox_cluster::{Cluster, ClusterError, Event, EventType, WatchEvent};
use sealbox_core::{
    is_annotated_true, update_scope_annotations, update_synced_condition, ApiObject, ResourceKey,
    SealedSecret, SealedSecretSpec, Secret, UnsealOptions, MANAGED_ANNOTATION, PATCH_ANNOTATION,
    SEALED_SECRET_KIND,
};

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ReconcileError, Result};
use crate::queue::WorkQueue;
use crate::registry::KeyRegistry;

const EVENT_UNSEALED: &str = "Unsealed";

/// The controller: one work queue, one worker, one watch intake.
///
/// Reconciliation of a given key is serialized by the queue; keys never
/// block each other beyond sharing the single worker.
pub struct Controller {
    cluster: Arc<dyn Cluster>,
    registry: Arc<KeyRegistry>,
    config: ControllerConfig,
    queue: Arc<WorkQueue<ResourceKey>>,
    /// Last spec seen per key, for suppressing status-only churn.
    observed: Mutex<HashMap<ResourceKey, SealedSecretSpec>>,
}

/// Running controller tasks. Dropping without `shutdown` detaches them.
pub struct ControllerHandle {
    controller: Arc<Controller>,
    shutdown_tx: oneshot::Sender<()>,
    intake: JoinHandle<()>,
    worker: JoinHandle<()>,
}

impl ControllerHandle {
    /// Stop intake, drain the queue, and wait for both tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        self.controller.queue.shut_down();
        let _ = self.intake.await;
        let _ = self.worker.await;
    }
}

impl Controller {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        registry: Arc<KeyRegistry>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let queue = Arc::new(WorkQueue::new(
            config.base_retry_delay,
            config.max_retry_delay,
        ));
        Arc::new(Self {
            cluster,
            registry,
            config,
            queue,
            observed: Mutex::new(HashMap::new()),
        })
    }

    /// Spawn the watch intake and the worker loop.
    pub fn spawn(self: &Arc<Self>) -> ControllerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // Subscribe before returning so no event between spawn and the
        // intake task's first poll is lost.
        let watch = self.cluster.watch();
        let intake = tokio::spawn(Arc::clone(self).run_intake(watch, shutdown_rx));
        let worker = tokio::spawn(Arc::clone(self).run_worker());
        ControllerHandle {
            controller: Arc::clone(self),
            shutdown_tx,
            intake,
            worker,
        }
    }

    /// Validate, without persisting anything, whether a submitted sealed
    /// secret is currently decryptable.
    pub fn attempt_unseal(&self, content: &[u8]) -> Result<bool> {
        let ApiObject::SealedSecret(sealed) = serde_json::from_slice(content)? else {
            return Err(ControllerError::UnexpectedKind);
        };
        Ok(sealed.unseal(&self.registry.all_private_keys(), self.unseal_options()).is_ok())
    }

    /// Re-encrypt a submitted sealed secret under the most-recent key and
    /// return the new resource, without touching cluster state.
    pub fn rotate(&self, content: &[u8]) -> Result<Vec<u8>> {
        let ApiObject::SealedSecret(sealed) = serde_json::from_slice(content)? else {
            return Err(ControllerError::UnexpectedKind);
        };
        let mut secret =
            sealed.unseal(&self.registry.all_private_keys(), self.unseal_options())?;
        // The scope annotations live on the sealed secret, not on the
        // unsealed payload; carry them over so resealing keeps the scope.
        update_scope_annotations(&mut secret.metadata.annotations, sealed.scope());

        let public_key = self.registry.latest_public_key()?;
        let mut rng = rand::thread_rng();
        let resealed = SealedSecret::seal(&mut rng, &public_key, &secret)?;
        Ok(serde_json::to_vec(&ApiObject::SealedSecret(resealed))?)
    }

    /// The current certificate chain, PEM-encoded for serving.
    pub fn cert_chain_pem(&self) -> Result<String> {
        self.registry.cert_chain_pem()
    }

    fn unseal_options(&self) -> UnsealOptions {
        UnsealOptions {
            accept_deprecated_data: self.config.accept_deprecated_data,
        }
    }

    async fn run_intake(
        self: Arc<Self>,
        mut watch: tokio::sync::broadcast::Receiver<WatchEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        if let Err(err) = self.resync().await {
            tracing::error!(error = %err, "initial listing failed");
        }
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = watch.recv() => match event {
                    Ok(event) => self.handle_watch_event(event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "watch lagged, relisting");
                        if let Err(err) = self.resync().await {
                            tracing::error!(error = %err, "relist after lag failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// Whether the configured label selector admits this sealed secret.
    fn selected(&self, sealed: &SealedSecret) -> bool {
        self.config
            .label_selector
            .as_ref()
            .map_or(true, |s| s.matches(&sealed.metadata.labels))
    }

    /// Enqueue every selected sealed secret currently in the cluster.
    async fn resync(&self) -> Result<()> {
        for sealed in self.cluster.list_sealed_secrets().await? {
            if !self.selected(&sealed) {
                continue;
            }
            let key = ResourceKey::of(&sealed.metadata);
            self.observed
                .lock()
                .unwrap()
                .insert(key.clone(), sealed.spec.clone());
            self.queue.add(key);
        }
        Ok(())
    }

    fn handle_watch_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::Applied(ApiObject::SealedSecret(sealed)) => {
                if !self.selected(&sealed) {
                    return;
                }
                let key = ResourceKey::of(&sealed.metadata);
                let mut observed = self.observed.lock().unwrap();
                if observed.get(&key) == Some(&sealed.spec) {
                    // Status-only write; decrypting again would be wasted work.
                    tracing::debug!(key = %key, "spec unchanged, not enqueueing");
                    return;
                }
                observed.insert(key.clone(), sealed.spec);
                drop(observed);
                self.queue.add(key);
            }
            WatchEvent::Deleted(ApiObject::SealedSecret(sealed)) => {
                if !self.selected(&sealed) {
                    return;
                }
                let key = ResourceKey::of(&sealed.metadata);
                self.observed.lock().unwrap().remove(&key);
                // One more pass so legacy-mode cleanup can run.
                self.queue.add(key);
            }
            WatchEvent::Deleted(ApiObject::Secret(secret)) => {
                // Self-healing: losing a secret we produced requeues its
                // sealed secret so it gets recreated.
                if let Some(owner) = secret
                    .controller_owner()
                    .filter(|r| r.kind == SEALED_SECRET_KIND)
                {
                    self.queue.add(ResourceKey::new(
                        secret.metadata.namespace.clone(),
                        owner.name.clone(),
                    ));
                } else if is_annotated_true(&secret.metadata.annotations, MANAGED_ANNOTATION) {
                    self.queue.add(ResourceKey::of(&secret.metadata));
                }
            }
            WatchEvent::Applied(ApiObject::Secret(_)) => {}
        }
    }

    async fn run_worker(self: Arc<Self>) {
        while let Some(key) = self.queue.get().await {
            match self.reconcile(&key).await {
                Ok(()) => self.queue.forget(&key),
                Err(err) if err.is_permanent() => {
                    tracing::warn!(key = %key, error = %err, "permanent failure, not retrying");
                    self.queue.forget(&key);
                }
                Err(err) => {
                    if self.queue.num_requeues(&key) < self.config.max_retries {
                        tracing::warn!(key = %key, error = %err, "transient failure, requeueing");
                        self.queue.add_rate_limited(key.clone());
                    } else {
                        tracing::error!(
                            key = %key,
                            error = %err,
                            "retry budget exhausted, dropping"
                        );
                        self.queue.forget(&key);
                    }
                }
            }
            self.queue.done(&key);
        }
    }

    /// One reconcile pass for one key: resolve the sealed secret, unseal,
    /// apply, then report status and events.
    async fn reconcile(&self, key: &ResourceKey) -> std::result::Result<(), ReconcileError> {
        let Some(sealed) = self.cluster.get_sealed_secret(key).await? else {
            if self.config.old_gc_behavior {
                tracing::info!(key = %key, "sealed secret gone, deleting its secret");
                if let Err(err) = self.cluster.delete_secret(key).await {
                    if !err.is_not_found() {
                        return Err(err.into());
                    }
                }
            }
            self.observed.lock().unwrap().remove(key);
            return Ok(());
        };

        let outcome = self.apply(&sealed).await;
        match &outcome {
            Ok(()) => {
                tracing::info!(key = %key, "sealed secret unsealed");
                self.record(
                    &sealed,
                    EventType::Normal,
                    EVENT_UNSEALED,
                    "SealedSecret unsealed successfully",
                )
                .await;
            }
            Err(err) => {
                self.record(&sealed, EventType::Warning, err.event_reason(), &err.to_string())
                    .await;
            }
        }

        if self.config.update_status {
            self.update_status(&sealed, outcome.as_ref().err()).await;
        }
        outcome
    }

    async fn apply(&self, sealed: &SealedSecret) -> std::result::Result<(), ReconcileError> {
        let secret = sealed
            .unseal(&self.registry.all_private_keys(), self.unseal_options())
            .map_err(ReconcileError::Unseal)?;

        let key = ResourceKey::of(&sealed.metadata);
        let Some(existing) = self.cluster.get_secret(&key).await? else {
            self.cluster
                .create_secret(&secret)
                .await
                .map_err(|err| classify_write(err, &key))?;
            return Ok(());
        };

        let owned = existing.is_controlled_by(
            SEALED_SECRET_KIND,
            &sealed.metadata.name,
            &sealed.metadata.uid,
        );
        let managed = is_annotated_true(&existing.metadata.annotations, MANAGED_ANNOTATION);
        let patch = is_annotated_true(&existing.metadata.annotations, PATCH_ANNOTATION);
        if !owned && !managed && !patch {
            return Err(ReconcileError::NotManaged { key });
        }

        let desired = if patch {
            merge_patched(&existing, &secret, managed)
        } else {
            // Full overwrite: the sealed secret is the source of truth.
            let mut desired = secret;
            desired.metadata.uid = existing.metadata.uid.clone();
            desired.metadata.creation_timestamp = existing.metadata.creation_timestamp;
            desired
        };

        if desired == existing {
            tracing::debug!(key = %key, "secret already up to date");
            return Ok(());
        }
        self.cluster
            .update_secret(&desired)
            .await
            .map_err(|err| classify_write(err, &key))?;
        Ok(())
    }

    async fn update_status(&self, sealed: &SealedSecret, error: Option<&ReconcileError>) {
        let mut status = sealed.status.clone().unwrap_or_default();
        status.observed_generation = Some(sealed.metadata.generation);
        let message = error.map(|e| e.to_string());
        update_synced_condition(&mut status, message.as_deref(), Utc::now());

        if sealed.status.as_ref() == Some(&status) {
            return;
        }
        let key = ResourceKey::of(&sealed.metadata);
        if let Err(err) = self.cluster.update_sealed_secret_status(&key, status).await {
            // Non-fatal: the secret write already happened.
            tracing::warn!(key = %key, error = %err, "status update failed");
        }
    }

    async fn record(&self, sealed: &SealedSecret, event_type: EventType, reason: &str, message: &str) {
        let event = Event {
            regarding_kind: SEALED_SECRET_KIND.to_string(),
            regarding: ResourceKey::of(&sealed.metadata),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self.cluster.record_event(event).await {
            tracing::debug!(error = %err, "event recording failed");
        }
    }
}

/// Merge a decrypted secret into an existing one, patch-style: union data,
/// labels, and annotations with the decrypted values winning on conflict.
/// Owner references are only replaced when the secret is also managed.
fn merge_patched(existing: &Secret, decrypted: &Secret, managed: bool) -> Secret {
    let mut merged = existing.clone();
    for (k, v) in &decrypted.data {
        merged.data.insert(k.clone(), v.clone());
    }
    for (k, v) in &decrypted.metadata.labels {
        merged.metadata.labels.insert(k.clone(), v.clone());
    }
    for (k, v) in &decrypted.metadata.annotations {
        merged.metadata.annotations.insert(k.clone(), v.clone());
    }
    if managed {
        merged.metadata.owner_references = decrypted.metadata.owner_references.clone();
    }
    merged
}

fn classify_write(err: ClusterError, key: &ResourceKey) -> ReconcileError {
    match err {
        ClusterError::Immutable { .. } => ReconcileError::Immutable { key: key.clone() },
        other => ReconcileError::Cluster(other),
    }
}
