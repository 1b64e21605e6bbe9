//! Cluster trait: the abstract interface to the resource API.
//!
//! This trait keeps the controller cluster-agnostic. The in-memory
//! implementation backs tests and single-process deployments; a remote
//! API-server client slots in behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sealbox_core::{ApiObject, ResourceKey, SealedSecret, SealedSecretStatus, Secret};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// An event attached to a resource, for operator visibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Kind of the object the event is about.
    pub regarding_kind: String,
    /// Identity of the object the event is about.
    pub regarding: ResourceKey,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Machine-readable reason, e.g. `Unsealed`.
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A change notification from the cluster.
///
/// `Deleted` carries the last observed object, not just its key: a deleted
/// secret's owner references are what let the controller requeue the sealed
/// secret that owned it.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The object was created or updated.
    Applied(ApiObject),
    /// The object was removed.
    Deleted(ApiObject),
}

/// The Cluster trait: async interface to the resource API.
///
/// # Design Notes
///
/// - **Reads return `Option`**: a missing object is an answer, not an error;
///   `NotFound` errors are reserved for writes against missing objects.
/// - **Immutable enforcement lives here**: updating an immutable secret's
///   data fails with a permanent error the controller will not retry.
/// - **Watches are edge-triggered hints**: consumers resolve the current
///   state by lookup, never by trusting the event payload.
#[async_trait]
pub trait Cluster: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // SealedSecret operations
    // ─────────────────────────────────────────────────────────────────────

    /// Get a sealed secret by key.
    async fn get_sealed_secret(&self, key: &ResourceKey) -> Result<Option<SealedSecret>>;

    /// List all sealed secrets across all namespaces.
    async fn list_sealed_secrets(&self) -> Result<Vec<SealedSecret>>;

    /// Replace the status of a sealed secret.
    ///
    /// Only the status is written; concurrent spec changes are preserved.
    async fn update_sealed_secret_status(
        &self,
        key: &ResourceKey,
        status: SealedSecretStatus,
    ) -> Result<SealedSecret>;

    // ─────────────────────────────────────────────────────────────────────
    // Secret operations
    // ─────────────────────────────────────────────────────────────────────

    /// Get a secret by key.
    async fn get_secret(&self, key: &ResourceKey) -> Result<Option<Secret>>;

    /// Create a secret. Honors `generate_name` when `name` is empty.
    ///
    /// Returns the stored object, with the server-assigned name and uid.
    async fn create_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Replace an existing secret.
    async fn update_secret(&self, secret: &Secret) -> Result<Secret>;

    /// Delete a secret. Fails with `NotFound` if it does not exist.
    async fn delete_secret(&self, key: &ResourceKey) -> Result<()>;

    /// List secrets in a namespace carrying the given label.
    async fn list_secrets_with_label(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<Secret>>;

    // ─────────────────────────────────────────────────────────────────────
    // Observability
    // ─────────────────────────────────────────────────────────────────────

    /// Record an event about an object.
    async fn record_event(&self, event: Event) -> Result<()>;

    /// Subscribe to change notifications for sealed secrets and secrets.
    ///
    /// A slow subscriber may observe `Lagged`; the controller treats that as
    /// a cue to resync by listing.
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;
}
