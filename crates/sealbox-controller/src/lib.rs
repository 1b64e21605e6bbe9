//! # Sealbox Controller
//!
//! The controller half of sealbox: the key registry with rotation, the
//! rate-limited work queue, and the reconciliation engine that turns sealed
//! secrets into live secrets.
//!
//! ## Key Types
//!
//! - [`KeyRegistry`] - Every known sealing key, plus the most-recent pointer
//! - [`KeyRenewer`] - Initial, periodic, and triggered key generation
//! - [`WorkQueue`] - Deduplicating queue with per-item retry backoff
//! - [`Controller`] - The watch-driven reconciliation engine
//!
//! ## Lifecycle
//!
//! Build a [`KeyRegistry`] over a [`Cluster`](sealbox_cluster::Cluster),
//! call [`KeyRegistry::load_existing_keys`], start a [`KeyRenewer`] (which
//! guarantees a usable key before returning), then spawn a [`Controller`].
//! HTTP frontends call [`Controller::attempt_unseal`],
//! [`Controller::rotate`], and [`Controller::cert_chain_pem`].

pub mod config;
pub mod controller;
pub mod error;
pub mod queue;
pub mod registry;
pub mod renewal;

pub use config::{validate_key_prefix, ControllerConfig, KeyRenewalConfig, LabelSelector};
pub use controller::{Controller, ControllerHandle};
pub use error::{ControllerError, ReconcileError, Result};
pub use queue::WorkQueue;
pub use registry::{KeyMaterial, KeyRegistry, SEALED_KEY_ACTIVE, SEALED_KEY_LABEL};
pub use renewal::KeyRenewer;
