//! # Sealbox Cluster
//!
//! Cluster API abstraction for sealbox. Provides a trait-based interface to
//! the resource API so the controller stays agnostic of where sealed
//! secrets and secrets actually live.
//!
//! ## Key Types
//!
//! - [`Cluster`] - The async trait for all resource API operations
//! - [`MemoryCluster`] - In-memory implementation for tests and embedding
//! - [`WatchEvent`] - Change notification delivered to watchers
//! - [`Event`] - Operator-visible event recorded about a resource
//!
//! ## Design Notes
//!
//! - **Reads return `Option`**: absence is an answer, not an error
//! - **Writes enforce immutability**: an immutable secret's data and type
//!   cannot change, and the resulting error is permanent
//! - **Watches are hints**: consumers re-resolve state by lookup

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ClusterError, Result};
pub use memory::MemoryCluster;
pub use traits::{Cluster, Event, EventType, WatchEvent};
