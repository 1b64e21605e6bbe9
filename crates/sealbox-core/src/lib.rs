//! # Sealbox Core
//!
//! The sealed-secret data model and the operations over it: sealing a
//! secret's items under a public key, unsealing them with a set of private
//! keys, scope/label derivation, and status conditions.
//!
//! This crate knows nothing about clusters or controllers. It is pure
//! computation over the wire model.
//!
//! ## Key Types
//!
//! - [`SealedSecret`] - The encrypted resource stored in version control
//! - [`Secret`] - The plain target object the controller produces
//! - [`SealingScope`] - How widely a ciphertext may be unsealed
//! - [`ResourceKey`] - `namespace/name` identifier used by the work queue
//!
//! ## Identity binding
//!
//! The encryption label derived from a sealed secret's namespace, name, and
//! scope is fed into RSA-OAEP as associated data. Renaming or moving a
//! sealed secret changes the recomputed label and makes decryption fail,
//! which is what defeats ciphertext-relabeling attacks.

pub mod error;
pub mod scope;
pub mod sealed;
pub mod types;

pub use error::{CoreError, Result};
pub use scope::{
    encryption_label, label_for, scope_of_annotations, strip_last_applied_annotations,
    update_scope_annotations, SealingScope,
};
pub use sealed::{
    update_synced_condition, ApiObject, SealedSecret, SealedSecretSpec, SealedSecretStatus,
    SecretTemplateSpec, UnsealOptions, SYNCED_CONDITION,
};
pub use types::{
    is_annotated_true, ByteData, Condition, ConditionStatus, ObjectMeta, OwnerReference,
    ResourceKey, Secret, CLUSTER_WIDE_ANNOTATION, MANAGED_ANNOTATION, NAMESPACE_WIDE_ANNOTATION,
    PATCH_ANNOTATION, SEALED_SECRET_API_VERSION, SEALED_SECRET_KIND,
    SKIP_SET_OWNER_REFERENCES_ANNOTATION,
};
