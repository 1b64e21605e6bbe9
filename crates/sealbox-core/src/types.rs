//! Wire-model types shared across sealbox.
//!
//! These mirror the Kubernetes JSON shapes the system speaks, trimmed to the
//! fields the core actually reads.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// API group/version of the sealed-secret resource.
pub const SEALED_SECRET_API_VERSION: &str = "sealbox.io/v1alpha1";

/// Kind discriminator of the sealed-secret resource.
pub const SEALED_SECRET_KIND: &str = "SealedSecret";

/// Annotation namespace prefix for all sealbox annotations.
pub const ANNOTATION_PREFIX: &str = "sealbox.io/";

/// Marks a sealed secret as unsealable in any namespace under any name.
pub const CLUSTER_WIDE_ANNOTATION: &str = "sealbox.io/cluster-wide";

/// Marks a sealed secret as unsealable under any name within its namespace.
pub const NAMESPACE_WIDE_ANNOTATION: &str = "sealbox.io/namespace-wide";

/// Flags a pre-existing secret as adoptable by the controller.
pub const MANAGED_ANNOTATION: &str = "sealbox.io/managed";

/// Flags a secret to be merged into instead of overwritten.
pub const PATCH_ANNOTATION: &str = "sealbox.io/patch";

/// Tells the controller not to set an owner reference on the target secret.
pub const SKIP_SET_OWNER_REFERENCES_ANNOTATION: &str = "sealbox.io/skip-set-owner-references";

/// True when `annotations[key] == "true"`.
pub fn is_annotated_true(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations.get(key).map(String::as_str) == Some("true")
}

/// A `namespace/name` pair identifying a namespaced resource.
///
/// This is the work-queue item type: a plain identifier, never a live
/// object, resolved by lookup at reconcile time.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The key of the object carrying this metadata.
    pub fn of(meta: &ObjectMeta) -> Self {
        Self::new(meta.namespace.clone(), meta.name.clone())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

impl FromStr for ResourceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => Ok(Self::new(ns, name)),
            _ => Err(format!("invalid resource key {s:?}, want namespace/name")),
        }
    }
}

impl Serialize for ResourceKey {
    /// On the wire a key is its `namespace/name` string form.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Object metadata, trimmed to the fields the core reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Name prefix for server-side name generation.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A reference from a dependent object back to its owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

/// A secret data value: raw bytes, base64-encoded on the wire.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ByteData(pub Vec<u8>);

impl ByteData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ByteData {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for ByteData {
    // Secret values must not leak through debug logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteData({} bytes)", self.0.len())
    }
}

impl Serialize for ByteData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ByteData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// The plain secret object produced by unsealing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub secret_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, ByteData>,
    /// Plain-text convenience values; folded into `data` at seal time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

impl Secret {
    /// The owner reference marked as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.metadata
            .owner_references
            .iter()
            .find(|r| r.controller == Some(true))
    }

    /// Whether this secret is controlled by the given owner identity.
    ///
    /// Kind, name, and uid must all match: a name match against an owner
    /// reference left behind by a deleted earlier incarnation is not
    /// ownership.
    pub fn is_controlled_by(&self, owner_kind: &str, owner_name: &str, owner_uid: &str) -> bool {
        self.controller_owner()
            .map(|r| r.kind == owner_kind && r.name == owner_name && r.uid == owner_uid)
            .unwrap_or(false)
    }
}

/// Status of a condition: `True`, `False`, or `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// An observed condition of a sealed secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    /// Updated on every evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
    /// Updated only when `status` flips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
