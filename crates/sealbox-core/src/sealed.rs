//! The SealedSecret resource and its seal/unseal operations.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rsa::rand_core::CryptoRngCore;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

use sealbox_crypto::{hybrid_decrypt, hybrid_encrypt, Fingerprint};

use crate::error::{CoreError, Result};
use crate::scope::{
    label_for, scope_of_annotations, strip_last_applied_annotations, update_scope_annotations,
    SealingScope,
};
use crate::types::{
    is_annotated_true, ByteData, Condition, ConditionStatus, ObjectMeta, OwnerReference, Secret,
    SEALED_SECRET_API_VERSION, SEALED_SECRET_KIND, SKIP_SET_OWNER_REFERENCES_ANNOTATION,
};

/// Condition type reported after every reconcile evaluation.
pub const SYNCED_CONDITION: &str = "Synced";

/// Structure of the secret to be created from a sealed secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretTemplateSpec {
    pub metadata: ObjectMeta,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub secret_type: String,
    /// When true, the produced secret rejects later data mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub immutable: Option<bool>,
    /// Literal values inserted into the secret alongside the decrypted
    /// items; they win on key conflict.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// Specification of a sealed secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SealedSecretSpec {
    pub template: SecretTemplateSpec,
    /// Deprecated whole-secret ciphertext. Mutually exclusive with
    /// `encrypted_data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteData>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub encrypted_data: BTreeMap<String, String>,
}

/// Most recently observed status of a sealed secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SealedSecretStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// A secret sealed for a specific identity and scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SealedSecret {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub metadata: ObjectMeta,
    pub spec: SealedSecretSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SealedSecretStatus>,
}

/// Options for unsealing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsealOptions {
    /// Accept the deprecated whole-secret `data` field.
    pub accept_deprecated_data: bool,
}

impl SealedSecret {
    /// Seal `secret` under `public_key`, encrypting each data item
    /// individually so items can later be rotated one by one.
    ///
    /// The scope is taken from the secret's annotations; the resulting
    /// sealed secret carries normalized scope annotations and a template
    /// reproducing the secret's metadata, minus anything that would leak
    /// plaintext (last-applied annotations) or confuse ownership (owner
    /// references).
    pub fn seal<R: CryptoRngCore>(
        rng: &mut R,
        public_key: &RsaPublicKey,
        secret: &Secret,
    ) -> Result<SealedSecret> {
        let scope = scope_of_annotations(&secret.metadata.annotations);
        if scope != SealingScope::ClusterWide && secret.metadata.namespace.is_empty() {
            return Err(CoreError::MissingNamespace);
        }

        let label = label_for(&secret.metadata);

        let mut template_meta = secret.metadata.clone();
        strip_last_applied_annotations(&mut template_meta.annotations);
        template_meta.owner_references.clear();
        template_meta.uid = String::new();
        template_meta.generation = 0;
        template_meta.creation_timestamp = None;

        let mut encrypted_data = BTreeMap::new();
        for (key, value) in &secret.data {
            let ciphertext = hybrid_encrypt(rng, public_key, value.as_bytes(), &label)?;
            encrypted_data.insert(key.clone(), STANDARD.encode(ciphertext));
        }
        for (key, value) in &secret.string_data {
            let ciphertext = hybrid_encrypt(rng, public_key, value.as_bytes(), &label)?;
            encrypted_data.insert(key.clone(), STANDARD.encode(ciphertext));
        }

        let mut sealed = SealedSecret {
            api_version: Some(SEALED_SECRET_API_VERSION.to_string()),
            metadata: ObjectMeta {
                name: secret.metadata.name.clone(),
                namespace: secret.metadata.namespace.clone(),
                ..Default::default()
            },
            spec: SealedSecretSpec {
                template: SecretTemplateSpec {
                    metadata: template_meta,
                    secret_type: secret.secret_type.clone(),
                    immutable: secret.immutable,
                    data: BTreeMap::new(),
                },
                data: None,
                encrypted_data,
            },
            status: None,
        };
        update_scope_annotations(&mut sealed.metadata.annotations, scope);

        Ok(sealed)
    }

    /// The sealing scope declared by this sealed secret's annotations.
    pub fn scope(&self) -> SealingScope {
        scope_of_annotations(&self.metadata.annotations)
    }

    /// Decrypt the embedded secret.
    ///
    /// The label is recomputed from this resource's *own* declared identity
    /// and annotations, so a sealed secret renamed or moved after sealing
    /// fails to decrypt instead of silently unsealing under a new identity.
    pub fn unseal(
        &self,
        private_keys: &HashMap<Fingerprint, RsaPrivateKey>,
        opts: UnsealOptions,
    ) -> Result<Secret> {
        let label = label_for(&self.metadata);

        let legacy_data = self
            .spec
            .data
            .as_ref()
            .filter(|d| !d.as_bytes().is_empty());
        if legacy_data.is_some() && !self.spec.encrypted_data.is_empty() {
            return Err(CoreError::AmbiguousData);
        }

        let mut secret = if !self.spec.encrypted_data.is_empty() {
            self.unseal_items(private_keys, &label)?
        } else if let Some(data) = legacy_data {
            if !opts.accept_deprecated_data {
                return Err(CoreError::DeprecatedData);
            }
            self.unseal_legacy(private_keys, data.as_bytes(), &label)?
        } else {
            // Nothing encrypted at all; still honour the template.
            let mut secret = Secret {
                metadata: self.spec.template.metadata.clone(),
                secret_type: self.spec.template.secret_type.clone(),
                immutable: self.spec.template.immutable,
                ..Default::default()
            };
            apply_template_data(&mut secret, &self.spec.template.data);
            secret
        };

        // Identity always comes from the sealed secret itself.
        secret.metadata.namespace = self.metadata.namespace.clone();
        secret.metadata.name = self.metadata.name.clone();

        if !is_annotated_true(
            &self.metadata.annotations,
            SKIP_SET_OWNER_REFERENCES_ANNOTATION,
        ) {
            secret.metadata.owner_references = vec![self.controller_owner_reference()];
        }

        Ok(secret)
    }

    fn unseal_items(
        &self,
        private_keys: &HashMap<Fingerprint, RsaPrivateKey>,
        label: &[u8],
    ) -> Result<Secret> {
        let mut secret = Secret {
            metadata: self.spec.template.metadata.clone(),
            secret_type: self.spec.template.secret_type.clone(),
            immutable: self.spec.template.immutable,
            ..Default::default()
        };

        let mut failures: Vec<String> = Vec::new();
        for (key, value) in &self.spec.encrypted_data {
            let ciphertext = STANDARD
                .decode(value.as_bytes())
                .map_err(|e| CoreError::Base64 {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            match hybrid_decrypt(private_keys, &ciphertext, label) {
                Ok(plaintext) => {
                    secret.data.insert(key.clone(), ByteData(plaintext));
                }
                Err(err) => {
                    let detail = format!("{key}: {err}");
                    if !failures.contains(&detail) {
                        failures.push(detail);
                    }
                }
            }
        }
        if !failures.is_empty() {
            return Err(CoreError::Unseal {
                details: failures.join(", "),
            });
        }

        apply_template_data(&mut secret, &self.spec.template.data);
        Ok(secret)
    }

    fn unseal_legacy(
        &self,
        private_keys: &HashMap<Fingerprint, RsaPrivateKey>,
        ciphertext: &[u8],
        label: &[u8],
    ) -> Result<Secret> {
        let plaintext = hybrid_decrypt(private_keys, ciphertext, label)
            .map_err(|err| CoreError::Unseal {
                details: err.to_string(),
            })?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// An owner reference pointing back at this sealed secret, so the
    /// produced secret is garbage-collected with it.
    pub fn controller_owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: SEALED_SECRET_API_VERSION.to_string(),
            kind: SEALED_SECRET_KIND.to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: Some(true),
        }
    }
}

fn apply_template_data(secret: &mut Secret, template_data: &BTreeMap<String, String>) {
    for (key, value) in template_data {
        secret
            .data
            .insert(key.clone(), ByteData(value.clone().into_bytes()));
    }
}

/// Update the `Synced` condition in `status` after an unseal evaluation.
///
/// `lastUpdateTime` moves on every call; `lastTransitionTime` only when the
/// status flips. Returns whether a flip happened (and therefore whether a
/// status write is required beyond generation bookkeeping).
pub fn update_synced_condition(
    status: &mut SealedSecretStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let pos = status
        .conditions
        .iter()
        .position(|c| c.condition_type == SYNCED_CONDITION)
        .unwrap_or_else(|| {
            status.conditions.push(Condition {
                condition_type: SYNCED_CONDITION.to_string(),
                status: ConditionStatus::Unknown,
                last_update_time: None,
                last_transition_time: None,
                reason: String::new(),
                message: String::new(),
            });
            status.conditions.len() - 1
        });
    let cond = &mut status.conditions[pos];

    let new_status = match error {
        None => {
            cond.message.clear();
            ConditionStatus::True
        }
        Some(msg) => {
            cond.message = msg.to_string();
            ConditionStatus::False
        }
    };

    cond.last_update_time = Some(now);
    if cond.status != new_status {
        cond.last_transition_time = Some(now);
        cond.status = new_status;
        return true;
    }
    false
}

/// The closed set of resource kinds the engine decodes from opaque bytes.
///
/// A kind discriminator plus an exhaustive match, instead of open-ended
/// runtime casts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ApiObject {
    SealedSecret(SealedSecret),
    Secret(Secret),
}
