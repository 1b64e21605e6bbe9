//! Controller and key-renewal configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{ControllerError, Result};

/// Longest legal resource name.
const MAX_NAME_LEN: usize = 253;

/// A generated key name is `<prefix>-<5 char suffix>`.
const GENERATED_SUFFIX_LEN: usize = 6;

/// Configuration for key generation and rotation.
#[derive(Debug, Clone)]
pub struct KeyRenewalConfig {
    /// RSA modulus size in bits for newly generated keys.
    pub key_size: usize,
    /// Validity window of the self-signed certificate.
    pub validity: Duration,
    /// Interval between automatic renewals, measured from the most-recent
    /// key's ordering time. Zero disables the timer, not triggered renewal.
    pub period: Duration,
    /// Keys older than this instant are renewed at startup even if the
    /// period has not elapsed.
    pub cutoff: Option<DateTime<Utc>>,
    /// Namespace the key-pair secrets are persisted in.
    pub namespace: String,
    /// Name prefix for generated key-pair secrets.
    pub key_prefix: String,
    /// Common name on generated certificates.
    pub common_name: String,
    /// Extra labels merged onto persisted key secrets. The discovery label
    /// always wins on conflict.
    pub extra_labels: BTreeMap<String, String>,
    /// Extra annotations merged onto persisted key secrets.
    pub extra_annotations: BTreeMap<String, String>,
}

impl Default for KeyRenewalConfig {
    fn default() -> Self {
        Self {
            key_size: 4096,
            validity: Duration::from_secs(10 * 365 * 24 * 60 * 60),
            period: Duration::from_secs(30 * 24 * 60 * 60),
            cutoff: None,
            namespace: "sealbox-system".to_string(),
            key_prefix: "sealbox-key".to_string(),
            common_name: "sealbox".to_string(),
            extra_labels: BTreeMap::new(),
            extra_annotations: BTreeMap::new(),
        }
    }
}

impl KeyRenewalConfig {
    /// Validate the configuration, in particular the key prefix.
    pub fn validate(&self) -> Result<()> {
        validate_key_prefix(&self.key_prefix)?;
        Ok(())
    }
}

/// Check that `prefix` plus a generated suffix yields a legal resource name:
/// DNS-1123 subdomain characters, alphanumeric at both ends, short enough.
pub fn validate_key_prefix(prefix: &str) -> Result<()> {
    let fail = |reason: &str| {
        Err(ControllerError::KeyPrefix {
            prefix: prefix.to_string(),
            reason: reason.to_string(),
        })
    };

    if prefix.is_empty() {
        return fail("must not be empty");
    }
    if prefix.len() + GENERATED_SUFFIX_LEN > MAX_NAME_LEN {
        return fail("too long for a generated resource name");
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return fail("may only contain lowercase alphanumerics, '-' and '.'");
    }
    let first = prefix.chars().next().unwrap_or_default();
    let last = prefix.chars().last().unwrap_or_default();
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return fail("must start and end with an alphanumeric character");
    }
    Ok(())
}

/// An equality label selector restricting which sealed secrets the engine
/// watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pub key: String,
    pub value: String,
}

impl LabelSelector {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Only sealed secrets matching this selector are watched and
    /// reconciled. `None` selects everything.
    pub label_selector: Option<LabelSelector>,
    /// Transient failures are retried at most this many times per key.
    pub max_retries: u32,
    /// Delete the target secret ourselves when the sealed secret goes away,
    /// instead of relying on owner-reference garbage collection.
    pub old_gc_behavior: bool,
    /// Write the `Synced` condition back to the sealed secret.
    pub update_status: bool,
    /// Accept the deprecated whole-secret `data` field when unsealing.
    pub accept_deprecated_data: bool,
    /// Base delay of the per-item retry backoff.
    pub base_retry_delay: Duration,
    /// Upper bound of the per-item retry backoff.
    pub max_retry_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label_selector: None,
            max_retries: 5,
            old_gc_behavior: false,
            update_status: true,
            accept_deprecated_data: false,
            base_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_secs(1000),
        }
    }
}
