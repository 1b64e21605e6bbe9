//! Sealing scopes and encryption-label derivation.
//!
//! The scope decides how much of a sealed secret's identity is baked into
//! the OAEP label: strict pins namespace and name, namespace-wide pins only
//! the namespace, cluster-wide pins nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::{ObjectMeta, CLUSTER_WIDE_ANNOTATION, NAMESPACE_WIDE_ANNOTATION};

/// Mobility of a sealed secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SealingScope {
    /// Pinned to a specific namespace and name.
    #[default]
    Strict,
    /// Pinned to a namespace, movable across names within it.
    NamespaceWide,
    /// Unsealable anywhere in the cluster.
    ClusterWide,
}

impl fmt::Display for SealingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SealingScope::Strict => "strict",
            SealingScope::NamespaceWide => "namespace-wide",
            SealingScope::ClusterWide => "cluster-wide",
        };
        f.write_str(s)
    }
}

impl FromStr for SealingScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "strict" => Ok(SealingScope::Strict),
            "namespace-wide" => Ok(SealingScope::NamespaceWide),
            "cluster-wide" => Ok(SealingScope::ClusterWide),
            other => Err(format!(
                "invalid scope {other:?}: must be one of strict, namespace-wide, cluster-wide"
            )),
        }
    }
}

/// The OAEP label for the given identity and scope.
pub fn encryption_label(namespace: &str, name: &str, scope: SealingScope) -> Vec<u8> {
    match scope {
        SealingScope::Strict => format!("{namespace}/{name}").into_bytes(),
        SealingScope::NamespaceWide => namespace.as_bytes().to_vec(),
        SealingScope::ClusterWide => Vec::new(),
    }
}

/// The scope declared by a set of annotations.
///
/// Cluster-wide takes precedence over namespace-wide; absence of both means
/// strict.
pub fn scope_of_annotations(annotations: &BTreeMap<String, String>) -> SealingScope {
    if annotations.get(CLUSTER_WIDE_ANNOTATION).map(String::as_str) == Some("true") {
        return SealingScope::ClusterWide;
    }
    if annotations
        .get(NAMESPACE_WIDE_ANNOTATION)
        .map(String::as_str)
        == Some("true")
    {
        return SealingScope::NamespaceWide;
    }
    SealingScope::Strict
}

/// The label for the object carrying this metadata, from its own declared
/// identity and annotations.
pub fn label_for(meta: &ObjectMeta) -> Vec<u8> {
    encryption_label(
        &meta.namespace,
        &meta.name,
        scope_of_annotations(&meta.annotations),
    )
}

/// Rewrite the scope annotations to reflect exactly `scope`.
///
/// Both scope annotations are cleared first, so an explicit scope change can
/// never leave cluster-wide and namespace-wide simultaneously set.
pub fn update_scope_annotations(annotations: &mut BTreeMap<String, String>, scope: SealingScope) {
    annotations.remove(CLUSTER_WIDE_ANNOTATION);
    annotations.remove(NAMESPACE_WIDE_ANNOTATION);
    match scope {
        SealingScope::Strict => {}
        SealingScope::NamespaceWide => {
            annotations.insert(NAMESPACE_WIDE_ANNOTATION.to_string(), "true".to_string());
        }
        SealingScope::ClusterWide => {
            annotations.insert(CLUSTER_WIDE_ANNOTATION.to_string(), "true".to_string());
        }
    }
}

/// Remove last-applied-configuration annotations added by apply tooling.
///
/// They contain a full plaintext copy of the original object and would leak
/// the secret if carried into the sealed template.
pub fn strip_last_applied_annotations(annotations: &mut BTreeMap<String, String>) {
    for key in [
        "kubectl.kubernetes.io/last-applied-configuration",
        "kubecfg.ksonnet.io/last-applied-configuration",
    ] {
        annotations.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anno(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn labels_per_scope() {
        assert_eq!(
            encryption_label("myns", "testsecret", SealingScope::Strict),
            b"myns/testsecret"
        );
        assert_eq!(
            encryption_label("myns", "testsecret", SealingScope::NamespaceWide),
            b"myns"
        );
        assert_eq!(
            encryption_label("myns", "testsecret", SealingScope::ClusterWide),
            b""
        );
    }

    #[test]
    fn scope_parse_display_round_trip() {
        for scope in [
            SealingScope::Strict,
            SealingScope::NamespaceWide,
            SealingScope::ClusterWide,
        ] {
            assert_eq!(scope.to_string().parse::<SealingScope>().unwrap(), scope);
        }
        assert_eq!("".parse::<SealingScope>().unwrap(), SealingScope::Strict);
        assert!("bogus".parse::<SealingScope>().is_err());
    }

    #[test]
    fn cluster_wide_wins_over_namespace_wide() {
        let a = anno(&[
            (CLUSTER_WIDE_ANNOTATION, "true"),
            (NAMESPACE_WIDE_ANNOTATION, "true"),
        ]);
        assert_eq!(scope_of_annotations(&a), SealingScope::ClusterWide);
    }

    #[test]
    fn absent_annotations_mean_strict() {
        assert_eq!(scope_of_annotations(&anno(&[])), SealingScope::Strict);
        // Any value other than "true" is ignored.
        let a = anno(&[(NAMESPACE_WIDE_ANNOTATION, "false")]);
        assert_eq!(scope_of_annotations(&a), SealingScope::Strict);
    }

    #[test]
    fn update_clears_stale_scope_annotations() {
        let mut a = anno(&[(CLUSTER_WIDE_ANNOTATION, "true")]);
        update_scope_annotations(&mut a, SealingScope::NamespaceWide);
        assert!(!a.contains_key(CLUSTER_WIDE_ANNOTATION));
        assert_eq!(a.get(NAMESPACE_WIDE_ANNOTATION).unwrap(), "true");

        update_scope_annotations(&mut a, SealingScope::Strict);
        assert!(a.is_empty());
    }

    #[test]
    fn strip_last_applied() {
        let mut a = anno(&[
            ("kubectl.kubernetes.io/last-applied-configuration", "{...}"),
            ("unrelated", "keep"),
        ]);
        strip_last_applied_annotations(&mut a);
        assert_eq!(a.len(), 1);
        assert!(a.contains_key("unrelated"));
    }
}
