//! Proptest strategies for property-based testing.

use proptest::prelude::*;

use sealbox_core::scope::SealingScope;

/// Arbitrary plaintext bytes, including empty.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Arbitrary encryption labels, including empty (the cluster-wide label).
pub fn label(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    "[ -~]{0,64}".prop_map(move |s| {
        let mut bytes = s.into_bytes();
        bytes.truncate(max_len);
        bytes
    })
}

/// A DNS-1123 style name, as namespaces and resource names are.
pub fn dns_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}[a-z0-9]".prop_map(String::from)
}

/// A secret data item key.
pub fn item_key() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9][a-zA-Z0-9._-]{0,40}".prop_map(String::from)
}

/// One of the three sealing scopes.
pub fn sealing_scope() -> impl Strategy<Value = SealingScope> {
    prop_oneof![
        Just(SealingScope::Strict),
        Just(SealingScope::NamespaceWide),
        Just(SealingScope::ClusterWide),
    ]
}

/// A small map of secret data items.
pub fn secret_items(max_items: usize) -> impl Strategy<Value = Vec<(String, Vec<u8>)>> {
    prop::collection::btree_map(item_key(), plaintext(64), 1..=max_items)
        .prop_map(|m| m.into_iter().collect())
}
