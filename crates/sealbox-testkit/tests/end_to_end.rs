//! End-to-end scenarios through the spawned reconciliation engine.

use std::time::Duration;

use sealbox_cluster::Cluster;
use sealbox_core::{ResourceKey, SEALED_SECRET_KIND};
use sealbox_crypto::parse_cert_chain;
use sealbox_testkit::{plain_secret, TestFixture};

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn sealed_secret_becomes_owned_secret() {
    init_tracing();
    let fixture = TestFixture::new().await;
    let handle = fixture.controller.spawn();

    let sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
    fixture.cluster.apply_sealed_secret(sealed);

    let key = ResourceKey::new("myns", "testsecret");
    let secret = fixture.wait_for_secret(&key, WAIT).await;
    assert_eq!(secret.data["foo"].as_bytes(), b"bar");

    let owner = secret.controller_owner().expect("owner reference set");
    assert_eq!(owner.kind, SEALED_SECRET_KIND);
    assert_eq!(owner.name, "testsecret");

    fixture.wait_for_event(&key, "Unsealed", WAIT).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn renamed_sealed_secret_fails_without_producing_a_secret() {
    init_tracing();
    let fixture = TestFixture::new().await;
    let handle = fixture.controller.spawn();

    let mut sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
    // Smuggling the ciphertext under a new identity must not work.
    sealed.metadata.name = "not-testsecret".to_string();
    fixture.cluster.apply_sealed_secret(sealed);

    let key = ResourceKey::new("myns", "not-testsecret");
    fixture.wait_for_event(&key, "ErrUnsealFailed", WAIT).await;
    assert!(fixture.cluster.get_secret(&key).await.unwrap().is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn deleted_target_secret_is_recreated() {
    init_tracing();
    let fixture = TestFixture::new().await;
    let handle = fixture.controller.spawn();

    let sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
    fixture.cluster.apply_sealed_secret(sealed);

    let key = ResourceKey::new("myns", "testsecret");
    let first = fixture.wait_for_secret(&key, WAIT).await;

    fixture.cluster.delete_secret(&key).await.unwrap();
    let second = fixture.wait_for_secret(&key, WAIT).await;
    assert_eq!(second.data["foo"].as_bytes(), b"bar");
    assert_ne!(first.metadata.uid, second.metadata.uid);

    handle.shutdown().await;
}

#[tokio::test]
async fn old_ciphertexts_survive_key_rotation() {
    init_tracing();
    let fixture = TestFixture::new().await;

    let sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
    fixture.cluster.apply_sealed_secret(sealed);

    // Rotate before the engine ever runs; the retired key must still serve
    // decryption for the old ciphertext.
    fixture.registry.generate_key().await.unwrap();
    assert_eq!(fixture.registry.len(), 2);

    let handle = fixture.controller.spawn();
    let key = ResourceKey::new("myns", "testsecret");
    let secret = fixture.wait_for_secret(&key, WAIT).await;
    assert_eq!(secret.data["foo"].as_bytes(), b"bar");

    handle.shutdown().await;
}

#[tokio::test]
async fn served_certificate_chain_is_valid_pem() {
    let fixture = TestFixture::new().await;
    let pem = fixture.controller.cert_chain_pem().unwrap();
    let chain = parse_cert_chain(pem.as_bytes()).unwrap();
    assert_eq!(chain.len(), 1);
}

#[tokio::test]
async fn status_churn_does_not_loop_the_engine() {
    init_tracing();
    let fixture = TestFixture::new().await;
    let handle = fixture.controller.spawn();

    let sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
    fixture.cluster.apply_sealed_secret(sealed);

    let key = ResourceKey::new("myns", "testsecret");
    fixture.wait_for_secret(&key, WAIT).await;
    fixture.wait_for_event(&key, "Unsealed", WAIT).await;

    // Let the engine settle. The status write the reconcile performed is
    // itself a watch event; suppression must keep it from re-unsealing
    // forever.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let unsealed_events = fixture
        .cluster
        .events_for(&key)
        .iter()
        .filter(|e| e.reason == "Unsealed")
        .count();
    assert_eq!(unsealed_events, 1);

    handle.shutdown().await;
}
