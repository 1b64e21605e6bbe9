//! # Sealbox Testkit
//!
//! Testing utilities for sealbox.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a memory cluster, key registry, and controller wired
//!   together, ready to seal and reconcile
//! - **Generators**: proptest strategies for plaintexts, labels, names,
//!   and scopes
//!
//! ## Fixtures
//!
//! ```rust,ignore
//! use sealbox_testkit::{plain_secret, TestFixture};
//!
//! let fixture = TestFixture::new().await;
//! let sealed = fixture.seal(&plain_secret("myns", "testsecret", &[("foo", "bar")]));
//! fixture.cluster.apply_sealed_secret(sealed);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{plain_secret, shared_test_key, TestFixture, TEST_KEY_BITS};
