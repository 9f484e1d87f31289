//! Key Management Service implementations for the application encryption library
//!
//! The `KeyManagementService` trait (see the crate root) is the only contract core
//! callers should depend on. This module ships a single concrete implementation,
//! `StaticKeyManagementService`, backed by a fixed master key held in a secure-memory
//! secret; it exists to exercise the engine in tests and examples without reaching out
//! to a real master-key service. Production KMS drivers (cloud KMS clients with
//! multi-region failover, etc.) are expected to live in separate driver crates that
//! implement `KeyManagementService` against this contract.

mod static_kms;

pub use static_kms::StaticKeyManagementService;
