//! Metastore implementations for the application encryption library
//!
//! The `Metastore` trait (see the crate root) is the only contract core callers should
//! depend on. This module ships a single concrete implementation, `InMemoryMetastore`,
//! which exists to exercise the engine in tests and examples. Production backends
//! (relational databases, DynamoDB, etc.) are expected to live in separate driver
//! crates that implement `Metastore` against this contract.

pub mod memory;

pub use memory::InMemoryMetastore;
