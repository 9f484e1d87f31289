//! Persistence helpers for the optional Store/Load caller pattern
//!
//! These types let a caller store and retrieve `DataRowRecord`s without managing the
//! encrypt/decrypt calls and the persistence calls as separate steps. `LoaderFn` and
//! `StorerFn` adapt arbitrary closures to the `Loader`/`Storer` traits so callers can
//! plug in whatever backend they already use; `MemoryMetastore` is a small in-memory
//! `Metastore` provided for examples and tests.

mod functions;
mod memory;

pub use functions::{LoaderFn, StorerFn};
pub use memory::MemoryMetastore;
