//! Persistence layer for the alkymi incremental computation engine.
//!
//! Converts output values into JSON documents plus content-addressed sidecar
//! blobs ([`document`]), and lays them out in per-recipe cache directories
//! with atomic metadata swap ([`cache`]). Decoding is lazy: status checks
//! read only `meta.json`; blob payloads are deserialized when a value is
//! actually consumed.

pub mod cache;
pub mod document;
pub mod error;

// Re-export key types for ergonomic use.
pub use cache::{CacheMeta, CacheStore};
pub use document::{HandleSource, OutputHandle, BLOB_PREFIX};
pub use error::StoreError;
