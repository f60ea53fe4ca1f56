//! Common traits and types shared by the snapshot database crates.
//!
//! This crate provides the persistent key-value store contract consumed by
//! the snapshot core, together with the flat-state key schema used to lay
//! account and storage blobs out in that store.

/// Store traits, errors and configuration.
mod traits;
pub use traits::{StateStore, StateStoreConfig, StateStoreError, StateStoreResult};

/// Flat-state key schema.
mod schema;
pub use schema::{
    account_blob_key, storage_blob_key, ACCOUNT_BLOB_PREFIX, SNAPSHOT_ROOT_KEY,
    STORAGE_BLOB_PREFIX,
};
