//! Flat-state key schema for the persistent store.
//!
//! Account and storage blobs live in a single keyspace, namespaced by a
//! one-byte prefix so the two families never collide and remain separately
//! iterable by range.

use alloy_primitives::B256;

/// Prefix for account blob entries: `'a' ++ account_hash`.
pub const ACCOUNT_BLOB_PREFIX: u8 = b'a';

/// Prefix for storage slot entries: `'o' ++ account_hash ++ slot_hash`.
pub const STORAGE_BLOB_PREFIX: u8 = b'o';

/// Key under which the root of the persisted snapshot is stored.
pub const SNAPSHOT_ROOT_KEY: &[u8] = b"SnapshotRoot";

/// Store key for an account blob.
pub fn account_blob_key(account_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(ACCOUNT_BLOB_PREFIX);
    key.extend_from_slice(account_hash.as_slice());
    key
}

/// Store key for a storage slot blob.
pub fn storage_blob_key(account_hash: B256, slot_hash: B256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32 + 32);
    key.push(STORAGE_BLOB_PREFIX);
    key.extend_from_slice(account_hash.as_slice());
    key.extend_from_slice(slot_hash.as_slice());
    key
}
