//! In-memory key-value store for flat state blobs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use rust_eth_snapdb_common::{StateStore, StateStoreResult};

/// In-memory store implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryDB {
    /// Blob storage, shared between clones.
    entries: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDB {
    /// Creates a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Checks if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clears all entries from the store.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl StateStore for MemoryDB {
    fn get(&self, key: &[u8]) -> StateStoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StateStoreResult<()> {
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StateStoreResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn contains(&self, key: &[u8]) -> StateStoreResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn write_batch(
        &self,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StateStoreResult<()> {
        let mut entries = self.entries.write();
        for (key, value) in puts {
            entries.insert(key.clone(), value.clone());
        }
        for key in deletes {
            entries.remove(key);
        }
        Ok(())
    }

    fn flush(&self) -> StateStoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use rust_eth_snapdb_common::account_blob_key;

    #[test]
    fn test_basic_operations() {
        let db = MemoryDB::new();
        assert!(db.is_empty());

        let key = account_blob_key(B256::from([0x01; 32]));
        let data = b"slim account".to_vec();

        db.put(&key, &data).unwrap();
        assert_eq!(db.len(), 1);
        assert!(db.contains(&key).unwrap());
        assert_eq!(db.get(&key).unwrap(), Some(data));

        db.delete(&key).unwrap();
        assert!(db.is_empty());
        assert!(!db.contains(&key).unwrap());
    }

    #[test]
    fn test_write_batch_applies_puts_and_deletes() {
        let db = MemoryDB::new();
        db.put(b"stays", b"old").unwrap();
        db.put(b"goes", b"doomed").unwrap();

        let puts = vec![
            (b"stays".to_vec(), b"new".to_vec()),
            (b"added".to_vec(), b"fresh".to_vec()),
        ];
        let deletes = vec![b"goes".to_vec()];
        db.write_batch(&puts, &deletes).unwrap();

        assert_eq!(db.get(b"stays").unwrap(), Some(b"new".to_vec()));
        assert_eq!(db.get(b"added").unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(db.get(b"goes").unwrap(), None);
    }

    #[test]
    fn test_clones_share_storage() {
        let db = MemoryDB::new();
        let other = db.clone();

        db.put(b"key", b"value").unwrap();
        assert_eq!(other.get(b"key").unwrap(), Some(b"value".to_vec()));
    }
}
