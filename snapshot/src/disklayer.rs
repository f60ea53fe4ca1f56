//! The persistent bottom layer of the snapshot tree.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::B256;
use tracing::{error, trace};

use rust_eth_snapdb_common::{
    account_blob_key, storage_blob_key, StateStore, SNAPSHOT_ROOT_KEY,
};

use crate::difflayer::{AccountDelta, StorageDelta};
use crate::errors::{SnapshotError, SnapshotResult};
use crate::metrics::SNAP_METRICS;

/// Point-lookup view over the persistent flat state.
///
/// A disk layer is the terminus of every diff layer chain. It serves reads
/// straight from the backing store and is replaced wholesale when an
/// aggregator diff is committed; the superseded instance is marked stale so
/// readers holding it re-resolve through the tree.
pub struct DiskLayer {
    /// Persistent key-value store holding the flat state.
    store: Arc<dyn StateStore>,
    /// State root of the persisted snapshot.
    root: B256,
    /// Signals that the layer was superseded by a commit.
    stale: AtomicBool,
}

impl Debug for DiskLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskLayer")
            .field("root", &self.root)
            .field("stale", &self.stale.load(Ordering::Acquire))
            .finish()
    }
}

impl DiskLayer {
    /// Creates a disk layer over `store` representing `root`.
    pub fn new(store: Arc<dyn StateStore>, root: B256) -> Arc<Self> {
        Arc::new(Self { store, root, stale: AtomicBool::new(false) })
    }

    /// Opens the disk layer persisted in `store`, if any.
    pub fn open(store: Arc<dyn StateStore>) -> SnapshotResult<Option<Arc<Self>>> {
        let Some(raw) = store.get(SNAPSHOT_ROOT_KEY)? else {
            return Ok(None);
        };
        if raw.len() != 32 {
            error!(target: "snapshot::disklayer", len = raw.len(), "Corrupted snapshot root marker");
            return Ok(None);
        }
        let root = B256::from_slice(&raw);
        Ok(Some(Self::new(store, root)))
    }

    /// Returns the root hash for which this snapshot was made.
    pub fn root(&self) -> B256 {
        self.root
    }

    /// Returns whether this layer was superseded by a newer disk commit.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Returns the backing store.
    pub fn store(&self) -> Arc<dyn StateStore> {
        self.store.clone()
    }

    /// Directly retrieves the account blob associated with `account_hash`.
    pub fn account_blob(&self, account_hash: B256) -> SnapshotResult<Option<Vec<u8>>> {
        if self.is_stale() {
            return Err(SnapshotError::StaleSnapshot);
        }
        let blob = self.store.get(&account_blob_key(account_hash))?;
        if let Some(blob) = &blob {
            SNAP_METRICS.disk_account_read_bytes.increment(blob.len() as u64);
        }
        Ok(blob)
    }

    /// Directly retrieves the storage slot blob for `slot_hash` within the
    /// account `account_hash`.
    pub fn storage_blob(
        &self,
        account_hash: B256,
        slot_hash: B256,
    ) -> SnapshotResult<Option<Vec<u8>>> {
        if self.is_stale() {
            return Err(SnapshotError::StaleSnapshot);
        }
        let blob = self.store.get(&storage_blob_key(account_hash, slot_hash))?;
        if let Some(blob) = &blob {
            SNAP_METRICS.disk_storage_read_bytes.increment(blob.len() as u64);
        }
        Ok(blob)
    }

    /// Atomically installs a merged diff into the store, returning the disk
    /// layer representing the new persistent root.
    ///
    /// Empty blobs are deletion tombstones and remove the key; the disk
    /// never stores tombstones itself. The superseded layer is marked stale
    /// so readers fail over to the tree.
    pub(crate) fn commit(
        &self,
        accounts: &AccountDelta,
        storage: &StorageDelta,
        new_root: B256,
    ) -> SnapshotResult<Arc<Self>> {
        if self.stale.swap(true, Ordering::AcqRel) {
            panic!("disk layer is stale");
        }
        let mut puts: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(accounts.len() + 1);
        let mut deletes: Vec<Vec<u8>> = Vec::new();

        for (account_hash, blob) in accounts {
            let key = account_blob_key(*account_hash);
            if blob.is_empty() {
                deletes.push(key);
            } else {
                puts.push((key, blob.clone()));
            }
        }
        for (account_hash, slots) in storage {
            for (slot_hash, blob) in slots {
                let key = storage_blob_key(*account_hash, *slot_hash);
                if blob.is_empty() {
                    deletes.push(key);
                } else {
                    puts.push((key, blob.clone()));
                }
            }
        }
        puts.push((SNAPSHOT_ROOT_KEY.to_vec(), new_root.as_slice().to_vec()));

        trace!(
            target: "snapshot::disklayer",
            %new_root,
            puts = puts.len(),
            deletes = deletes.len(),
            "Committing aggregator diff to disk"
        );
        if let Err(err) = self.store.write_batch(&puts, &deletes) {
            error!(target: "snapshot::disklayer", %err, "Failed to commit aggregator diff");
            self.stale.store(false, Ordering::Release);
            return Err(err.into());
        }
        Ok(Self::new(self.store.clone(), new_root))
    }
}
