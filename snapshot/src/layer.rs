//! The polymorphic snapshot layer handle.

use std::sync::Arc;

use alloy_primitives::B256;

use crate::difflayer::{AccountDelta, DiffLayer, StorageDelta};
use crate::disklayer::DiskLayer;
use crate::errors::SnapshotResult;

/// A snapshot of the state at a particular root: either the persistent
/// disk layer at the bottom of the tree or an in-memory diff stacked on
/// top of it.
#[derive(Clone, Debug)]
pub enum Layer {
    /// An in-memory delta over a parent layer.
    Diff(Arc<DiffLayer>),
    /// The persistent bottom layer.
    Disk(Arc<DiskLayer>),
}

impl Layer {
    /// Returns the root hash for which this snapshot was made.
    pub fn root(&self) -> B256 {
        match self {
            Self::Diff(layer) => layer.root(),
            Self::Disk(layer) => layer.root(),
        }
    }

    /// Returns whether the layer was invalidated by state progression.
    pub fn is_stale(&self) -> bool {
        match self {
            Self::Diff(layer) => layer.is_stale(),
            Self::Disk(layer) => layer.is_stale(),
        }
    }

    /// Returns the parent layer, or `None` for the disk layer.
    pub fn parent(&self) -> Option<Layer> {
        match self {
            Self::Diff(layer) => Some(layer.parent()),
            Self::Disk(_) => None,
        }
    }

    /// Retrieves the account blob associated with `account_hash`.
    ///
    /// `Ok(Some(vec![]))` is a deletion tombstone; `Ok(None)` means the
    /// account does not exist in this snapshot.
    pub fn account_blob(&self, account_hash: B256) -> SnapshotResult<Option<Vec<u8>>> {
        match self {
            Self::Diff(layer) => layer.account_blob(account_hash),
            Self::Disk(layer) => layer.account_blob(account_hash),
        }
    }

    /// Retrieves the storage slot blob for `slot_hash` within the account
    /// `account_hash`, with the same conventions as [`Self::account_blob`].
    pub fn storage_blob(
        &self,
        account_hash: B256,
        slot_hash: B256,
    ) -> SnapshotResult<Option<Vec<u8>>> {
        match self {
            Self::Diff(layer) => layer.storage_blob(account_hash, slot_hash),
            Self::Disk(layer) => layer.storage_blob(account_hash, slot_hash),
        }
    }

    /// Sorted account keys touched by this layer. The disk layer tracks no
    /// delta of its own and yields an empty view.
    pub fn account_list(&self) -> Arc<Vec<B256>> {
        match self {
            Self::Diff(layer) => layer.account_list(),
            Self::Disk(_) => Arc::new(Vec::new()),
        }
    }

    /// Sorted slot keys this layer holds for `account_hash`, or `None` when
    /// the account's storage is untouched here.
    pub fn storage_list(&self, account_hash: B256) -> Option<Arc<Vec<B256>>> {
        match self {
            Self::Diff(layer) => layer.storage_list(account_hash),
            Self::Disk(_) => None,
        }
    }

    /// Creates a new diff layer on top of this one with the supplied deltas.
    pub fn update(
        &self,
        new_root: B256,
        accounts: AccountDelta,
        storage: StorageDelta,
    ) -> Arc<DiffLayer> {
        DiffLayer::new(self.clone(), new_root, accounts, storage)
    }

    /// The disk layer at the bottom of this layer's parent chain.
    pub(crate) fn origin(&self) -> Arc<DiskLayer> {
        match self {
            Self::Diff(layer) => layer.origin(),
            Self::Disk(layer) => layer.clone(),
        }
    }
}
