//! In-memory diff layers stacked on top of the persistent disk layer.
//!
//! A diff layer is a collection of modifications made to the state after
//! running a block on top of a parent snapshot. It acts as a journal,
//! tracking recent writes that have not yet graduated into the persistent
//! base. Layers are immutable once published; the only later mutations are
//! lazy sorted-key caches, the origin replumb during capping, and the one
//! successful flatten that marks a layer stale.

use std::collections::{hash_map::Entry, HashMap};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use alloy_primitives::B256;
use parking_lot::RwLock;

use crate::bloom::{account_bloom_hash, storage_bloom_hash, BloomFilter};
use crate::disklayer::DiskLayer;
use crate::errors::{SnapshotError, SnapshotResult};
use crate::layer::Layer;
use crate::metrics::SNAP_METRICS;

/// Account key hash to slim account blob. An empty blob is a deletion
/// tombstone; an absent key is unknown at this layer.
pub type AccountDelta = HashMap<B256, Vec<u8>>;

/// Account key hash to slot key hash to slot blob, with the same two-state
/// convention as [`AccountDelta`].
pub type StorageDelta = HashMap<B256, HashMap<B256, Vec<u8>>>;

/// A single block's worth of state modifications over a parent snapshot.
pub struct DiffLayer {
    /// Root hash to which this snapshot diff belongs.
    root: B256,
    /// Signals that the layer became stale (state progressed past it).
    stale: AtomicBool,
    /// State guarded by the layer lock.
    inner: RwLock<DiffLayerInner>,
}

struct DiffLayerInner {
    /// Parent snapshot modified by this one, never detached.
    parent: Layer,
    /// Base disk layer to use directly on bloom misses.
    origin: Arc<DiskLayer>,
    /// Approximate guess as to how much memory the layer uses.
    memory: u64,
    /// Keyed accounts for direct retrieval (empty blob means deleted).
    accounts: AccountDelta,
    /// Keyed storage slots for direct retrieval, one map per account.
    storage: StorageDelta,
    /// Sorted account keys, materialised on first request.
    account_list: Option<Arc<Vec<B256>>>,
    /// Sorted slot keys per account, materialised on first request.
    storage_list: HashMap<B256, Arc<Vec<B256>>>,
    /// Bloom filter tracking all the diffed items up to the disk layer.
    diffed: Arc<BloomFilter>,
}

/// Builds the cumulative bloom for a layer: the parent diff's filter (or a
/// fresh one when the parent is disk) plus every key the local deltas touch.
fn build_bloom(parent: &Layer, accounts: &AccountDelta, storage: &StorageDelta) -> BloomFilter {
    let start = Instant::now();
    let mut diffed = match parent {
        Layer::Diff(parent) => parent.bloom().as_ref().clone(),
        Layer::Disk(_) => BloomFilter::new(),
    };
    for account_hash in accounts.keys() {
        diffed.add(account_bloom_hash(account_hash));
    }
    for (account_hash, slots) in storage {
        for slot_hash in slots.keys() {
            diffed.add(storage_bloom_hash(account_hash, slot_hash));
        }
    }
    SNAP_METRICS.bloom_index_duration.record(start.elapsed().as_secs_f64());
    // Subsequent layers overwrite the gauge; ballpark figures are all that
    // is wanted from it.
    SNAP_METRICS.bloom_error_rate.set(diffed.false_positive_rate());
    diffed
}

impl DiffLayer {
    /// Creates a new diff on top of an existing snapshot, whether that's the
    /// persistent database or a hierarchical diff already.
    ///
    /// Panics if a storage delta entry carries an empty slot map; a touched
    /// account with no slots must be absent from the storage delta entirely.
    pub fn new(
        parent: Layer,
        root: B256,
        accounts: AccountDelta,
        storage: StorageDelta,
    ) -> Arc<Self> {
        let mut memory = 0u64;
        for blob in accounts.values() {
            memory += (32 + blob.len()) as u64;
            SNAP_METRICS.dirty_account_write_bytes.increment(blob.len() as u64);
        }
        for (account_hash, slots) in &storage {
            if slots.is_empty() {
                panic!("storage delta for {account_hash} is empty");
            }
            for blob in slots.values() {
                memory += (32 + blob.len()) as u64;
                SNAP_METRICS.dirty_storage_write_bytes.increment(blob.len() as u64);
            }
        }

        let origin = parent.origin();
        let diffed = Arc::new(build_bloom(&parent, &accounts, &storage));

        Arc::new(Self {
            root,
            stale: AtomicBool::new(false),
            inner: RwLock::new(DiffLayerInner {
                parent,
                origin,
                memory,
                accounts,
                storage,
                account_list: None,
                storage_list: HashMap::new(),
                diffed,
            }),
        })
    }

    /// Returns the root hash for which this snapshot was made.
    pub fn root(&self) -> B256 {
        self.root
    }

    /// Returns whether this layer was flattened across (state progressed).
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Returns the parent layer of this diff.
    pub fn parent(&self) -> Layer {
        self.inner.read().parent.clone()
    }

    /// Returns the approximate memory used by this layer's deltas.
    pub fn memory(&self) -> u64 {
        self.inner.read().memory
    }

    pub(crate) fn origin(&self) -> Arc<DiskLayer> {
        self.inner.read().origin.clone()
    }

    pub(crate) fn bloom(&self) -> Arc<BloomFilter> {
        self.inner.read().diffed.clone()
    }

    pub(crate) fn set_parent(&self, parent: Layer) {
        self.inner.write().parent = parent;
    }

    /// Discards the layer's current bloom and rebuilds it from the parent's
    /// and the local diffs, re-anchoring bloom misses on `origin`. Invoked
    /// by the tree when capping advances the disk layer underneath.
    pub(crate) fn rebloom(&self, origin: Arc<DiskLayer>) {
        let mut inner = self.inner.write();
        inner.origin = origin;
        let parent = inner.parent.clone();
        let diffed = build_bloom(&parent, &inner.accounts, &inner.storage);
        inner.diffed = Arc::new(diffed);
    }

    /// Directly retrieves the account blob associated with `account_hash`
    /// from this layer's view of the state.
    ///
    /// `Ok(Some(vec![]))` is a deletion tombstone; `Ok(None)` means the
    /// account does not exist anywhere in this chain.
    pub fn account_blob(&self, account_hash: B256) -> SnapshotResult<Option<Vec<u8>>> {
        // Check staleness and the bloom filter under the lock, so a flatten
        // racing this read either completes before the check or waits.
        let origin = {
            let inner = self.inner.read();
            if self.is_stale() {
                return Err(SnapshotError::StaleSnapshot);
            }
            if inner.diffed.contains(account_bloom_hash(&account_hash)) {
                None
            } else {
                Some(inner.origin.clone())
            }
        };
        // On a bloom miss the diff stack provably lacks the key; reach
        // straight into the bottom persistent layer.
        if let Some(origin) = origin {
            SNAP_METRICS.bloom_account_miss.increment(1);
            return origin.account_blob(account_hash);
        }
        // The bloom filter hit, start poking in the layer maps.
        self.account_blob_at(account_hash, 0)
    }

    /// Internal version of [`Self::account_blob`] that skips the bloom
    /// check, used once a higher layer's filter already hit.
    fn account_blob_at(&self, account_hash: B256, depth: usize) -> SnapshotResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        // A live reference to a flattened-away layer must be unusable.
        if self.is_stale() {
            return Err(SnapshotError::StaleSnapshot);
        }
        if let Some(blob) = inner.accounts.get(&account_hash) {
            SNAP_METRICS.dirty_account_hit.increment(1);
            SNAP_METRICS.dirty_account_hit_depth.record(depth as f64);
            if blob.is_empty() {
                SNAP_METRICS.dirty_account_inex.increment(1);
            } else {
                SNAP_METRICS.dirty_account_read_bytes.increment(blob.len() as u64);
            }
            SNAP_METRICS.bloom_account_true_hit.increment(1);
            return Ok(Some(blob.clone()));
        }
        // Account unknown to this diff, resolve from parent.
        match &inner.parent {
            Layer::Diff(parent) => parent.account_blob_at(account_hash, depth + 1),
            Layer::Disk(parent) => {
                SNAP_METRICS.bloom_account_false_hit.increment(1);
                parent.account_blob(account_hash)
            }
        }
    }

    /// Directly retrieves the storage slot blob for `slot_hash` within the
    /// account `account_hash`, with the same conventions as
    /// [`Self::account_blob`].
    pub fn storage_blob(
        &self,
        account_hash: B256,
        slot_hash: B256,
    ) -> SnapshotResult<Option<Vec<u8>>> {
        let origin = {
            let inner = self.inner.read();
            if self.is_stale() {
                return Err(SnapshotError::StaleSnapshot);
            }
            if inner.diffed.contains(storage_bloom_hash(&account_hash, &slot_hash)) {
                None
            } else {
                Some(inner.origin.clone())
            }
        };
        if let Some(origin) = origin {
            SNAP_METRICS.bloom_storage_miss.increment(1);
            return origin.storage_blob(account_hash, slot_hash);
        }
        self.storage_blob_at(account_hash, slot_hash, 0)
    }

    fn storage_blob_at(
        &self,
        account_hash: B256,
        slot_hash: B256,
        depth: usize,
    ) -> SnapshotResult<Option<Vec<u8>>> {
        let inner = self.inner.read();
        if self.is_stale() {
            return Err(SnapshotError::StaleSnapshot);
        }
        if let Some(slots) = inner.storage.get(&account_hash) {
            if let Some(blob) = slots.get(&slot_hash) {
                SNAP_METRICS.dirty_storage_hit.increment(1);
                SNAP_METRICS.dirty_storage_hit_depth.record(depth as f64);
                if blob.is_empty() {
                    SNAP_METRICS.dirty_storage_inex.increment(1);
                } else {
                    SNAP_METRICS.dirty_storage_read_bytes.increment(blob.len() as u64);
                }
                SNAP_METRICS.bloom_storage_true_hit.increment(1);
                return Ok(Some(blob.clone()));
            }
        }
        // Slot unknown to this diff, resolve from parent.
        match &inner.parent {
            Layer::Diff(parent) => parent.storage_blob_at(account_hash, slot_hash, depth + 1),
            Layer::Disk(parent) => {
                SNAP_METRICS.bloom_storage_false_hit.increment(1);
                parent.storage_blob(account_hash, slot_hash)
            }
        }
    }

    /// Merges this diff into its parent, flattening the whole chain below
    /// into a single layer carrying this layer's root.
    ///
    /// The parent is consumed: its maps move into the returned layer and it
    /// is marked stale, failing any reader still holding it. Panics if the
    /// parent was already flattened into by another child.
    pub(crate) fn flatten(self: &Arc<Self>) -> Arc<DiffLayer> {
        // If the parent is not a diff, we're the first in line, nothing to
        // merge into.
        let parent = match self.parent() {
            Layer::Disk(_) => return self.clone(),
            Layer::Diff(parent) => parent,
        };
        // Flatten the parent first. Apart from corner cases this only ever
        // merges one layer, so there's no need to group flattens.
        let parent = parent.flatten();

        // Snapshot the local delta before touching the parent; the maps are
        // write-once, so the copy stays consistent without holding both
        // layer locks at once.
        let (accounts, storage, diffed, memory) = {
            let inner = self.inner.read();
            (inner.accounts.clone(), inner.storage.clone(), inner.diffed.clone(), inner.memory)
        };

        let mut parent_inner = parent.inner.write();
        // Ensure the parent hasn't been flattened into by someone else
        // already; the stale swap is the linearisation point.
        if parent.stale.swap(true, Ordering::AcqRel) {
            panic!("parent diff layer is stale");
        }
        let mut merged_accounts = mem::take(&mut parent_inner.accounts);
        let mut merged_storage = mem::take(&mut parent_inner.storage);

        // Child wins on every conflict; deletion tombstones overwrite too.
        for (account_hash, blob) in accounts {
            merged_accounts.insert(account_hash, blob);
        }
        for (account_hash, slots) in storage {
            match merged_storage.entry(account_hash) {
                Entry::Vacant(entry) => {
                    entry.insert(slots);
                }
                Entry::Occupied(mut entry) => {
                    entry.get_mut().extend(slots);
                }
            }
        }

        Arc::new(DiffLayer {
            root: self.root,
            stale: AtomicBool::new(false),
            inner: RwLock::new(DiffLayerInner {
                parent: parent_inner.parent.clone(),
                origin: parent_inner.origin.clone(),
                memory: parent_inner.memory + memory,
                accounts: merged_accounts,
                storage: merged_storage,
                account_list: None,
                storage_list: HashMap::new(),
                diffed,
            }),
        })
    }

    /// Commits this bottom-most diff into its disk parent, returning the
    /// disk layer for the advanced persistent root and marking this layer
    /// stale.
    pub(crate) fn write_to_disk(&self) -> SnapshotResult<Arc<DiskLayer>> {
        let base = {
            let inner = self.inner.read();
            let base = match &inner.parent {
                Layer::Disk(disk) => disk.clone(),
                Layer::Diff(_) => panic!("writing non-bottom diff layer to disk"),
            };
            base.commit(&inner.accounts, &inner.storage, self.root)?
        };
        if self.stale.swap(true, Ordering::AcqRel) {
            panic!("diff layer is stale");
        }
        Ok(base)
    }

    /// Returns a sorted list of all account key hashes in this layer,
    /// including deleted ones. The list is materialised on first request
    /// and shared read-only afterwards.
    pub fn account_list(&self) -> Arc<Vec<B256>> {
        // If an old list already exists, return it.
        if let Some(list) = &self.inner.read().account_list {
            return list.clone();
        }
        let mut inner = self.inner.write();
        if let Some(list) = &inner.account_list {
            return list.clone();
        }
        let mut list: Vec<B256> = inner.accounts.keys().copied().collect();
        list.sort_unstable();
        let list = Arc::new(list);
        inner.memory += (list.len() * 32) as u64;
        inner.account_list = Some(list.clone());
        list
    }

    /// Returns a sorted list of all slot key hashes this layer holds for
    /// `account_hash`, including deleted ones, or `None` when the account's
    /// storage is untouched at this layer.
    pub fn storage_list(&self, account_hash: B256) -> Option<Arc<Vec<B256>>> {
        {
            let inner = self.inner.read();
            // Account not tracked by this layer at all.
            if !inner.storage.contains_key(&account_hash) {
                return None;
            }
            if let Some(list) = inner.storage_list.get(&account_hash) {
                return Some(list.clone());
            }
        }
        let mut inner = self.inner.write();
        if let Some(list) = inner.storage_list.get(&account_hash) {
            return Some(list.clone());
        }
        let mut list: Vec<B256> =
            inner.storage.get(&account_hash)?.keys().copied().collect();
        list.sort_unstable();
        let list = Arc::new(list);
        inner.memory += (list.len() * 32 + 32) as u64;
        inner.storage_list.insert(account_hash, list.clone());
        Some(list)
    }

    /// Sorted accounts and per-account slots for journaling, read in one
    /// consistent pass under the layer lock.
    pub(crate) fn journal_data(
        &self,
    ) -> (B256, Vec<(B256, Vec<u8>)>, Vec<(B256, Vec<(B256, Vec<u8>)>)>) {
        let inner = self.inner.read();
        let mut accounts: Vec<(B256, Vec<u8>)> =
            inner.accounts.iter().map(|(hash, blob)| (*hash, blob.clone())).collect();
        accounts.sort_unstable_by_key(|(hash, _)| *hash);

        let mut storage: Vec<(B256, Vec<(B256, Vec<u8>)>)> = inner
            .storage
            .iter()
            .map(|(account_hash, slots)| {
                let mut slots: Vec<(B256, Vec<u8>)> =
                    slots.iter().map(|(hash, blob)| (*hash, blob.clone())).collect();
                slots.sort_unstable_by_key(|(hash, _)| *hash);
                (*account_hash, slots)
            })
            .collect();
        storage.sort_unstable_by_key(|(hash, _)| *hash);

        (inner.parent.root(), accounts, storage)
    }
}

impl fmt::Debug for DiffLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffLayer")
            .field("root", &self.root)
            .field("stale", &self.is_stale())
            .finish()
    }
}
