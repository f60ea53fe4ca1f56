//! Scenario tests for the snapshot layer tree.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use alloy_primitives::B256;

use rust_eth_snapdb_common::{
    account_blob_key, storage_blob_key, StateStore, StateStoreResult,
};
use rust_eth_snapdb_memorydb::MemoryDB;

use crate::bloom::{account_bloom_hash, storage_bloom_hash, AGGREGATOR_MEMORY_LIMIT};
use crate::journal::{write_record, JournalRecord};
use crate::{
    AccountDelta, DiskLayer, Layer, SnapshotError, StorageDelta, Tree,
};

fn hash(byte: u8) -> B256 {
    B256::from([byte; 32])
}

fn delta(entries: &[(u8, &[u8])]) -> AccountDelta {
    entries.iter().map(|(h, blob)| (hash(*h), blob.to_vec())).collect()
}

fn storage_delta(entries: &[(u8, &[(u8, &[u8])])]) -> StorageDelta {
    entries
        .iter()
        .map(|(account, slots)| {
            let slots: HashMap<B256, Vec<u8>> =
                slots.iter().map(|(h, blob)| (hash(*h), blob.to_vec())).collect();
            (hash(*account), slots)
        })
        .collect()
}

fn seeded_store(accounts: &[(u8, &[u8])], slots: &[(u8, u8, &[u8])]) -> Arc<dyn StateStore> {
    let store = MemoryDB::new();
    for (h, blob) in accounts {
        store.put(&account_blob_key(hash(*h)), blob).unwrap();
    }
    for (account, slot, blob) in slots {
        store.put(&storage_blob_key(hash(*account), hash(*slot)), blob).unwrap();
    }
    Arc::new(store)
}

fn seeded_disk(accounts: &[(u8, &[u8])], slots: &[(u8, u8, &[u8])]) -> Arc<DiskLayer> {
    DiskLayer::new(seeded_store(accounts, slots), hash(0xd0))
}

/// StateStore wrapper counting point reads, to observe which tier served
/// a lookup.
#[derive(Debug)]
struct CountingStore {
    inner: MemoryDB,
    gets: AtomicU64,
}

impl CountingStore {
    fn new(inner: MemoryDB) -> Self {
        Self { inner, gets: AtomicU64::new(0) }
    }

    fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }
}

impl StateStore for CountingStore {
    fn get(&self, key: &[u8]) -> StateStoreResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StateStoreResult<()> {
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> StateStoreResult<()> {
        self.inner.delete(key)
    }

    fn contains(&self, key: &[u8]) -> StateStoreResult<bool> {
        self.inner.contains(key)
    }

    fn write_batch(
        &self,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StateStoreResult<()> {
        self.inner.write_batch(puts, deletes)
    }

    fn flush(&self) -> StateStoreResult<()> {
        self.inner.flush()
    }
}

#[test]
fn write_then_read_shadows_disk() {
    let disk = seeded_disk(&[(0xAA, b"disk-a"), (0xBB, b"disk-b")], &[]);
    let diff =
        Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"new-a")]), StorageDelta::new());

    assert_eq!(diff.account_blob(hash(0xAA)).unwrap(), Some(b"new-a".to_vec()));
    assert_eq!(diff.account_blob(hash(0xBB)).unwrap(), Some(b"disk-b".to_vec()));
    assert_eq!(diff.account_blob(hash(0xCC)).unwrap(), None);
}

#[test]
fn deletion_tombstone_shadows_disk_value() {
    let disk = seeded_disk(&[(0xAA, b"disk-a")], &[]);
    let diff = Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"")]), StorageDelta::new());

    // Deleted means an empty blob, not an absent account.
    assert_eq!(diff.account_blob(hash(0xAA)).unwrap(), Some(Vec::new()));
}

#[test]
fn tombstone_read_does_not_touch_disk() {
    let store = Arc::new(CountingStore::new(MemoryDB::new()));
    store.inner.put(&account_blob_key(hash(0xAA)), b"disk-a").unwrap();
    let disk = DiskLayer::new(store.clone() as Arc<dyn StateStore>, hash(0xd0));

    let d1 = Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"")]), StorageDelta::new());
    let d2 =
        Layer::Diff(d1).update(hash(0x02), delta(&[(0xBB, b"other")]), StorageDelta::new());

    assert_eq!(d2.account_blob(hash(0xAA)).unwrap(), Some(Vec::new()));
    assert_eq!(store.gets(), 0);
}

#[test]
fn multi_layer_shadowing_resolves_nearest_write() {
    let disk = seeded_disk(&[(0xCC, b"disk-c")], &[]);
    let d1 =
        Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"a1")]), StorageDelta::new());
    let d2 =
        Layer::Diff(d1).update(hash(0x02), delta(&[(0xAA, b"a2")]), StorageDelta::new());
    let d3 =
        Layer::Diff(d2).update(hash(0x03), delta(&[(0xBB, b"b3")]), StorageDelta::new());

    assert_eq!(d3.account_blob(hash(0xAA)).unwrap(), Some(b"a2".to_vec()));
    assert_eq!(d3.account_blob(hash(0xBB)).unwrap(), Some(b"b3".to_vec()));
    assert_eq!(d3.account_blob(hash(0xCC)).unwrap(), Some(b"disk-c".to_vec()));
}

#[test]
fn storage_reads_walk_layers_and_fall_to_disk() {
    let disk = seeded_disk(&[], &[(0x01, 0xA1, b"disk-slot")]);
    let d1 = Layer::Disk(disk).update(
        hash(0x01),
        AccountDelta::new(),
        storage_delta(&[(0x01, &[(0xA2, b"slot-two")])]),
    );
    let d2 = Layer::Diff(d1).update(
        hash(0x02),
        AccountDelta::new(),
        storage_delta(&[(0x01, &[(0xA2, b""), (0xA3, b"slot-three")])]),
    );

    // Child tombstone shadows the parent's write.
    assert_eq!(d2.storage_blob(hash(0x01), hash(0xA2)).unwrap(), Some(Vec::new()));
    assert_eq!(
        d2.storage_blob(hash(0x01), hash(0xA3)).unwrap(),
        Some(b"slot-three".to_vec())
    );
    assert_eq!(
        d2.storage_blob(hash(0x01), hash(0xA1)).unwrap(),
        Some(b"disk-slot".to_vec())
    );
    assert_eq!(d2.storage_blob(hash(0x01), hash(0xA4)).unwrap(), None);
}

#[test]
fn bloom_covers_own_and_ancestor_keys() {
    let disk = seeded_disk(&[], &[]);
    let d1 = Layer::Disk(disk).update(
        hash(0x01),
        delta(&[(0x10, b"one"), (0x11, b"")]),
        storage_delta(&[(0x10, &[(0xA1, b"s")])]),
    );
    let d2 = Layer::Diff(d1.clone()).update(
        hash(0x02),
        delta(&[(0x20, b"two")]),
        storage_delta(&[(0x20, &[(0xB1, b"t")])]),
    );

    let bloom = d2.bloom();
    for account in [hash(0x10), hash(0x11), hash(0x20)] {
        assert!(bloom.contains(account_bloom_hash(&account)));
    }
    assert!(bloom.contains(storage_bloom_hash(&hash(0x10), &hash(0xA1))));
    assert!(bloom.contains(storage_bloom_hash(&hash(0x20), &hash(0xB1))));

    // The parent's own filter knows nothing of the child's keys.
    assert!(!d1.bloom().contains(account_bloom_hash(&hash(0x20))));
}

#[test]
fn bloom_miss_short_circuits_to_disk() {
    let store = Arc::new(CountingStore::new(MemoryDB::new()));
    store.inner.put(&account_blob_key(hash(0xBB)), b"disk-b").unwrap();
    let disk = DiskLayer::new(store.clone() as Arc<dyn StateStore>, hash(0xd0));

    let diff =
        Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"only-a")]), StorageDelta::new());

    // The filter proves 0xBB is nowhere in the diff stack: one disk read,
    // no layer walk.
    assert_eq!(diff.account_blob(hash(0xBB)).unwrap(), Some(b"disk-b".to_vec()));
    assert_eq!(store.gets(), 1);

    // A key the layer does hold never reaches the store.
    assert_eq!(diff.account_blob(hash(0xAA)).unwrap(), Some(b"only-a".to_vec()));
    assert_eq!(store.gets(), 1);
}

#[test]
fn flatten_merges_child_over_parent_and_marks_parent_stale() {
    let disk = seeded_disk(&[], &[]);
    let d1 = Layer::Disk(disk).update(
        hash(0x01),
        delta(&[(0xAA, b"x"), (0xBB, b"y")]),
        StorageDelta::new(),
    );
    let d2 = Layer::Diff(d1.clone()).update(
        hash(0x02),
        delta(&[(0xAA, b"z"), (0xCC, b"w")]),
        StorageDelta::new(),
    );

    let merged = d2.flatten();
    assert_eq!(merged.root(), d2.root());
    assert!(matches!(merged.parent(), Layer::Disk(_)));

    assert_eq!(merged.account_blob(hash(0xAA)).unwrap(), Some(b"z".to_vec()));
    assert_eq!(merged.account_blob(hash(0xBB)).unwrap(), Some(b"y".to_vec()));
    assert_eq!(merged.account_blob(hash(0xCC)).unwrap(), Some(b"w".to_vec()));

    // A reader still holding the flattened-away parent fails cleanly.
    assert!(d1.is_stale());
    assert!(matches!(
        d1.account_blob(hash(0xAA)),
        Err(SnapshotError::StaleSnapshot)
    ));
}

#[test]
fn flatten_chain_preserves_all_reads() {
    let disk = seeded_disk(&[(0xDD, b"disk-d")], &[]);
    let d1 = Layer::Disk(disk).update(
        hash(0x01),
        delta(&[(0xAA, b"a1"), (0xBB, b"b1")]),
        storage_delta(&[(0xAA, &[(0x51, b"s1")])]),
    );
    let d2 = Layer::Diff(d1).update(
        hash(0x02),
        delta(&[(0xBB, b""), (0xCC, b"c2")]),
        storage_delta(&[(0xAA, &[(0x51, b"s2")])]),
    );
    let d3 =
        Layer::Diff(d2.clone()).update(hash(0x03), delta(&[(0xAA, b"a3")]), StorageDelta::new());

    let keys = [hash(0xAA), hash(0xBB), hash(0xCC), hash(0xDD), hash(0xEE)];
    let expected: Vec<_> = keys.iter().map(|k| d3.account_blob(*k).unwrap()).collect();
    let expected_slot = d3.storage_blob(hash(0xAA), hash(0x51)).unwrap();

    let merged = d3.flatten();
    for (key, expected) in keys.iter().zip(expected) {
        assert_eq!(merged.account_blob(*key).unwrap(), expected);
    }
    assert_eq!(merged.storage_blob(hash(0xAA), hash(0x51)).unwrap(), expected_slot);
    assert_eq!(expected_slot, Some(b"s2".to_vec()));
}

#[test]
#[should_panic(expected = "parent diff layer is stale")]
fn double_flatten_into_same_parent_panics() {
    let disk = seeded_disk(&[], &[]);
    let parent =
        Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"p")]), StorageDelta::new());
    let c1 =
        Layer::Diff(parent.clone()).update(hash(0x02), delta(&[(0xBB, b"1")]), StorageDelta::new());
    let c2 =
        Layer::Diff(parent).update(hash(0x03), delta(&[(0xCC, b"2")]), StorageDelta::new());

    let _ = c1.flatten();
    let _ = c2.flatten();
}

#[test]
#[should_panic(expected = "is empty")]
fn empty_slot_map_violates_producer_contract() {
    let disk = seeded_disk(&[], &[]);
    let mut storage = StorageDelta::new();
    storage.insert(hash(0x01), HashMap::new());
    Layer::Disk(disk).update(hash(0x01), AccountDelta::new(), storage);
}

#[test]
fn concurrent_reader_sees_old_value_or_stale_never_garbage() {
    let disk = seeded_disk(&[], &[]);
    let d0 =
        Layer::Disk(disk).update(hash(0x01), delta(&[(0xAA, b"v1")]), StorageDelta::new());
    let d1 =
        Layer::Diff(d0).update(hash(0x02), delta(&[(0xBB, b"v2")]), StorageDelta::new());

    let reader = {
        let d1 = d1.clone();
        thread::spawn(move || {
            let mut saw_stale = false;
            for _ in 0..50_000 {
                match d1.account_blob(hash(0xAA)) {
                    Ok(Some(blob)) => {
                        assert_eq!(blob, b"v1");
                        assert!(!saw_stale, "live value after stale observation");
                    }
                    Err(SnapshotError::StaleSnapshot) => saw_stale = true,
                    other => panic!("unexpected read result: {other:?}"),
                }
            }
        })
    };

    let merged = d1.flatten();
    assert_eq!(merged.account_blob(hash(0xAA)).unwrap(), Some(b"v1".to_vec()));
    reader.join().unwrap();
}

#[test]
fn account_list_is_sorted_and_cached() {
    let disk = seeded_disk(&[], &[]);
    let diff = Layer::Disk(disk).update(
        hash(0x01),
        delta(&[(0x30, b"c"), (0x10, b"a"), (0x20, b"")]),
        StorageDelta::new(),
    );

    let memory_before = diff.memory();
    let list = diff.account_list();
    assert_eq!(*list, vec![hash(0x10), hash(0x20), hash(0x30)]);
    assert_eq!(diff.memory(), memory_before + 3 * 32);

    // Second request serves the cached view.
    let again = diff.account_list();
    assert!(Arc::ptr_eq(&list, &again));
    assert_eq!(diff.memory(), memory_before + 3 * 32);
}

#[test]
fn storage_list_tracks_touched_accounts_only() {
    let disk = seeded_disk(&[], &[]);
    let diff = Layer::Disk(disk).update(
        hash(0x01),
        AccountDelta::new(),
        storage_delta(&[(0x01, &[(0xB2, b"two"), (0xB1, b"")])]),
    );

    let list = diff.storage_list(hash(0x01)).unwrap();
    assert_eq!(*list, vec![hash(0xB1), hash(0xB2)]);
    assert!(diff.storage_list(hash(0x02)).is_none());

    let again = diff.storage_list(hash(0x01)).unwrap();
    assert!(Arc::ptr_eq(&list, &again));
}

#[test]
fn layer_memory_accounts_for_deltas() {
    let disk = seeded_disk(&[], &[]);
    let diff = Layer::Disk(disk).update(
        hash(0x01),
        delta(&[(0xAA, b"12345"), (0xBB, b"")]),
        storage_delta(&[(0xAA, &[(0x51, b"123")])]),
    );
    // 32+5 and 32+0 for the accounts, 32+3 for the slot.
    assert_eq!(diff.memory(), 37 + 32 + 35);
}

#[test]
fn tree_update_rejects_unknown_parent_and_cycles() {
    let tree = Tree::new(seeded_disk(&[], &[]));

    assert!(matches!(
        tree.update(hash(0x77), hash(0x01), AccountDelta::new(), StorageDelta::new()),
        Err(SnapshotError::UnknownParent(_))
    ));
    assert!(matches!(
        tree.update(hash(0xd0), hash(0xd0), AccountDelta::new(), StorageDelta::new()),
        Err(SnapshotError::Cycle(_))
    ));
}

#[test]
fn tree_serves_reads_through_registered_layers() {
    let tree = Tree::new(seeded_disk(&[(0xAA, b"disk-a")], &[]));
    tree.update(hash(0xd0), hash(0x01), delta(&[(0xBB, b"b1")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xAA, b"a2")]), StorageDelta::new()).unwrap();

    let head = tree.snapshot(hash(0x02)).unwrap();
    assert_eq!(head.account_blob(hash(0xAA)).unwrap(), Some(b"a2".to_vec()));
    assert_eq!(head.account_blob(hash(0xBB)).unwrap(), Some(b"b1".to_vec()));

    assert!(tree.snapshot(hash(0x99)).is_none());
    assert_eq!(tree.layer_count(), 3);
}

#[test]
fn cap_within_limit_leaves_tree_alone() {
    let tree = Tree::new(seeded_disk(&[], &[]));
    tree.update(hash(0xd0), hash(0x01), delta(&[(0xAA, b"a1")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xBB, b"b2")]), StorageDelta::new()).unwrap();

    tree.cap(hash(0x02), 4, None).unwrap();
    assert_eq!(tree.layer_count(), 3);
    assert_eq!(tree.disk_root(), hash(0xd0));
}

#[test]
fn cap_flattens_overflow_into_memory_aggregator() {
    let tree = Tree::new(seeded_disk(&[], &[]));
    tree.update(hash(0xd0), hash(0x01), delta(&[(0xAA, b"a1")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xBB, b"b2")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x02), hash(0x03), delta(&[(0xAA, b"a3")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x03), hash(0x04), delta(&[(0xCC, b"c4")]), StorageDelta::new()).unwrap();

    let old_bottom = match tree.snapshot(hash(0x01)).unwrap() {
        Layer::Diff(diff) => diff,
        Layer::Disk(_) => unreachable!(),
    };

    tree.cap(hash(0x04), 2, None).unwrap();

    // Layers 0x01 and 0x02 merged into an aggregator registered as 0x02.
    assert!(tree.snapshot(hash(0x01)).is_none());
    let aggregator = tree.snapshot(hash(0x02)).unwrap();
    assert!(matches!(aggregator.parent(), Some(Layer::Disk(_))));
    assert_eq!(tree.disk_root(), hash(0xd0));

    // The flattened-away bottom fails a held reader; the merged history
    // stays readable through the head.
    assert!(matches!(
        old_bottom.account_blob(hash(0xAA)),
        Err(SnapshotError::StaleSnapshot)
    ));
    let head = tree.snapshot(hash(0x04)).unwrap();
    assert_eq!(head.account_blob(hash(0xAA)).unwrap(), Some(b"a3".to_vec()));
    assert_eq!(head.account_blob(hash(0xBB)).unwrap(), Some(b"b2".to_vec()));
    assert_eq!(head.account_blob(hash(0xCC)).unwrap(), Some(b"c4".to_vec()));
}

#[test]
fn cap_commits_heavy_aggregator_and_replumbs_origins() {
    let store = seeded_store(&[], &[]);
    let tree = Tree::new(DiskLayer::new(store.clone(), hash(0xd0)));

    // A bottom layer heavy enough to cross the aggregation limit.
    let big = vec![0xab; AGGREGATOR_MEMORY_LIMIT as usize + 1024];
    let mut heavy = AccountDelta::new();
    heavy.insert(hash(0xAA), big.clone());
    tree.update(hash(0xd0), hash(0x01), heavy, StorageDelta::new()).unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xBB, b"b2"), (0xCC, b"")]), StorageDelta::new())
        .unwrap();

    tree.cap(hash(0x02), 1, None).unwrap();

    // Disk advanced to the aggregator's root, old disk layer is gone.
    assert_eq!(tree.disk_root(), hash(0x01));
    assert!(tree.snapshot(hash(0xd0)).is_none());
    assert_eq!(store.get(&account_blob_key(hash(0xAA))).unwrap(), Some(big.clone()));

    // The survivor reads through its rebuilt bloom and new origin.
    let head = tree.snapshot(hash(0x02)).unwrap();
    assert_eq!(head.account_blob(hash(0xAA)).unwrap(), Some(big));
    assert_eq!(head.account_blob(hash(0xBB)).unwrap(), Some(b"b2".to_vec()));
    assert_eq!(head.account_blob(hash(0xCC)).unwrap(), Some(Vec::new()));
}

#[test]
fn cap_zero_commits_everything_and_drops_tombstones() {
    let store = seeded_store(&[(0xCC, b"doomed")], &[(0xAA, 0x51, b"old-slot")]);
    let tree = Tree::new(DiskLayer::new(store.clone(), hash(0xd0)));

    tree.update(
        hash(0xd0),
        hash(0x01),
        delta(&[(0xAA, b"a1")]),
        storage_delta(&[(0xAA, &[(0x51, b"new-slot")])]),
    )
    .unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xCC, b"")]), StorageDelta::new()).unwrap();

    tree.cap(hash(0x02), 0, None).unwrap();

    assert_eq!(tree.layer_count(), 1);
    assert_eq!(tree.disk_root(), hash(0x02));

    // Tombstoned account is deleted from the store, not stored empty.
    assert_eq!(store.get(&account_blob_key(hash(0xCC))).unwrap(), None);
    assert_eq!(store.get(&account_blob_key(hash(0xAA))).unwrap(), Some(b"a1".to_vec()));

    let disk = tree.snapshot(hash(0x02)).unwrap();
    assert_eq!(disk.account_blob(hash(0xCC)).unwrap(), None);
    assert_eq!(disk.storage_blob(hash(0xAA), hash(0x51)).unwrap(), Some(b"new-slot".to_vec()));
}

#[test]
fn cap_honours_cancellation_flag() {
    let tree = Tree::new(seeded_disk(&[], &[]));
    tree.update(hash(0xd0), hash(0x01), delta(&[(0xAA, b"a1")]), StorageDelta::new()).unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xBB, b"b2")]), StorageDelta::new()).unwrap();

    let cancel = AtomicBool::new(true);
    assert!(matches!(
        tree.cap(hash(0x02), 0, Some(&cancel)),
        Err(SnapshotError::Cancelled)
    ));
    // Nothing was committed.
    assert_eq!(tree.disk_root(), hash(0xd0));
    assert_eq!(tree.layer_count(), 3);
}

#[test]
fn journal_roundtrip_restores_the_exact_tree() {
    let store = seeded_store(&[(0xDD, b"disk-d")], &[]);
    let tree = Tree::new(DiskLayer::new(store.clone(), hash(0xd0)));

    tree.update(
        hash(0xd0),
        hash(0x01),
        delta(&[(0xAA, b"a1"), (0xBB, b"")]),
        storage_delta(&[(0xAA, &[(0x51, b"s1"), (0x52, b"")])]),
    )
    .unwrap();
    tree.update(hash(0x01), hash(0x02), delta(&[(0xAA, b"a2")]), StorageDelta::new()).unwrap();
    // A fork hanging off the same parent survives journaling too.
    tree.update(hash(0x01), hash(0x03), delta(&[(0xCC, b"c3")]), StorageDelta::new()).unwrap();

    let mut journal = Vec::new();
    let written = tree.journal(&mut journal, None).unwrap();
    assert_eq!(written, 3);

    let restored =
        Tree::from_journal(DiskLayer::new(store, hash(0xd0)), &mut journal.as_slice());

    let mut roots = restored.roots();
    roots.sort_unstable();
    let mut expected = tree.roots();
    expected.sort_unstable();
    assert_eq!(roots, expected);

    let head = restored.snapshot(hash(0x02)).unwrap();
    assert_eq!(head.account_blob(hash(0xAA)).unwrap(), Some(b"a2".to_vec()));
    assert_eq!(head.account_blob(hash(0xBB)).unwrap(), Some(Vec::new()));
    assert_eq!(head.account_blob(hash(0xDD)).unwrap(), Some(b"disk-d".to_vec()));
    assert_eq!(head.storage_blob(hash(0xAA), hash(0x51)).unwrap(), Some(b"s1".to_vec()));
    assert_eq!(head.storage_blob(hash(0xAA), hash(0x52)).unwrap(), Some(Vec::new()));

    let fork = restored.snapshot(hash(0x03)).unwrap();
    assert_eq!(fork.account_blob(hash(0xCC)).unwrap(), Some(b"c3".to_vec()));
    assert_eq!(fork.parent().unwrap().root(), hash(0x01));
}

#[test]
fn journal_replay_skips_bad_records_best_effort() {
    let disk_root = hash(0xd0);
    let mut stream = Vec::new();

    write_record(
        &mut stream,
        &JournalRecord {
            root: hash(0x01),
            parent_root: disk_root,
            accounts: vec![(hash(0xAA), b"a1".to_vec())],
            storage: vec![],
        },
    )
    .unwrap();

    // A framed record whose payload cannot decode.
    stream.push(16);
    stream.extend_from_slice(&[0xee; 16]);

    // Attaches to the good record above.
    write_record(
        &mut stream,
        &JournalRecord {
            root: hash(0x02),
            parent_root: hash(0x01),
            accounts: vec![(hash(0xBB), b"b2".to_vec())],
            storage: vec![],
        },
    )
    .unwrap();

    // Parent was the garbage record; unattachable, dropped.
    write_record(
        &mut stream,
        &JournalRecord {
            root: hash(0x03),
            parent_root: hash(0xee),
            accounts: vec![],
            storage: vec![],
        },
    )
    .unwrap();

    let restored = Tree::from_journal(
        DiskLayer::new(seeded_store(&[], &[]), disk_root),
        &mut stream.as_slice(),
    );

    assert!(restored.snapshot(hash(0x01)).is_some());
    assert!(restored.snapshot(hash(0x02)).is_some());
    assert!(restored.snapshot(hash(0x03)).is_none());

    let head = restored.snapshot(hash(0x02)).unwrap();
    assert_eq!(head.account_blob(hash(0xAA)).unwrap(), Some(b"a1".to_vec()));
    assert_eq!(head.account_blob(hash(0xBB)).unwrap(), Some(b"b2".to_vec()));
}

#[test]
fn committed_disk_layer_goes_stale() {
    let store = seeded_store(&[(0xAA, b"old")], &[]);
    let disk = DiskLayer::new(store, hash(0xd0));

    let next = disk.commit(&delta(&[(0xAA, b"")]), &StorageDelta::new(), hash(0xd1)).unwrap();

    assert!(disk.is_stale());
    assert!(matches!(
        disk.account_blob(hash(0xAA)),
        Err(SnapshotError::StaleSnapshot)
    ));
    assert_eq!(next.root(), hash(0xd1));
    assert_eq!(next.account_blob(hash(0xAA)).unwrap(), None);
}

#[test]
fn disk_layer_open_finds_persisted_root() {
    let store = seeded_store(&[], &[]);
    assert!(DiskLayer::open(store.clone()).unwrap().is_none());

    let disk = DiskLayer::new(store.clone(), hash(0xd0));
    disk.commit(&delta(&[(0xAA, b"a")]), &StorageDelta::new(), hash(0xd1)).unwrap();

    let reopened = DiskLayer::open(store).unwrap().unwrap();
    assert_eq!(reopened.root(), hash(0xd1));
    assert_eq!(reopened.account_blob(hash(0xAA)).unwrap(), Some(b"a".to_vec()));
}

#[test]
fn disk_layer_exposes_empty_delta_views() {
    let disk = Layer::Disk(seeded_disk(&[(0xAA, b"a")], &[]));
    assert!(disk.account_list().is_empty());
    assert!(disk.storage_list(hash(0xAA)).is_none());
    assert!(disk.parent().is_none());
}
