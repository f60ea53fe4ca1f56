//! Registry of live snapshot layers and the capping machinery.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy_primitives::B256;
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::bloom::AGGREGATOR_MEMORY_LIMIT;
use crate::difflayer::{AccountDelta, DiffLayer, StorageDelta};
use crate::disklayer::DiskLayer;
use crate::errors::{SnapshotError, SnapshotResult};
use crate::journal::{self, JournalRecord};
use crate::layer::Layer;

/// Default number of diff layers kept in memory on top of the disk layer
/// before capping starts flattening the overflow downward.
pub const DEFAULT_DIFF_LAYERS: usize = 128;

fn check_cancel(cancel: Option<&AtomicBool>) -> SnapshotResult<()> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(SnapshotError::Cancelled),
        _ => Ok(()),
    }
}

/// The set of live snapshot layers, keyed by state root.
///
/// The tree owns exactly one disk layer and any number of diff layers
/// stacked above it. `update` grows the tree at the tip, `cap` flattens
/// history at the bottom and eventually advances the disk layer.
#[derive(Debug)]
pub struct Tree {
    layers: Mutex<HashMap<B256, Layer>>,
}

impl Tree {
    /// Creates a tree rooted in the given disk layer.
    pub fn new(disk: Arc<DiskLayer>) -> Self {
        let mut layers = HashMap::new();
        layers.insert(disk.root(), Layer::Disk(disk));
        Self { layers: Mutex::new(layers) }
    }

    /// Looks up a live layer by its state root.
    pub fn snapshot(&self, root: B256) -> Option<Layer> {
        self.layers.lock().get(&root).cloned()
    }

    /// Number of live layers, the disk layer included.
    pub fn layer_count(&self) -> usize {
        self.layers.lock().len()
    }

    /// State roots of all live layers.
    pub fn roots(&self) -> Vec<B256> {
        self.layers.lock().keys().copied().collect()
    }

    /// Root of the current disk layer.
    pub fn disk_root(&self) -> B256 {
        self.layers
            .lock()
            .values()
            .find_map(|layer| match layer {
                Layer::Disk(disk) => Some(disk.root()),
                Layer::Diff(_) => None,
            })
            .expect("layer tree has no disk layer")
    }

    /// Registers a new diff layer with the given deltas on top of
    /// `parent_root`.
    pub fn update(
        &self,
        parent_root: B256,
        new_root: B256,
        accounts: AccountDelta,
        storage: StorageDelta,
    ) -> SnapshotResult<()> {
        if new_root == parent_root {
            return Err(SnapshotError::Cycle(new_root));
        }
        let parent = self
            .snapshot(parent_root)
            .ok_or(SnapshotError::UnknownParent(parent_root))?;
        let layer = parent.update(new_root, accounts, storage);
        self.layers.lock().insert(new_root, Layer::Diff(layer));
        Ok(())
    }

    /// Caps the diff chain under `root` at `layers` in-memory diffs.
    ///
    /// Anything below the limit is flattened into a single aggregator diff,
    /// which is kept in memory until its weight crosses the aggregation
    /// limit and is then committed into the disk layer. `layers == 0`
    /// commits the entire chain. When the disk layer advances, stale
    /// layers and subtrees hanging off them are pruned and the blooms of
    /// every survivor are rebuilt from the new disk layer; the new disk
    /// layer is registered before any surviving structure is touched.
    ///
    /// The cancellation flag is honoured at layer boundaries only.
    pub fn cap(
        &self,
        root: B256,
        layers: usize,
        cancel: Option<&AtomicBool>,
    ) -> SnapshotResult<()> {
        let diff = match self.snapshot(root) {
            Some(Layer::Diff(diff)) => diff,
            Some(Layer::Disk(_)) => return Err(SnapshotError::DiskLayerHead(root)),
            None => return Err(SnapshotError::UnknownSnapshot(root)),
        };
        let mut layers_map = self.layers.lock();

        // Full commit requested: flatten the diffs and merge onto disk.
        if layers == 0 {
            check_cancel(cancel)?;
            let bottom = diff.flatten();
            let base = bottom.write_to_disk()?;
            trace!(target: "snapshot::tree", root = %base.root(), "Committed full diff chain to disk");
            layers_map.clear();
            layers_map.insert(base.root(), Layer::Disk(base));
            return Ok(());
        }
        let persisted = Self::cap_layers(&mut layers_map, &diff, layers, cancel)?;

        // Remove any layer that is stale or links into a stale layer.
        let mut children: HashMap<B256, Vec<B256>> = HashMap::new();
        for (root, layer) in layers_map.iter() {
            if let Layer::Diff(diff) = layer {
                children.entry(diff.parent().root()).or_default().push(*root);
            }
        }
        let mut queue: Vec<B256> = layers_map
            .iter()
            .filter(|(_, layer)| layer.is_stale())
            .map(|(root, _)| *root)
            .collect();
        while let Some(root) = queue.pop() {
            layers_map.remove(&root);
            if let Some(kids) = children.remove(&root) {
                queue.extend(kids);
            }
        }

        // If the disk layer was modified, regenerate all the surviving
        // blooms (and with them the origin pointers) from the new base.
        if let Some(persisted) = persisted {
            let mut queue = vec![persisted.root()];
            while let Some(root) = queue.pop() {
                if let Some(kids) = children.get(&root) {
                    for kid in kids {
                        if let Some(Layer::Diff(diff)) = layers_map.get(kid) {
                            diff.rebloom(persisted.clone());
                        }
                        queue.push(*kid);
                    }
                }
            }
        }
        Ok(())
    }

    /// Dives `layers` deep from `head` and flattens everything below the
    /// boundary. Returns the new disk layer if the aggregator was heavy
    /// enough to be committed.
    fn cap_layers(
        layers_map: &mut HashMap<B256, Layer>,
        head: &Arc<DiffLayer>,
        layers: usize,
        cancel: Option<&AtomicBool>,
    ) -> SnapshotResult<Option<Arc<DiskLayer>>> {
        // Dive until we run out of layers or reach the persistent database.
        let mut diff = head.clone();
        for _ in 0..layers.saturating_sub(1) {
            match diff.parent() {
                Layer::Diff(parent) => diff = parent,
                Layer::Disk(_) => return Ok(None),
            }
        }
        let parent = match diff.parent() {
            Layer::Disk(_) => return Ok(None),
            Layer::Diff(parent) => parent,
        };
        check_cancel(cancel)?;

        // Flatten the chain below the boundary into one aggregator diff.
        let flattened = parent.flatten();
        layers_map.insert(flattened.root(), Layer::Diff(flattened.clone()));
        diff.set_parent(Layer::Diff(flattened.clone()));

        // Hold the aggregator in memory until it outgrows its allowance.
        if flattened.memory() < AGGREGATOR_MEMORY_LIMIT {
            return Ok(None);
        }
        check_cancel(cancel)?;

        let base = flattened.write_to_disk()?;
        trace!(
            target: "snapshot::tree",
            root = %base.root(),
            memory = flattened.memory(),
            "Committed aggregator diff to disk"
        );
        layers_map.insert(base.root(), Layer::Disk(base.clone()));
        diff.set_parent(Layer::Disk(base.clone()));
        Ok(Some(base))
    }

    /// Serialises every live diff into `writer`, oldest layer first, so a
    /// restart can rebuild the tree in a single pass.
    pub fn journal<W: Write>(
        &self,
        writer: &mut W,
        cancel: Option<&AtomicBool>,
    ) -> SnapshotResult<usize> {
        let layers_map = self.layers.lock();

        let mut disk_root = None;
        let mut children: HashMap<B256, Vec<B256>> = HashMap::new();
        for (root, layer) in layers_map.iter() {
            match layer {
                Layer::Disk(_) => disk_root = Some(*root),
                Layer::Diff(diff) => {
                    children.entry(diff.parent().root()).or_default().push(*root)
                }
            }
        }
        let disk_root = disk_root.expect("layer tree has no disk layer");
        for kids in children.values_mut() {
            kids.sort_unstable();
        }

        let mut queue: VecDeque<B256> =
            children.get(&disk_root).cloned().unwrap_or_default().into();
        let mut written = 0usize;
        while let Some(root) = queue.pop_front() {
            check_cancel(cancel)?;
            if let Some(Layer::Diff(diff)) = layers_map.get(&root) {
                let (parent_root, accounts, storage) = diff.journal_data();
                journal::write_record(
                    writer,
                    &JournalRecord { root, parent_root, accounts, storage },
                )?;
                written += 1;
            }
            if let Some(kids) = children.get(&root) {
                queue.extend(kids.iter().copied());
            }
        }
        trace!(target: "snapshot::journal", layers = written, "Journaled snapshot tree");
        Ok(written)
    }

    /// Rebuilds a tree from a journal stream on top of `disk`.
    ///
    /// Recovery is best-effort: undecodable records are skipped, records
    /// whose parent went missing with a skipped record are dropped, and a
    /// broken stream ends replay with whatever was restored so far.
    pub fn from_journal<R: Read>(disk: Arc<DiskLayer>, reader: &mut R) -> Self {
        let tree = Self::new(disk);
        let mut restored = 0usize;
        loop {
            match journal::read_record(reader) {
                Ok(Some(record)) => {
                    let JournalRecord { root, parent_root, accounts, storage } = record;
                    if storage.iter().any(|(_, slots)| slots.is_empty()) {
                        warn!(
                            target: "snapshot::journal",
                            %root,
                            "Skipping journal record with empty slot map"
                        );
                        continue;
                    }
                    let accounts: AccountDelta = accounts.into_iter().collect();
                    let storage: StorageDelta = storage
                        .into_iter()
                        .map(|(account, slots)| (account, slots.into_iter().collect()))
                        .collect();
                    match tree.update(parent_root, root, accounts, storage) {
                        Ok(()) => restored += 1,
                        Err(err) => warn!(
                            target: "snapshot::journal",
                            %root,
                            %err,
                            "Skipping unattachable journal record"
                        ),
                    }
                }
                Ok(None) => break,
                Err(err) if err.is_recoverable() => {
                    warn!(target: "snapshot::journal", %err, "Skipping undecodable journal record");
                }
                Err(err) => {
                    warn!(target: "snapshot::journal", %err, "Journal replay aborted");
                    break;
                }
            }
        }
        trace!(target: "snapshot::journal", layers = restored, "Restored snapshot tree from journal");
        tree
    }
}
