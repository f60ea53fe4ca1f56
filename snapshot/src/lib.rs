//! Layered state snapshot cache for a chain execution engine.
//!
//! The tree holds a persistent disk layer at the bottom and a stack of
//! immutable-once-published in-memory diff layers above it, one per block.
//! Reads walk from the tip toward the base, short-circuited by per-layer
//! bloom filters; writes push new tip layers; capping flattens old diffs
//! downward and eventually commits the aggregate into the disk layer.

pub mod bloom;
mod difflayer;
mod disklayer;
mod errors;
pub mod journal;
mod layer;
mod metrics;
mod tree;

pub use difflayer::{AccountDelta, DiffLayer, StorageDelta};
pub use disklayer::DiskLayer;
pub use errors::{SnapshotError, SnapshotResult};
pub use layer::Layer;
pub use tree::{Tree, DEFAULT_DIFF_LAYERS};

#[cfg(test)]
mod tests;
