//! Error types for snapshot operations.

use alloy_primitives::B256;

use rust_eth_snapdb_common::StateStoreError;

use crate::journal::JournalError;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Error type for snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The layer was flattened away. The caller must re-resolve the current
    /// snapshot from the tree and retry.
    #[error("snapshot stale")]
    StaleSnapshot,
    /// `update` was given a parent root absent from the tree.
    #[error("parent snapshot [{0}] missing")]
    UnknownParent(B256),
    /// The requested snapshot root is not registered in the tree.
    #[error("snapshot [{0}] missing")]
    UnknownSnapshot(B256),
    /// A diff layer would reference itself.
    #[error("snapshot cycle at [{0}]")]
    Cycle(B256),
    /// The operation needs a diff layer but was handed the disk layer.
    #[error("snapshot [{0}] is disk layer")]
    DiskLayerHead(B256),
    /// The caller-supplied cancellation flag was raised.
    #[error("operation cancelled")]
    Cancelled,
    /// Persistent store failure, surfaced unchanged.
    #[error(transparent)]
    Store(#[from] StateStoreError),
    /// Journal stream failure.
    #[error(transparent)]
    Journal(#[from] JournalError),
}
