//! Metrics for the snapshot layer tree.

use once_cell::sync::Lazy;
use reth_metrics::{
    metrics::{Counter, Gauge, Histogram},
    Metrics,
};

/// Metrics for the snapshot read and write paths.
#[derive(Metrics)]
#[metrics(scope = "snapdb.snapshot")]
pub(crate) struct SnapshotMetrics {
    /// Counter of account reads served by a diff layer
    pub(crate) dirty_account_hit: Counter,
    /// Counter of storage reads served by a diff layer
    pub(crate) dirty_storage_hit: Counter,
    /// Histogram of the diff stack depth at which account reads hit
    pub(crate) dirty_account_hit_depth: Histogram,
    /// Histogram of the diff stack depth at which storage reads hit
    pub(crate) dirty_storage_hit_depth: Histogram,
    /// Counter of account reads resolving to a deletion tombstone
    pub(crate) dirty_account_inex: Counter,
    /// Counter of storage reads resolving to a deletion tombstone
    pub(crate) dirty_storage_inex: Counter,
    /// Counter of account bytes read out of diff layers
    pub(crate) dirty_account_read_bytes: Counter,
    /// Counter of storage bytes read out of diff layers
    pub(crate) dirty_storage_read_bytes: Counter,
    /// Counter of account bytes written into new diff layers
    pub(crate) dirty_account_write_bytes: Counter,
    /// Counter of storage bytes written into new diff layers
    pub(crate) dirty_storage_write_bytes: Counter,
    /// Counter of account reads short-circuited to disk by the bloom filter
    pub(crate) bloom_account_miss: Counter,
    /// Counter of storage reads short-circuited to disk by the bloom filter
    pub(crate) bloom_storage_miss: Counter,
    /// Counter of account bloom hits confirmed by a diff layer
    pub(crate) bloom_account_true_hit: Counter,
    /// Counter of storage bloom hits confirmed by a diff layer
    pub(crate) bloom_storage_true_hit: Counter,
    /// Counter of account bloom hits that fell through to disk
    pub(crate) bloom_account_false_hit: Counter,
    /// Counter of storage bloom hits that fell through to disk
    pub(crate) bloom_storage_false_hit: Counter,
    /// Counter of account bytes served by the disk layer
    pub(crate) disk_account_read_bytes: Counter,
    /// Counter of storage bytes served by the disk layer
    pub(crate) disk_storage_read_bytes: Counter,
    /// Histogram of bloom index build durations (in seconds)
    pub(crate) bloom_index_duration: Histogram,
    /// Gauge of the predicted bloom false positive rate
    pub(crate) bloom_error_rate: Gauge,
}

/// Process-wide metrics instance shared by all layers.
pub(crate) static SNAP_METRICS: Lazy<SnapshotMetrics> = Lazy::new(SnapshotMetrics::default);
