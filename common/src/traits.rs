//! StateStore trait definitions for the persistent flat-state store.

use std::fmt::Debug;

use auto_impl::auto_impl;

// Default configuration constants
pub const DEFAULT_MAX_OPEN_FILES: i32 = 1_000_000;
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 256 * 1024 * 1024; // 256MB
pub const DEFAULT_MAX_WRITE_BUFFER_NUMBER: i32 = 4;
pub const DEFAULT_TARGET_FILE_SIZE_BASE: u64 = 64 * 1024 * 1024; // 64MB
pub const DEFAULT_MAX_BACKGROUND_JOBS: i32 = 4;
pub const DEFAULT_CREATE_IF_MISSING: bool = true;
pub const DEFAULT_BLOB_CACHE_SIZE: u32 = 1_000_000; // entries

// ReadOptions configuration constants
pub const DEFAULT_FILL_CACHE: bool = true;
pub const DEFAULT_READAHEAD_SIZE: usize = 128 * 1024; // 128KB
pub const DEFAULT_ASYNC_IO: bool = true;
pub const DEFAULT_VERIFY_CHECKSUMS: bool = false;

/// Result type for StateStore operations.
pub type StateStoreResult<T> = Result<T, StateStoreError>;

/// Error type for StateStore operations.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Key-value contract the snapshot layers persist through.
///
/// Implementations must be safe to share across threads; the snapshot tree
/// holds the store behind `Arc<dyn StateStore>` and reads from it while a
/// commit is being assembled on another thread.
#[auto_impl(Box, Arc)]
pub trait StateStore: Send + Sync + Debug {
    /// Get the value stored under `key`.
    fn get(&self, key: &[u8]) -> StateStoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> StateStoreResult<()>;

    /// Remove `key` and its value if present.
    fn delete(&self, key: &[u8]) -> StateStoreResult<()>;

    /// Check whether `key` is present.
    fn contains(&self, key: &[u8]) -> StateStoreResult<bool>;

    /// Apply all puts and deletes as a single atomic batch.
    fn write_batch(
        &self,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StateStoreResult<()>;

    /// Flush all pending writes to durable storage.
    fn flush(&self) -> StateStoreResult<()>;
}

/// Configuration for StateStore backends.
#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum write buffer number.
    pub max_write_buffer_number: i32,
    /// Target file size for compaction.
    pub target_file_size_base: u64,
    /// Maximum background jobs.
    pub max_background_jobs: i32,
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,
    /// LRU blob cache size in number of entries.
    pub blob_cache_size: u32,
    /// Whether to fill cache on reads.
    pub fill_cache: bool,
    /// Readahead size in bytes for sequential reads.
    pub readahead_size: usize,
    /// Whether to enable async IO for reads.
    pub async_io: bool,
    /// Whether to verify checksums on reads.
    pub verify_checksums: bool,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_write_buffer_number: DEFAULT_MAX_WRITE_BUFFER_NUMBER,
            target_file_size_base: DEFAULT_TARGET_FILE_SIZE_BASE,
            max_background_jobs: DEFAULT_MAX_BACKGROUND_JOBS,
            create_if_missing: DEFAULT_CREATE_IF_MISSING,
            blob_cache_size: DEFAULT_BLOB_CACHE_SIZE,
            fill_cache: DEFAULT_FILL_CACHE,
            readahead_size: DEFAULT_READAHEAD_SIZE,
            async_io: DEFAULT_ASYNC_IO,
            verify_checksums: DEFAULT_VERIFY_CHECKSUMS,
        }
    }
}
