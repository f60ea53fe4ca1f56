//! DiskDB implementation for RocksDB integration.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{Options, ReadOptions, WriteBatch, WriteOptions, DB};
use schnellru::{ByLength, LruMap};
use tracing::{error, trace, warn};

use rust_eth_snapdb_common::{StateStore, StateStoreConfig, StateStoreError, StateStoreResult};

use reth_metrics::{metrics::Counter, Metrics};

/// Metrics for the `DiskDB`.
#[derive(Metrics, Clone)]
#[metrics(scope = "snapdb.diskdb")]
pub(crate) struct DiskDBMetrics {
    /// Counter of cache hits
    pub(crate) cache_hits: Counter,
    /// Counter of cache misses
    pub(crate) cache_misses: Counter,
}

/// StateStore implementation using RocksDB.
pub struct DiskDB {
    /// The underlying RocksDB instance.
    db: Arc<DB>,
    /// Configuration for the database.
    config: StateStoreConfig,
    /// Write options for batch operations.
    write_options: WriteOptions,
    /// Read options for read operations.
    read_options: ReadOptions,
    /// LRU cache for key-value pairs.
    cache: Arc<Mutex<LruMap<Vec<u8>, Option<Vec<u8>>, ByLength>>>,
    /// Metrics for the DiskDB.
    metrics: DiskDBMetrics,
}

impl Debug for DiskDB {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskDB").field("config", &self.config).finish()
    }
}

impl Clone for DiskDB {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: self.config.clone(),
            write_options: WriteOptions::default(),
            read_options: Self::read_options(&self.config),
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl DiskDB {
    /// Create a new DiskDB instance.
    pub fn new(path: &str, config: StateStoreConfig) -> StateStoreResult<Self> {
        let mut db_opts = Options::default();
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_write_buffer_size(config.write_buffer_size);
        db_opts.set_max_write_buffer_number(config.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.target_file_size_base);
        db_opts.set_max_background_jobs(config.max_background_jobs);
        db_opts.create_if_missing(config.create_if_missing);

        let db = DB::open(&db_opts, path)
            .map_err(|e| StateStoreError::Database(format!("Failed to open RocksDB: {}", e)))?;

        let read_options = Self::read_options(&config);
        let cache_size = config.blob_cache_size;

        Ok(Self {
            db: Arc::new(db),
            config,
            write_options: WriteOptions::default(),
            read_options,
            cache: Arc::new(Mutex::new(LruMap::new(ByLength::new(cache_size)))),
            metrics: DiskDBMetrics::new_with_labels(&[("instance", "default")]),
        })
    }

    fn read_options(config: &StateStoreConfig) -> ReadOptions {
        let mut read_options = ReadOptions::default();
        read_options.fill_cache(config.fill_cache);
        read_options.set_readahead_size(config.readahead_size);
        read_options.set_async_io(config.async_io);
        read_options.set_verify_checksums(config.verify_checksums);
        read_options
    }

    /// Get the underlying RocksDB instance.
    pub fn inner(&self) -> &Arc<DB> {
        &self.db
    }

    /// Get the configuration.
    pub fn config(&self) -> &StateStoreConfig {
        &self.config
    }

    /// Clear the LRU cache.
    pub fn clear_cache(&self) {
        warn!(target: "diskdb::rocksdb", "Clearing LRU cache");
        self.cache.lock().clear();
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> (usize, u32) {
        let cache = self.cache.lock();
        (cache.len(), self.config.blob_cache_size)
    }

    /// Create a new metrics instance for the DiskDB.
    pub fn with_new_metrics(&mut self, instance_name: &str) {
        self.metrics = DiskDBMetrics::new_with_labels(&[("instance", instance_name.to_string())]);
    }
}

impl StateStore for DiskDB {
    fn get(&self, key: &[u8]) -> StateStoreResult<Option<Vec<u8>>> {
        trace!(target: "diskdb::rocksdb", "Getting key: {:?}", key);

        // Check cache first
        {
            let cache = self.cache.lock();
            if let Some(cached_value) = cache.peek(key) {
                self.metrics.cache_hits.increment(1);
                return Ok(cached_value.clone());
            }
            self.metrics.cache_misses.increment(1);
        }

        // Cache miss, read from DB
        match self.db.get_opt(key, &self.read_options) {
            Ok(Some(value)) => {
                self.cache.lock().insert(key.to_vec(), Some(value.clone()));
                Ok(Some(value))
            }
            Ok(None) => {
                self.cache.lock().insert(key.to_vec(), None);
                Ok(None)
            }
            Err(e) => {
                error!(target: "diskdb::rocksdb", "Error getting key {:?}: {}", key, e);
                Err(StateStoreError::Database(format!("RocksDB get error: {}", e)))
            }
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StateStoreResult<()> {
        trace!(target: "diskdb::rocksdb", "Putting key: {:?}, value_len: {}", key, value.len());

        // Update cache first
        self.cache.lock().insert(key.to_vec(), Some(value.to_vec()));

        match self.db.put_opt(key, value, &self.write_options) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(target: "diskdb::rocksdb", "Error putting key {:?}: {}", key, e);
                // Remove from cache on error
                self.cache.lock().remove(key);
                Err(StateStoreError::Database(format!("RocksDB put error: {}", e)))
            }
        }
    }

    fn delete(&self, key: &[u8]) -> StateStoreResult<()> {
        trace!(target: "diskdb::rocksdb", "Deleting key: {:?}", key);

        // Remove from cache first
        self.cache.lock().remove(key);

        match self.db.delete_opt(key, &self.write_options) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(target: "diskdb::rocksdb", "Error deleting key {:?}: {}", key, e);
                Err(StateStoreError::Database(format!("RocksDB delete error: {}", e)))
            }
        }
    }

    fn contains(&self, key: &[u8]) -> StateStoreResult<bool> {
        trace!(target: "diskdb::rocksdb", "Checking existence of key: {:?}", key);

        {
            let cache = self.cache.lock();
            if let Some(cached_value) = cache.peek(key) {
                self.metrics.cache_hits.increment(1);
                return Ok(cached_value.is_some());
            }
            self.metrics.cache_misses.increment(1);
        }

        match self.db.get_opt(key, &self.read_options) {
            Ok(Some(value)) => {
                self.cache.lock().insert(key.to_vec(), Some(value));
                Ok(true)
            }
            Ok(None) => {
                self.cache.lock().insert(key.to_vec(), None);
                Ok(false)
            }
            Err(e) => {
                error!(target: "diskdb::rocksdb", "Error checking existence of key {:?}: {}", key, e);
                Err(StateStoreError::Database(format!("RocksDB exists error: {}", e)))
            }
        }
    }

    fn write_batch(
        &self,
        puts: &[(Vec<u8>, Vec<u8>)],
        deletes: &[Vec<u8>],
    ) -> StateStoreResult<()> {
        trace!(
            target: "diskdb::rocksdb",
            "Writing batch: {} puts, {} deletes",
            puts.len(),
            deletes.len()
        );

        // Update cache first
        {
            let mut cache = self.cache.lock();
            for (key, value) in puts {
                cache.insert(key.clone(), Some(value.clone()));
            }
            for key in deletes {
                cache.insert(key.clone(), None);
            }
        }

        let mut batch = WriteBatch::default();
        for (key, value) in puts {
            batch.put(key, value);
        }
        for key in deletes {
            batch.delete(key);
        }

        match self.db.write_opt(batch, &self.write_options) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    target: "diskdb::rocksdb",
                    "Error writing batch of {} puts, {} deletes: {}",
                    puts.len(),
                    deletes.len(),
                    e
                );
                // Drop the dirtied entries from cache on error
                let mut cache = self.cache.lock();
                for (key, _) in puts {
                    cache.remove(key);
                }
                for key in deletes {
                    cache.remove(key);
                }
                Err(StateStoreError::Database(format!("RocksDB batch error: {}", e)))
            }
        }
    }

    fn flush(&self) -> StateStoreResult<()> {
        trace!(target: "diskdb::rocksdb", "Flushing database");

        self.db
            .flush()
            .map_err(|e| {
                error!(target: "diskdb::rocksdb", "Error flushing database: {}", e);
                StateStoreError::Database(format!("Flush error: {}", e))
            })
    }
}
