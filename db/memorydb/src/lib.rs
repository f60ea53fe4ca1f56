//! In-memory StateStore implementation.
//!
//! Backs the snapshot tree in unit tests and light tooling where a RocksDB
//! instance would be overkill. All operations are atomic under a single
//! reader-writer lock.

mod memorydb;
pub use memorydb::MemoryDB;
