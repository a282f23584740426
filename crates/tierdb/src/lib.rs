//! # tierdb
//!
//! The on-disk table layer of an LSM storage engine. Sorted memory tables
//! are flushed into immutable, checksummed table files; reads go through
//! byte-bounded block caches; background workers merge files by size tier.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tierdb::{Config, Key, TableStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TableStore::open(Config::with_directory("./tables")?)?;
//!
//!     // Fill a memory table and hand it to the flush workers
//!     let mut table = store.new_memory_table();
//!     table.put("user:1:name", 1, "Alice");
//!     table.put("user:1:name", 2, "Alicia");
//!     table.delete("user:2:name", 3);
//!     store.flush_and_wait(table)?;
//!
//!     // Newest version at or below the requested one
//!     let record = store.get(&Key::new("user:1:name", 1))?;
//!     assert_eq!(record.unwrap().value().as_bytes(), Some(&b"Alice"[..]));
//!
//!     store.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust,no_run
//! use tierdb::{Config, SizeTieredCompactionStrategy, VersionRetention};
//!
//! let config = Config::builder()
//!     .directory("./tables")
//!     .table_block_size(16_384)
//!     .table_cache_size(64_000_000)
//!     .compaction_strategy(SizeTieredCompactionStrategy::new(4, 16, 4_000_000))
//!     .version_retention(VersionRetention::All)
//!     .max_compaction_rate(8_000_000)
//!     .build()?;
//! # Ok::<(), tierdb::Error>(())
//! ```

#![warn(clippy::all)]

pub mod logging;

// Core types
pub use tierdb_core::{Error, Key, Record, Result, Value};

// Format constants
pub use tierdb_core::format_version::{magic, TABLE_FORMAT_VERSION};

// Table layer
pub use tierdb_storage::{
    BlockCache, CacheStats, CompactionOutcome, CompactionPlan, CompactionStats,
    CompactionStrategy, Compactor, Config, ConfigBuilder, FileTable, FileTableIterator,
    FlushListener, FullCompactionStrategy, IndexBlockCache, JobHandle, MemoryTable,
    MemoryTableIterator, MergeIterator, NoCompactionStrategy, Paths, RateLimiter,
    RateLimiterStats, RecordBlockCache, SizeTieredCompactionStrategy, StoreStats, Table,
    TableIds, TableIterator, TableMeta, TableSet, TableStore, TableWriter, VersionRetention,
    WorkerPool, TRAILER_SIZE,
};

/// Block codecs, for tools that inspect table files directly
pub mod block {
    pub use tierdb_storage::block::*;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
