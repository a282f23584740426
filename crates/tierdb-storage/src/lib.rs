//! # tierdb Storage Engine
//!
//! The on-disk table layer of tierdb.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of tierdb.**
//!
//! Users should depend on the main `tierdb` crate instead, which provides
//! the stable public API. This crate's API may change without notice
//! between minor versions.
//!
//! ---
//!
//! This crate turns sorted memory tables into immutable table files and
//! keeps the number of files in check:
//!
//! - **Blocks**: checksummed record and index blocks ([`block`])
//! - **Block caches**: byte-bounded LRU caches with pinning ([`cache`])
//! - **Tables**: the [`TableWriter`] and the [`FileTable`] reader
//! - **Compaction**: pluggable strategies and the [`Compactor`]
//! - **TableStore**: the copy-on-write table set, worker pools and
//!   deferred file deletion
//!
//! ## Architecture
//!
//! ```text
//! Writes → MemoryTable (memory) → FileTable (disk)
//!               ↓                      ↓
//!        Flush when full      Merge by size tier
//! ```

#![warn(clippy::all)]

pub mod block;
pub mod cache;
pub mod compaction;
pub mod config;
pub mod memtable;
pub mod merge;
pub mod paths;
pub mod pool;
pub mod rate_limit;
pub mod store;
pub mod table;
pub mod table_set;
pub mod writer;

pub use block::{IndexBlock, IndexEntry, RecordBlock};
pub use cache::{BlockCache, CacheStats, CacheWeight};
pub use compaction::{
    CompactionPlan, CompactionStats, CompactionStrategy, Compactor, FullCompactionStrategy,
    NoCompactionStrategy, SizeTieredCompactionStrategy,
};
pub use config::{Config, ConfigBuilder, VersionRetention};
pub use memtable::{MemoryTable, MemoryTableIterator};
pub use merge::MergeIterator;
pub use paths::Paths;
pub use pool::{JobHandle, WorkerPool};
pub use rate_limit::{RateLimiter, RateLimiterStats};
pub use store::{CompactionOutcome, FlushListener, StoreStats, TableStore};
pub use table::{
    FileTable, FileTableIterator, IndexBlockCache, RecordBlockCache, Table, TableIterator,
    TableMeta, TRAILER_SIZE,
};
pub use table_set::{TableIds, TableSet};
pub use writer::TableWriter;
