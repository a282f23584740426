//! Compaction - choosing and merging tables
//!
//! A [`CompactionStrategy`] looks at the live tables and proposes which of
//! them to merge. The [`Compactor`] performs the merge: it streams the
//! inputs through a k-way merge, drops versions the configured retention
//! no longer needs, and writes a single new table under a fresh id.

use crate::config::VersionRetention;
use crate::merge::MergeIterator;
use crate::paths::Paths;
use crate::rate_limit::RateLimiter;
use crate::table::{FileTable, Table, TableMeta};
use crate::table_set::TableIds;
use crate::writer::TableWriter;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tierdb_core::{Error, Record, Result};
use tracing::{debug, info, warn};

/// Tables to merge and the id of the table they become
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    pub inputs: Vec<u64>,
    pub output_id: u64,
}

/// Decides which tables to merge next
pub trait CompactionStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Ids of the tables to merge, chosen among `candidates` (tables not
    /// already being compacted), or `None` if nothing is worth merging
    fn select(&self, candidates: &[TableMeta]) -> Option<Vec<u64>>;

    /// Select inputs and allocate the output id
    fn plan(&self, candidates: &[TableMeta], ids: &TableIds) -> Option<CompactionPlan> {
        let inputs = self.select(candidates)?;
        if inputs.len() < 2 {
            return None;
        }
        Some(CompactionPlan {
            inputs,
            output_id: ids.next_id(),
        })
    }
}

/// Size of the smallest tier (2MB)
const DEFAULT_TIER_BASE_SIZE: u64 = 2 * 1024 * 1024;

/// Merges tables of similar size once enough of them pile up.
///
/// Tier `n` holds tables between `base * 2^(n-1)` and `base * 2^n` bytes;
/// everything below `base` is tier 0.
#[derive(Debug, Clone)]
pub struct SizeTieredCompactionStrategy {
    min_tables: usize,
    max_tables: usize,
    base_size: u64,
}

impl Default for SizeTieredCompactionStrategy {
    fn default() -> Self {
        Self {
            min_tables: 4,
            max_tables: 32,
            base_size: DEFAULT_TIER_BASE_SIZE,
        }
    }
}

impl SizeTieredCompactionStrategy {
    pub fn new(min_tables: usize, max_tables: usize, base_size: u64) -> Self {
        let min_tables = min_tables.max(2);
        Self {
            min_tables,
            max_tables: max_tables.max(min_tables),
            base_size: base_size.max(1),
        }
    }

    fn tier(&self, file_size: u64) -> u32 {
        64 - (file_size / self.base_size).leading_zeros()
    }
}

impl CompactionStrategy for SizeTieredCompactionStrategy {
    fn name(&self) -> &'static str {
        "size-tiered"
    }

    fn select(&self, candidates: &[TableMeta]) -> Option<Vec<u64>> {
        let mut tiers: BTreeMap<u32, Vec<&TableMeta>> = BTreeMap::new();
        for meta in candidates {
            tiers.entry(self.tier(meta.file_size)).or_default().push(meta);
        }

        for (tier, mut tables) in tiers {
            if tables.len() < self.min_tables {
                continue;
            }
            // Oldest first
            tables.sort_by_key(|t| t.id);
            let inputs: Vec<u64> = tables.iter().take(self.max_tables).map(|t| t.id).collect();
            debug!(tier, tables = inputs.len(), "size tier ready for compaction");
            return Some(inputs);
        }
        None
    }
}

/// Merges every candidate into one table once there are `min_tables`
#[derive(Debug, Clone)]
pub struct FullCompactionStrategy {
    min_tables: usize,
}

impl Default for FullCompactionStrategy {
    fn default() -> Self {
        Self { min_tables: 2 }
    }
}

impl FullCompactionStrategy {
    pub fn new(min_tables: usize) -> Self {
        Self {
            min_tables: min_tables.max(2),
        }
    }
}

impl CompactionStrategy for FullCompactionStrategy {
    fn name(&self) -> &'static str {
        "full"
    }

    fn select(&self, candidates: &[TableMeta]) -> Option<Vec<u64>> {
        if candidates.len() < self.min_tables {
            return None;
        }
        let mut ids: Vec<u64> = candidates.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        Some(ids)
    }
}

/// Never compacts
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompactionStrategy;

impl CompactionStrategy for NoCompactionStrategy {
    fn name(&self) -> &'static str {
        "none"
    }

    fn select(&self, _candidates: &[TableMeta]) -> Option<Vec<u64>> {
        None
    }
}

/// Statistics for compaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Number of compactions completed
    pub compactions: u64,
    /// Compactions that failed and left the table set unchanged
    pub failures: u64,
    /// Compactions abandoned at shutdown
    pub cancelled: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub records_read: u64,
    pub records_written: u64,
    /// Shadowed versions and tombstones removed
    pub records_dropped: u64,
}

/// Merges input tables into one output table
pub struct Compactor {
    paths: Paths,
    block_size: usize,
    index_block_size: usize,
    retention: VersionRetention,
    limiter: Arc<RateLimiter>,
    compactions: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    records_read: AtomicU64,
    records_written: AtomicU64,
    records_dropped: AtomicU64,
}

/// A tombstone may be dropped only if no table outside the merge could
/// still hold an older version of its key
fn tombstone_needed(tombstone: &Record, others: &[TableMeta]) -> bool {
    let key = tombstone.key();
    others
        .iter()
        .any(|t| t.covers(key.data()) && t.min_version < key.version())
}

impl Compactor {
    pub fn new(
        paths: Paths,
        block_size: usize,
        index_block_size: usize,
        retention: VersionRetention,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            paths,
            block_size,
            index_block_size,
            retention,
            limiter,
            compactions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            records_read: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
        }
    }

    pub fn retention(&self) -> VersionRetention {
        self.retention
    }

    /// Merge `inputs` into table `plan.output_id`.
    ///
    /// `others` are the live tables outside the merge; they decide whether a
    /// tombstone is still needed. Returns `None` when nothing survives the
    /// merge. On error or cancellation the partial output is removed.
    pub fn compact(
        &self,
        plan: &CompactionPlan,
        inputs: &[Arc<FileTable>],
        others: &[TableMeta],
        cancel: &Arc<AtomicBool>,
    ) -> Result<Option<TableMeta>> {
        let result = self.merge(plan, inputs, others, cancel);
        match &result {
            Ok(_) => {
                self.compactions.fetch_add(1, Ordering::Relaxed);
            }
            Err(Error::Cancelled) => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(output = plan.output_id, "compaction cancelled");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(inputs = ?plan.inputs, output = plan.output_id, error = %e, "compaction failed");
            }
        }
        result
    }

    fn merge(
        &self,
        plan: &CompactionPlan,
        inputs: &[Arc<FileTable>],
        others: &[TableMeta],
        cancel: &Arc<AtomicBool>,
    ) -> Result<Option<TableMeta>> {
        let estimated: u64 = inputs.iter().map(|t| t.record_count()).sum();
        let tables: Vec<Table> = inputs.iter().map(|t| Table::File(Arc::clone(t))).collect();
        let merge = MergeIterator::from_tables(&tables, None)?;

        let mut writer = TableWriter::open(
            plan.output_id,
            &self.paths,
            estimated as usize,
            self.block_size,
            self.index_block_size,
        )?
        .with_rate_limiter(Arc::clone(&self.limiter))
        .with_cancel_flag(Arc::clone(cancel));

        let mut read = 0u64;
        let mut dropped = 0u64;
        let mut last_data: Option<Vec<u8>> = None;

        for record in merge {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let record = record?;
            read += 1;

            if self.retention == VersionRetention::Latest {
                if last_data.as_deref() == Some(record.key().data()) {
                    dropped += 1;
                    continue;
                }
                last_data = Some(record.key().data().to_vec());

                if record.is_tombstone() && !tombstone_needed(&record, others) {
                    dropped += 1;
                    continue;
                }
            }

            writer.write(&record)?;
        }

        let bytes_read: u64 = inputs.iter().map(|t| t.file_size()).sum();
        self.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
        self.records_read.fetch_add(read, Ordering::Relaxed);
        self.records_dropped.fetch_add(dropped, Ordering::Relaxed);

        if writer.record_count() == 0 {
            writer.abort();
            info!(inputs = ?plan.inputs, dropped, "compaction removed every record");
            return Ok(None);
        }

        let meta = writer.finish()?;
        self.bytes_written.fetch_add(meta.file_size, Ordering::Relaxed);
        self.records_written.fetch_add(meta.record_count, Ordering::Relaxed);
        info!(
            inputs = ?plan.inputs,
            output = plan.output_id,
            records_read = read,
            records_written = meta.record_count,
            dropped,
            bytes = meta.file_size,
            "compaction finished"
        );
        Ok(Some(meta))
    }

    pub fn stats(&self) -> CompactionStats {
        CompactionStats {
            compactions: self.compactions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Compactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compactor")
            .field("retention", &self.retention)
            .field("block_size", &self.block_size)
            .field("stats", &self.stats())
            .finish()
    }
}
