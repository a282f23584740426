//! TableStore - the live set of table files and the work that changes it
//!
//! ```text
//! MemoryTable --flush (writer pool)--> FileTable --register--> TableSet
//!                                                               |
//!             compaction (compaction pool) <-- strategy plan ---+
//! ```
//!
//! Reads take a snapshot of the current [`TableSet`] and never block on
//! flushes or compactions. Every change builds a new set and swaps it in
//! under a short lock. Tables replaced by a compaction are marked obsolete
//! and their files disappear once the last snapshot referencing them is
//! dropped.

use crate::cache::CacheStats;
use crate::compaction::{CompactionPlan, CompactionStats, Compactor};
use crate::config::Config;
use crate::memtable::MemoryTable;
use crate::merge::MergeIterator;
use crate::paths::Paths;
use crate::pool::{JobHandle, WorkerPool};
use crate::rate_limit::{RateLimiter, RateLimiterStats};
use crate::table::{FileTable, IndexBlockCache, RecordBlockCache, TableMeta};
use crate::table_set::{TableIds, TableSet};
use crate::writer::TableWriter;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tierdb_core::{Error, Key, Record, Result};
use tracing::{debug, info, warn};

/// Notified after a flushed table is durable and visible to readers.
/// The write-ahead log uses this to retire the matching log segment.
pub trait FlushListener: Send + Sync {
    fn on_flush(&self, table: &TableMeta);
}

/// Result of a compaction run by [`TableStore::compact_once`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub plan: CompactionPlan,
    /// `None` when nothing survived the merge
    pub output: Option<TableMeta>,
}

/// Point-in-time view of the store
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub tables: usize,
    pub table_bytes: u64,
    pub records: u64,
    pub flushes: u64,
    pub compactions_in_flight: usize,
    pub record_cache: CacheStats,
    pub index_cache: CacheStats,
    pub compaction: CompactionStats,
    pub write_limiter: RateLimiterStats,
    pub compaction_limiter: RateLimiterStats,
}

struct Shared {
    config: Config,
    paths: Paths,
    tables: RwLock<Arc<TableSet>>,
    /// Serializes table set swaps
    swap: Mutex<()>,
    /// Inputs of planned or running compactions
    compacting: Mutex<HashSet<u64>>,
    ids: TableIds,
    record_cache: Arc<RecordBlockCache>,
    index_cache: Arc<IndexBlockCache>,
    write_limiter: Arc<RateLimiter>,
    compaction_limiter: Arc<RateLimiter>,
    compactor: Compactor,
    flush_listener: RwLock<Option<Arc<dyn FlushListener>>>,
    flushes: AtomicU64,
    /// Also the cancel flag of running compactions
    shutdown: Arc<AtomicBool>,
    writer_pool: WorkerPool,
    compaction_pool: WorkerPool,
}

/// Remove a compaction output that was never registered
fn discard_output(meta: &TableMeta) {
    if let Err(e) = fs::remove_file(&meta.path) {
        warn!(
            table_id = meta.id,
            path = %meta.path.display(),
            error = %e,
            "failed to remove unregistered compaction output"
        );
    }
}

impl Shared {
    fn snapshot(&self) -> Arc<TableSet> {
        Arc::clone(&self.tables.read())
    }

    fn open_table(&self, id: u64) -> Result<Arc<FileTable>> {
        Ok(Arc::new(FileTable::open(
            id,
            &self.paths,
            Arc::clone(&self.record_cache),
            Arc::clone(&self.index_cache),
        )?))
    }

    /// Build the next table set from the current one and publish it
    fn swap<F>(&self, update: F) -> Vec<Arc<FileTable>>
    where
        F: FnOnce(&TableSet) -> (TableSet, Vec<Arc<FileTable>>),
    {
        let _guard = self.swap.lock();
        let current = self.snapshot();
        let (next, removed) = update(&current);
        *self.tables.write() = Arc::new(next);
        removed
    }

    fn flush_table(self: &Arc<Self>, table: MemoryTable) -> Result<Option<TableMeta>> {
        if table.is_empty() {
            return Ok(None);
        }

        let mut writer = TableWriter::open(
            table.id(),
            &self.paths,
            table.len(),
            self.config.table_block_size(),
            self.config.index_block_size(),
        )?
        .with_rate_limiter(Arc::clone(&self.write_limiter));
        for record in table.iter() {
            writer.write(&record)?;
        }
        let meta = writer.finish()?;

        let file = self.open_table(meta.id)?;
        self.swap(|set| (set.with_table(file), Vec::new()));
        self.flushes.fetch_add(1, Ordering::Relaxed);
        info!(
            table_id = meta.id,
            records = meta.record_count,
            bytes = meta.file_size,
            "flushed memory table"
        );

        let listener = self.flush_listener.read().clone();
        if let Some(listener) = listener {
            listener.on_flush(&meta);
        }

        self.print_metrics();
        if let Err(e) = self.schedule_compactions() {
            debug!(error = %e, "compactions not scheduled after flush");
        }
        Ok(Some(meta))
    }

    /// Ask the strategy for a plan among tables not already compacting
    fn plan_compaction(&self) -> Option<CompactionPlan> {
        let mut compacting = self.compacting.lock();
        let candidates: Vec<TableMeta> = self
            .snapshot()
            .iter()
            .filter(|t| !compacting.contains(&t.id()))
            .map(|t| t.meta())
            .collect();
        let plan = self
            .config
            .compaction_strategy()
            .plan(&candidates, &self.ids)?;
        compacting.extend(plan.inputs.iter().copied());
        Some(plan)
    }

    fn release(&self, inputs: &[u64]) {
        let mut compacting = self.compacting.lock();
        for id in inputs {
            compacting.remove(id);
        }
    }

    fn schedule_compactions(self: &Arc<Self>) -> Result<usize> {
        let mut scheduled = 0;
        while !self.shutdown.load(Ordering::SeqCst) {
            let Some(plan) = self.plan_compaction() else {
                break;
            };
            let inputs = plan.inputs.clone();
            let shared = Arc::clone(self);
            let spawned = self.compaction_pool.spawn(move || {
                let result = shared.run_compaction(&plan);
                // A merge can complete a larger tier
                if result.is_ok() {
                    if let Err(e) = shared.schedule_compactions() {
                        debug!(error = %e, "follow-up compactions not scheduled");
                    }
                }
                result
            });
            if let Err(e) = spawned {
                self.release(&inputs);
                return Err(e);
            }
            debug!(inputs = ?inputs, "scheduled compaction");
            scheduled += 1;
        }
        Ok(scheduled)
    }

    fn run_compaction(&self, plan: &CompactionPlan) -> Result<Option<TableMeta>> {
        let result = self.compact(plan);
        self.release(&plan.inputs);
        result
    }

    fn compact(&self, plan: &CompactionPlan) -> Result<Option<TableMeta>> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let snapshot = self.snapshot();
        let mut inputs = Vec::with_capacity(plan.inputs.len());
        let mut others = Vec::new();
        for table in snapshot.iter() {
            if plan.inputs.contains(&table.id()) {
                inputs.push(Arc::clone(table));
            } else {
                others.push(table.meta());
            }
        }
        if let Some(missing) = plan.inputs.iter().find(|id| !snapshot.contains(**id)) {
            return Err(Error::TableNotFound(*missing));
        }

        let output = self
            .compactor
            .compact(plan, &inputs, &others, &self.shutdown)?;
        let table = match &output {
            Some(meta) => match self.open_table(meta.id) {
                Ok(table) => Some(table),
                Err(e) => {
                    discard_output(meta);
                    return Err(e);
                }
            },
            None => None,
        };

        let removed = self.swap(|set| set.replace(&plan.inputs, table));
        for table in &removed {
            table.mark_obsolete();
        }
        self.print_metrics();
        Ok(output)
    }

    fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot();
        StoreStats {
            tables: snapshot.len(),
            table_bytes: snapshot.total_bytes(),
            records: snapshot.iter().map(|t| t.record_count()).sum(),
            flushes: self.flushes.load(Ordering::Relaxed),
            compactions_in_flight: self.compacting.lock().len(),
            record_cache: self.record_cache.stats(),
            index_cache: self.index_cache.stats(),
            compaction: self.compactor.stats(),
            write_limiter: self.write_limiter.stats(),
            compaction_limiter: self.compaction_limiter.stats(),
        }
    }

    fn print_metrics(&self) {
        if !self.config.print_metrics() {
            return;
        }
        let stats = self.stats();
        info!(
            tables = stats.tables,
            table_bytes = stats.table_bytes,
            records = stats.records,
            record_cache_hit_rate = stats.record_cache.hit_rate(),
            index_cache_hit_rate = stats.index_cache.hit_rate(),
            compactions = stats.compaction.compactions,
            compaction_failures = stats.compaction.failures,
            "table store metrics"
        );
    }
}

/// Owner of the on-disk tables
pub struct TableStore {
    shared: Arc<Shared>,
}

impl TableStore {
    /// Open the store in the configured table directory, loading every
    /// finished table found there
    pub fn open(config: Config) -> Result<Self> {
        let paths = config.paths();
        paths.create_directories()?;
        let removed = paths.remove_temp_files()?;
        if removed > 0 {
            warn!(removed, "removed unfinished table files");
        }

        let record_cache = Arc::new(RecordBlockCache::new("record", config.table_cache_size()));
        let index_cache = Arc::new(IndexBlockCache::new("index", config.index_cache_size()));

        let ids = paths.table_ids()?;
        let mut tables = Vec::with_capacity(ids.len());
        for id in &ids {
            tables.push(Arc::new(FileTable::open(
                *id,
                &paths,
                Arc::clone(&record_cache),
                Arc::clone(&index_cache),
            )?));
        }
        let next_id = ids.last().map_or(1, |id| id + 1);

        let write_limiter = Arc::new(RateLimiter::new("write", config.max_write_rate()));
        let compaction_limiter =
            Arc::new(RateLimiter::new("compaction", config.max_compaction_rate()));
        let compactor = Compactor::new(
            paths.clone(),
            config.table_block_size(),
            config.index_block_size(),
            config.version_retention(),
            Arc::clone(&compaction_limiter),
        );

        let writer_pool = WorkerPool::new("tierdb-flush", config.table_writer_threads())?;
        let compaction_pool = WorkerPool::new("tierdb-compact", config.table_compaction_threads())?;

        info!(
            dir = %paths.table_directory().display(),
            tables = tables.len(),
            next_id,
            strategy = config.compaction_strategy().name(),
            "opened table store"
        );

        let shared = Arc::new(Shared {
            config,
            paths,
            tables: RwLock::new(Arc::new(TableSet::new(tables))),
            swap: Mutex::new(()),
            compacting: Mutex::new(HashSet::new()),
            ids: TableIds::new(next_id),
            record_cache,
            index_cache,
            write_limiter,
            compaction_limiter,
            compactor,
            flush_listener: RwLock::new(None),
            flushes: AtomicU64::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            writer_pool,
            compaction_pool,
        });
        Ok(Self { shared })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn paths(&self) -> &Paths {
        &self.shared.paths
    }

    /// Allocate a table id, unique for the lifetime of the directory
    pub fn next_table_id(&self) -> u64 {
        self.shared.ids.next_id()
    }

    /// An empty memory table carrying a fresh id
    pub fn new_memory_table(&self) -> MemoryTable {
        MemoryTable::new(self.next_table_id())
    }

    pub fn should_flush(&self, table: &MemoryTable) -> bool {
        table.size_bytes() >= self.shared.config.memory_table_size()
    }

    pub fn set_flush_listener(&self, listener: Arc<dyn FlushListener>) {
        *self.shared.flush_listener.write() = Some(listener);
    }

    /// Write `table` to disk on the writer pool. The table becomes visible
    /// to readers when the job finishes; compactions are scheduled after.
    pub fn flush(&self, table: MemoryTable) -> Result<JobHandle<Option<TableMeta>>> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        let shared = Arc::clone(&self.shared);
        self.shared
            .writer_pool
            .spawn(move || shared.flush_table(table))
    }

    /// Flush and wait for the table to be registered
    pub fn flush_and_wait(&self, table: MemoryTable) -> Result<Option<TableMeta>> {
        self.flush(table)?.wait()
    }

    /// Newest record for `key.data()` with version <= `key.version()`
    /// across all tables. Tombstones are returned as records.
    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        let snapshot = self.shared.snapshot();
        let mut best: Option<Record> = None;
        // Newest table first; an older table only wins with a higher version
        for table in snapshot.covering(key.data()) {
            if let Some(found) = table.get(key)? {
                let newer = best
                    .as_ref()
                    .map_or(true, |b| found.key().version() > b.key().version());
                if newer {
                    best = Some(found);
                }
            }
        }
        Ok(best)
    }

    /// Merged view of every table from `start`, isolated from later flushes
    /// and compactions
    pub fn ascending_iter(&self, start: Option<&Key>) -> Result<MergeIterator> {
        MergeIterator::from_tables(&self.shared.snapshot().tables(), start)
    }

    /// Plan and queue compactions until the strategy has nothing left to
    /// propose. Returns how many were queued.
    pub fn schedule_compactions(&self) -> Result<usize> {
        self.shared.schedule_compactions()
    }

    /// Plan and run a single compaction on the calling thread
    pub fn compact_once(&self) -> Result<Option<CompactionOutcome>> {
        let Some(plan) = self.shared.plan_compaction() else {
            return Ok(None);
        };
        let output = self.shared.run_compaction(&plan)?;
        Ok(Some(CompactionOutcome { plan, output }))
    }

    /// Block until every flush and compaction submitted so far, and every
    /// compaction they schedule in turn, has finished.
    ///
    /// Must not be called from a flush or compaction job.
    pub fn wait_for_background_work(&self) {
        let shared = &self.shared;
        // A flush queues its compactions before it finishes, and a
        // compaction queues its follow-ups the same way, so both pools
        // reading idle back to back means the cascade is over
        loop {
            shared.writer_pool.wait_idle();
            shared.compaction_pool.wait_idle();
            if shared.writer_pool.pending() == 0 && shared.compaction_pool.pending() == 0 {
                return;
            }
        }
    }

    pub fn snapshot(&self) -> Arc<TableSet> {
        self.shared.snapshot()
    }

    pub fn table_metas(&self) -> Vec<TableMeta> {
        self.shared.snapshot().metas()
    }

    pub fn table_count(&self) -> usize {
        self.shared.snapshot().len()
    }

    pub fn stats(&self) -> StoreStats {
        self.shared.stats()
    }

    /// Stop both pools. Queued flushes complete; running compactions are
    /// cancelled and leave no output behind.
    pub fn close(&self) -> Result<()> {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.writer_pool.shutdown();
        self.shared.compaction_pool.shutdown();
        self.shared.print_metrics();
        info!(tables = self.table_count(), "closed table store");
        Ok(())
    }
}

impl Drop for TableStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("dir", &self.shared.paths.table_directory())
            .field("tables", &self.table_count())
            .finish()
    }
}
