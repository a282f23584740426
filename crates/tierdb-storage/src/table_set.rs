//! Copy-on-write set of live tables
//!
//! Readers clone an `Arc<TableSet>` and work on that snapshot; flushes and
//! compactions build a new set and swap it in. A reader holding an old
//! snapshot keeps every table in it open, which is what defers deletion
//! of compacted tables until no iterator needs them.

use crate::table::{FileTable, Table, TableMeta};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out unique, increasing table ids
#[derive(Debug)]
pub struct TableIds {
    next: AtomicU64,
}

impl TableIds {
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The id the next call to `next_id` returns
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// An immutable snapshot of the live tables, newest id first
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: Vec<Arc<FileTable>>,
}

impl TableSet {
    pub fn new(mut tables: Vec<Arc<FileTable>>) -> Self {
        tables.sort_by(|a, b| b.id().cmp(&a.id()));
        Self { tables }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FileTable>> {
        self.tables.iter()
    }

    pub fn get(&self, id: u64) -> Option<&Arc<FileTable>> {
        self.tables.iter().find(|t| t.id() == id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }

    /// Tables whose key range includes `data`, newest first
    pub fn covering<'a>(&'a self, data: &'a [u8]) -> impl Iterator<Item = &'a Arc<FileTable>> + 'a {
        self.tables.iter().filter(move |t| t.might_contain(data))
    }

    pub fn metas(&self) -> Vec<TableMeta> {
        self.tables.iter().map(|t| t.meta()).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.file_size()).sum()
    }

    /// Readable handles for merging
    pub fn tables(&self) -> Vec<Table> {
        self.tables.iter().map(|t| Table::File(Arc::clone(t))).collect()
    }

    /// A new set with `table` added
    pub fn with_table(&self, table: Arc<FileTable>) -> Self {
        let mut tables = self.tables.clone();
        tables.push(table);
        Self::new(tables)
    }

    /// A new set with the tables in `retired` removed and `added` inserted.
    /// Returns the removed tables so the caller can mark them obsolete.
    pub fn replace(&self, retired: &[u64], added: Option<Arc<FileTable>>) -> (Self, Vec<Arc<FileTable>>) {
        let (removed, mut kept): (Vec<_>, Vec<_>) = self
            .tables
            .iter()
            .cloned()
            .partition(|t| retired.contains(&t.id()));
        kept.extend(added);
        (Self::new(kept), removed)
    }
}
