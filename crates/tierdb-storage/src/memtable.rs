//! MemoryTable - In-memory sorted write buffer
//!
//! Holds recent writes, ordered by key, until the store flushes them to a
//! table file. Every write carries its own version, so several versions of
//! the same bytes can coexist; reads pick the newest one visible at the
//! requested version. A memory table is owned mutably while it fills and
//! shared read-only (`Arc`) once it is handed over for flushing.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tierdb_core::{Key, Record, Value};

/// An in-memory sorted table of versioned records
#[derive(Debug, Clone)]
pub struct MemoryTable {
    id: u64,
    records: BTreeMap<Key, Value>,
    size_bytes: usize,
}

impl MemoryTable {
    /// An empty table. `id` becomes the id of the flushed table file.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            records: BTreeMap::new(),
            size_bytes: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Insert a record, replacing one with the identical key and version
    pub fn insert(&mut self, record: Record) {
        let size = record.size();
        let (key, value) = record.into_parts();
        let key_size = key.size();
        if let Some(old) = self.records.insert(key, value) {
            self.size_bytes -= key_size + old.size();
        }
        self.size_bytes += size;
    }

    pub fn put(&mut self, data: impl Into<Vec<u8>>, version: u64, value: impl Into<Vec<u8>>) {
        self.insert(Record::put(data, version, value));
    }

    pub fn delete(&mut self, data: impl Into<Vec<u8>>, version: u64) {
        self.insert(Record::tombstone(data, version));
    }

    /// Newest record for `key.data()` with version <= `key.version()`
    pub fn get(&self, key: &Key) -> Option<Record> {
        let (found, value) = self.records.range(key..).next()?;
        if found.data() != key.data() {
            return None;
        }
        Some(Record::new(found.clone(), value.clone()))
    }

    /// Approximate payload bytes, used to decide when to flush
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn min_key(&self) -> Option<&Key> {
        self.records.keys().next()
    }

    pub fn max_key(&self) -> Option<&Key> {
        self.records.keys().next_back()
    }

    /// Records in key order
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.records
            .iter()
            .map(|(k, v)| Record::new(k.clone(), v.clone()))
    }

    /// Owning iterator over a shared table, starting at the first key >= `start`
    pub fn ascending_iter(self: &Arc<Self>, start: Option<&Key>) -> MemoryTableIterator {
        let next = match start {
            Some(key) => Bound::Included(key.clone()),
            None => Bound::Unbounded,
        };
        MemoryTableIterator {
            table: Arc::clone(self),
            next,
        }
    }
}

/// Iterator that keeps its [`MemoryTable`] alive
#[derive(Debug)]
pub struct MemoryTableIterator {
    table: Arc<MemoryTable>,
    next: Bound<Key>,
}

impl Iterator for MemoryTableIterator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let (key, value) = self
            .table
            .records
            .range((self.next.clone(), Bound::Unbounded))
            .next()?;
        let record = Record::new(key.clone(), value.clone());
        self.next = Bound::Excluded(key.clone());
        Some(record)
    }
}
