//! K-way merge over sorted table iterators
//!
//! Yields records in key order. When several sources hold a record with
//! the identical key and version, the one from the table with the highest
//! id wins and the others are skipped.

use crate::table::{Table, TableIterator};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tierdb_core::{Key, Record, Result};

/// Entry for the merge heap (with ordering)
#[derive(Debug)]
struct HeapEntry {
    record: Record,
    table_id: u64,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record.key() == other.record.key() && self.table_id == other.table_id
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap, so we reverse key comparison for min-heap behavior
        // For equal keys, the newer table (higher id) comes first
        match other.record.key().cmp(self.record.key()) {
            Ordering::Equal => self.table_id.cmp(&other.table_id),
            ord => ord,
        }
    }
}

/// Merging iterator over any number of [`TableIterator`]s
#[derive(Debug)]
pub struct MergeIterator {
    sources: Vec<(u64, TableIterator)>,
    heap: BinaryHeap<HeapEntry>,
    failed: bool,
}

impl MergeIterator {
    /// Merge `(table id, iterator)` pairs
    pub fn new(sources: Vec<(u64, TableIterator)>) -> Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            failed: false,
        };
        for source in 0..merge.sources.len() {
            merge.pull(source)?;
        }
        Ok(merge)
    }

    /// Merge `tables`, starting at the first key >= `start`
    pub fn from_tables(tables: &[Table], start: Option<&Key>) -> Result<Self> {
        let sources = tables
            .iter()
            .map(|t| Ok((t.id(), t.ascending_iter(start)?)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(sources)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Push the next record of `source` onto the heap
    fn pull(&mut self, source: usize) -> Result<()> {
        let (table_id, iter) = &mut self.sources[source];
        if let Some(record) = iter.next().transpose()? {
            self.heap.push(HeapEntry {
                record,
                table_id: *table_id,
                source,
            });
        }
        Ok(())
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        self.pull(entry.source)?;

        // Same key and version from older tables
        while let Some(dup) = self.heap.peek() {
            if dup.record.key() != entry.record.key() {
                break;
            }
            let source = dup.source;
            self.heap.pop();
            self.pull(source)?;
        }
        Ok(Some(entry.record))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memtable::MemoryTable;
    use std::sync::Arc;

    fn memory(id: u64, records: &[(&str, u64, &str)]) -> Table {
        let mut table = MemoryTable::new(id);
        for (key, version, value) in records {
            table.put(*key, *version, *value);
        }
        Table::Memory(Arc::new(table))
    }

    fn collect(merge: MergeIterator) -> Vec<(String, u64, String)> {
        merge
            .map(|r| {
                let r = r.unwrap();
                (
                    String::from_utf8(r.key().data().to_vec()).unwrap(),
                    r.key().version(),
                    String::from_utf8(r.value().as_bytes().unwrap().to_vec()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_merge_entry_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(HeapEntry {
            record: Record::put("b", 1, ""),
            table_id: 1,
            source: 0,
        });
        heap.push(HeapEntry {
            record: Record::put("a", 1, ""),
            table_id: 1,
            source: 1,
        });
        heap.push(HeapEntry {
            record: Record::put("a", 1, ""),
            table_id: 2,
            source: 2,
        });
        heap.push(HeapEntry {
            record: Record::put("a", 5, ""),
            table_id: 1,
            source: 3,
        });

        // Newest version first, then newer table for identical keys
        assert_eq!(heap.pop().unwrap().source, 3);
        assert_eq!(heap.pop().unwrap().source, 2);
        assert_eq!(heap.pop().unwrap().source, 1);
        assert_eq!(heap.pop().unwrap().source, 0);
    }

    #[test]
    fn test_interleaved_merge() {
        let t1 = memory(1, &[("a", 1, "a1"), ("c", 1, "c1"), ("e", 1, "e1")]);
        let t2 = memory(2, &[("b", 2, "b2"), ("c", 2, "c2"), ("d", 2, "d2")]);

        let merged = collect(MergeIterator::from_tables(&[t1, t2], None).unwrap());
        let keys: Vec<(&str, u64)> = merged.iter().map(|(k, v, _)| (k.as_str(), *v)).collect();
        assert_eq!(
            keys,
            vec![("a", 1), ("b", 2), ("c", 2), ("c", 1), ("d", 2), ("e", 1)]
        );
    }

    #[test]
    fn test_identical_keys_prefer_newer_table() {
        let older = memory(1, &[("k", 3, "from-1"), ("z", 1, "z")]);
        let newer = memory(7, &[("k", 3, "from-7")]);

        let merged = collect(MergeIterator::from_tables(&[older, newer], None).unwrap());
        assert_eq!(
            merged,
            vec![
                ("k".to_string(), 3, "from-7".to_string()),
                ("z".to_string(), 1, "z".to_string())
            ]
        );
    }

    #[test]
    fn test_start_key_and_empty_sources() {
        let t1 = memory(1, &[("a", 1, "x"), ("m", 1, "x")]);
        let t2 = memory(2, &[]);
        let merge = MergeIterator::from_tables(&[t1, t2], Some(&Key::latest("b"))).unwrap();
        assert_eq!(merge.source_count(), 2);
        assert_eq!(collect(merge).len(), 1);
    }
}
