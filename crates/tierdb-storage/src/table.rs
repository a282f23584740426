//! Tables - immutable sorted runs of records
//!
//! ## File Format
//!
//! ```text
//! +------------------+
//! | Record Blocks    |  <- framed record blocks, key order
//! +------------------+
//! | Index Blocks     |  <- leaf level first, root last
//! +------------------+
//! | Trailer          |  <- fixed size, points at the root index block
//! +------------------+
//! ```
//!
//! A [`FileTable`] keeps only its trailer in memory. Blocks are read with
//! positional reads and shared through the record and index block caches.
//! Obsolete tables delete their file when the last reference goes away.

use crate::block::{IndexBlock, IndexEntry, RecordBlock};
use crate::cache::BlockCache;
use crate::memtable::{MemoryTable, MemoryTableIterator};
use crate::paths::Paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tierdb_core::format_version::{magic, table_version, TABLE_FORMAT_VERSION};
use tierdb_core::{Error, Key, Record, Result};
use tracing::{debug, warn};

/// Encoded trailer size in bytes
pub const TRAILER_SIZE: usize = 60;

/// Bytes of the trailer covered by its checksum
const TRAILER_CHECKED: usize = TRAILER_SIZE - 4;

/// Deepest index tree a reader will follow
const MAX_INDEX_DEPTH: usize = 32;

pub type RecordBlockCache = BlockCache<RecordBlock>;
pub type IndexBlockCache = BlockCache<IndexBlock>;

/// Fixed-size table trailer, bincode encoded (fixed-width little endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Trailer {
    pub magic: u32,
    pub format_version: u16,
    pub reserved: u16,
    pub root_offset: u64,
    pub root_length: u64,
    pub record_count: u64,
    /// Bytes of blocks before the trailer
    pub data_length: u64,
    pub min_version: u64,
    pub max_version: u64,
    pub crc: u32,
}

impl Trailer {
    pub(crate) fn new(
        root: &IndexEntry,
        record_count: u64,
        data_length: u64,
        min_version: u64,
        max_version: u64,
    ) -> Self {
        Self {
            magic: magic::TABLE,
            format_version: TABLE_FORMAT_VERSION,
            reserved: 0,
            root_offset: root.offset,
            root_length: root.length as u64,
            record_count,
            data_length,
            min_version,
            max_version,
            crc: 0,
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes =
            bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))?;
        if bytes.len() != TRAILER_SIZE {
            return Err(Error::Serialization(format!(
                "trailer encoded to {} bytes",
                bytes.len()
            )));
        }
        let crc = crc32fast::hash(&bytes[..TRAILER_CHECKED]);
        bytes[TRAILER_CHECKED..].copy_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() != TRAILER_SIZE {
            return Err(format!("trailer is {} bytes", bytes.len()));
        }
        let trailer: Trailer = bincode::deserialize(bytes).map_err(|e| e.to_string())?;
        if trailer.magic != magic::TABLE {
            return Err(format!("bad magic {:#x}", trailer.magic));
        }
        let crc = crc32fast::hash(&bytes[..TRAILER_CHECKED]);
        if crc != trailer.crc {
            return Err(format!(
                "trailer checksum mismatch: expected {:#x}, got {:#x}",
                trailer.crc, crc
            ));
        }
        if !table_version().can_read(trailer.format_version) {
            return Err(format!(
                "unsupported format version {}",
                trailer.format_version
            ));
        }
        Ok(trailer)
    }
}

/// Summary of a finished table file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub id: u64,
    pub path: PathBuf,
    pub file_size: u64,
    pub record_count: u64,
    /// Smallest key, `None` for an empty table
    pub min_key: Option<Key>,
    /// Largest key, `None` for an empty table
    pub max_key: Option<Key>,
    pub min_version: u64,
    pub max_version: u64,
}

impl TableMeta {
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Whether `data` falls inside this table's key range
    pub fn covers(&self, data: &[u8]) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => min.data() <= data && data <= max.data(),
            _ => false,
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// A table file opened for reading
pub struct FileTable {
    id: u64,
    path: PathBuf,
    file: File,
    file_size: u64,
    trailer: Trailer,
    min_key: Option<Key>,
    max_key: Option<Key>,
    record_cache: Arc<RecordBlockCache>,
    index_cache: Arc<IndexBlockCache>,
    obsolete: AtomicBool,
}

impl FileTable {
    /// Open table `id`, verify its trailer and load the root index block
    pub fn open(
        id: u64,
        paths: &Paths,
        record_cache: Arc<RecordBlockCache>,
        index_cache: Arc<IndexBlockCache>,
    ) -> Result<Self> {
        let path = paths.table_path(id);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::TableNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        let file_size = file.metadata()?.len();
        let corrupt = |reason: String| Error::CorruptTable {
            table_id: id,
            reason,
        };
        if file_size < TRAILER_SIZE as u64 {
            return Err(corrupt(format!("file of {} bytes has no trailer", file_size)));
        }

        let mut buf = [0u8; TRAILER_SIZE];
        read_exact_at(&file, &mut buf, file_size - TRAILER_SIZE as u64)?;
        let trailer = Trailer::decode(&buf).map_err(corrupt)?;

        if trailer.data_length != file_size - TRAILER_SIZE as u64 {
            return Err(corrupt(format!(
                "trailer claims {} data bytes, file holds {}",
                trailer.data_length,
                file_size - TRAILER_SIZE as u64
            )));
        }
        let root_end = trailer.root_offset.checked_add(trailer.root_length);
        if trailer.root_length > u32::MAX as u64 || root_end.map_or(true, |end| end > trailer.data_length) {
            return Err(corrupt("root index block out of bounds".into()));
        }

        let mut table = Self {
            id,
            path,
            file,
            file_size,
            trailer,
            min_key: None,
            max_key: None,
            record_cache,
            index_cache,
            obsolete: AtomicBool::new(false),
        };

        let root = table.root()?;
        if root.is_empty() != (trailer.record_count == 0) {
            return Err(table.corrupt("record count disagrees with the index"));
        }
        if !root.is_empty() {
            let min_key = Cursor::seek(&table, None)?.next_record()?.map(|r| r.key().clone());
            let max_key = table.last_key(root)?;
            table.min_key = min_key;
            table.max_key = Some(max_key);
        }

        debug!(table_id = id, records = trailer.record_count, bytes = file_size, "opened table");
        Ok(table)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn record_count(&self) -> u64 {
        self.trailer.record_count
    }

    pub fn min_key(&self) -> Option<&Key> {
        self.min_key.as_ref()
    }

    pub fn max_key(&self) -> Option<&Key> {
        self.max_key.as_ref()
    }

    pub fn meta(&self) -> TableMeta {
        TableMeta {
            id: self.id,
            path: self.path.clone(),
            file_size: self.file_size,
            record_count: self.trailer.record_count,
            min_key: self.min_key.clone(),
            max_key: self.max_key.clone(),
            min_version: self.trailer.min_version,
            max_version: self.trailer.max_version,
        }
    }

    /// Quick range check on key bytes
    pub fn might_contain(&self, data: &[u8]) -> bool {
        match (&self.min_key, &self.max_key) {
            (Some(min), Some(max)) => min.data() <= data && data <= max.data(),
            _ => false,
        }
    }

    /// Newest record for `key.data()` with version <= `key.version()`
    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        if !self.might_contain(key.data()) {
            return Ok(None);
        }
        let mut cursor = Cursor::seek(self, Some(key))?;
        match cursor.next_record()? {
            Some(record) if record.key().data() == key.data() => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    /// Records with key >= `start` (all records when `None`), in key order.
    /// The iterator keeps the table alive.
    pub fn ascending_iter(self: &Arc<Self>, start: Option<&Key>) -> Result<FileTableIterator> {
        Ok(FileTableIterator {
            cursor: Cursor::seek(Arc::clone(self), start)?,
        })
    }

    /// Delete the file once the last reference is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::CorruptTable {
            table_id: self.id,
            reason: reason.into(),
        }
    }

    fn in_table(&self, err: Error) -> Error {
        match err {
            Error::CorruptBlock { offset, reason } => {
                self.corrupt(format!("block at offset {}: {}", offset, reason))
            }
            other => other,
        }
    }

    fn read_block(&self, offset: u64, length: u32) -> Result<Vec<u8>> {
        let in_bounds = offset
            .checked_add(length as u64)
            .map_or(false, |end| end <= self.trailer.data_length);
        if !in_bounds {
            return Err(self.corrupt(format!(
                "block [{}, +{}) outside data region",
                offset, length
            )));
        }
        let mut buf = vec![0u8; length as usize];
        read_exact_at(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    fn record_block(&self, entry: &IndexEntry) -> Result<Arc<RecordBlock>> {
        self.record_cache
            .get_or_load(self.id, entry.offset, || {
                let bytes = self.read_block(entry.offset, entry.length)?;
                RecordBlock::decode(&bytes, entry.offset)
            })
            .map_err(|e| self.in_table(e))
    }

    fn index_block(&self, offset: u64, length: u32) -> Result<Arc<IndexBlock>> {
        self.index_cache
            .get_or_load(self.id, offset, || {
                let bytes = self.read_block(offset, length)?;
                IndexBlock::decode(&bytes, offset)
            })
            .map_err(|e| self.in_table(e))
    }

    fn root(&self) -> Result<Arc<IndexBlock>> {
        self.index_block(self.trailer.root_offset, self.trailer.root_length as u32)
    }

    /// Follow the rightmost path down to the last record
    fn last_key(&self, root: Arc<IndexBlock>) -> Result<Key> {
        let mut block = root;
        for _ in 0..MAX_INDEX_DEPTH {
            if block.is_empty() {
                return Err(self.corrupt("empty index block"));
            }
            let entry = block.entry(block.len() - 1);
            if block.is_leaf() {
                return self
                    .record_block(&entry)?
                    .last_key()
                    .ok_or_else(|| self.corrupt("empty record block"));
            }
            block = self.index_block(entry.offset, entry.length)?;
        }
        Err(self.corrupt("index deeper than supported"))
    }
}

impl Drop for FileTable {
    fn drop(&mut self) {
        self.record_cache.invalidate_table(self.id);
        self.index_cache.invalidate_table(self.id);

        if self.obsolete.load(Ordering::SeqCst) {
            match fs::remove_file(&self.path) {
                Ok(()) => debug!(table_id = self.id, "deleted obsolete table"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(table_id = self.id, error = %e, "failed to delete obsolete table"),
            }
        }
    }
}

impl fmt::Debug for FileTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTable")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("records", &self.trailer.record_count)
            .field("min_key", &self.min_key)
            .field("max_key", &self.max_key)
            .finish()
    }
}

/// Position inside a table: the index path from the root down to a leaf
/// entry, plus the record block that entry points at.
struct Cursor<T: Deref<Target = FileTable>> {
    table: T,
    path: Vec<(Arc<IndexBlock>, usize)>,
    block: Option<Arc<RecordBlock>>,
    position: usize,
    exhausted: bool,
}

impl<T: Deref<Target = FileTable>> Cursor<T> {
    fn seek(table: T, start: Option<&Key>) -> Result<Self> {
        let root = table.root()?;
        let mut cursor = Self {
            table,
            path: Vec::new(),
            block: None,
            position: 0,
            exhausted: false,
        };
        if root.is_empty() {
            cursor.exhausted = true;
            return Ok(cursor);
        }
        let index = start.and_then(|k| root.find(k)).unwrap_or(0);
        cursor.path.push((root, index));
        cursor.descend(start)?;
        Ok(cursor)
    }

    /// Walk from the current path entry down to a record block
    fn descend(&mut self, target: Option<&Key>) -> Result<()> {
        loop {
            if self.path.len() > MAX_INDEX_DEPTH {
                return Err(self.table.corrupt("index deeper than supported"));
            }
            let (block, index) = match self.path.last() {
                Some(top) => top,
                None => return Ok(()),
            };
            let entry = block.entry(*index);

            if block.is_leaf() {
                let records = self.table.record_block(&entry)?;
                self.position = target.map(|k| records.seek(k)).unwrap_or(0);
                self.block = Some(records);
                return Ok(());
            }

            let child = self.table.index_block(entry.offset, entry.length)?;
            if child.is_empty() {
                return Err(self.table.corrupt("empty index block"));
            }
            let index = target.and_then(|k| child.find(k)).unwrap_or(0);
            self.path.push((child, index));
        }
    }

    /// Move to the first record of the next record block
    fn advance(&mut self) -> Result<bool> {
        self.block = None;
        while let Some((block, index)) = self.path.last_mut() {
            if *index + 1 < block.len() {
                *index += 1;
                self.descend(None)?;
                return Ok(true);
            }
            self.path.pop();
        }
        Ok(false)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if self.exhausted {
                return Ok(None);
            }
            if let Some(block) = &self.block {
                if self.position < block.len() {
                    let record = block.record(self.position);
                    self.position += 1;
                    return Ok(Some(record));
                }
            }
            if !self.advance()? {
                self.exhausted = true;
            }
        }
    }
}

/// Ascending iterator over a [`FileTable`]. Blocks it is reading stay
/// pinned in the cache.
pub struct FileTableIterator {
    cursor: Cursor<Arc<FileTable>>,
}

impl FileTableIterator {
    pub fn table_id(&self) -> u64 {
        self.cursor.table.id
    }
}

impl Iterator for FileTableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        match self.cursor.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.cursor.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

impl fmt::Debug for FileTableIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileTableIterator")
            .field("table_id", &self.cursor.table.id)
            .field("exhausted", &self.cursor.exhausted)
            .finish()
    }
}

/// Any readable sorted run: a table file or a memory table
#[derive(Debug, Clone)]
pub enum Table {
    File(Arc<FileTable>),
    Memory(Arc<MemoryTable>),
}

impl Table {
    pub fn id(&self) -> u64 {
        match self {
            Table::File(t) => t.id(),
            Table::Memory(t) => t.id(),
        }
    }

    pub fn get(&self, key: &Key) -> Result<Option<Record>> {
        match self {
            Table::File(t) => t.get(key),
            Table::Memory(t) => Ok(t.get(key)),
        }
    }

    pub fn ascending_iter(&self, start: Option<&Key>) -> Result<TableIterator> {
        Ok(match self {
            Table::File(t) => TableIterator::File(t.ascending_iter(start)?),
            Table::Memory(t) => TableIterator::Memory(t.ascending_iter(start)),
        })
    }

    pub fn min_key(&self) -> Option<&Key> {
        match self {
            Table::File(t) => t.min_key(),
            Table::Memory(t) => t.min_key(),
        }
    }

    pub fn max_key(&self) -> Option<&Key> {
        match self {
            Table::File(t) => t.max_key(),
            Table::Memory(t) => t.max_key(),
        }
    }

    pub fn record_count(&self) -> u64 {
        match self {
            Table::File(t) => t.record_count(),
            Table::Memory(t) => t.len() as u64,
        }
    }
}

/// Iterator over either kind of [`Table`]
#[derive(Debug)]
pub enum TableIterator {
    File(FileTableIterator),
    Memory(MemoryTableIterator),
}

impl Iterator for TableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Result<Record>> {
        match self {
            TableIterator::File(it) => it.next(),
            TableIterator::Memory(it) => it.next().map(Ok),
        }
    }
}
