//! TableWriter - streams sorted records into a new table file
//!
//! Records are packed into record blocks of roughly `block_size` bytes.
//! Each finished block adds one entry (its first key, offset and length)
//! to an in-memory index. `finish()` writes the index bottom-up, one level
//! of index blocks at a time, until a single root remains, then appends
//! the trailer. The file is written under a temporary name and renamed
//! into place only after it has been fsynced.

use crate::block::{encoded_len, IndexBlockBuilder, IndexEntry, RecordBlockBuilder};
use crate::paths::Paths;
use crate::rate_limit::RateLimiter;
use crate::table::{TableMeta, Trailer, TRAILER_SIZE};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tierdb_core::{Error, Key, Record, Result};
use tracing::debug;

/// Rough guess used to pre-size the in-memory index
const ESTIMATED_RECORDS_PER_BLOCK: usize = 64;

/// Upper bound on the pre-sized index capacity
const MAX_INDEX_RESERVATION: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Open,
    Finished,
    Failed,
}

/// Writes one table file. Records must arrive in strictly ascending key order.
pub struct TableWriter {
    table_id: u64,
    paths: Paths,
    temp_path: PathBuf,
    file: Option<BufWriter<File>>,
    position: u64,
    block_size: usize,
    index_block_size: usize,
    block: RecordBlockBuilder,
    index: Vec<IndexEntry>,
    first_key: Option<Key>,
    last_key: Option<Key>,
    record_count: u64,
    min_version: u64,
    max_version: u64,
    limiter: Option<Arc<RateLimiter>>,
    /// Abandons throttled writes once raised
    cancel: Option<Arc<AtomicBool>>,
    state: WriterState,
}

impl TableWriter {
    /// Start writing table `table_id`. `estimated_records` sizes the index buffer.
    pub fn open(
        table_id: u64,
        paths: &Paths,
        estimated_records: usize,
        block_size: usize,
        index_block_size: usize,
    ) -> Result<Self> {
        let temp_path = paths.temp_path(table_id);
        let file = File::create(&temp_path)?;
        let reserved = (estimated_records / ESTIMATED_RECORDS_PER_BLOCK + 1).min(MAX_INDEX_RESERVATION);

        Ok(Self {
            table_id,
            paths: paths.clone(),
            temp_path,
            file: Some(BufWriter::new(file)),
            position: 0,
            block_size,
            index_block_size,
            block: RecordBlockBuilder::new(),
            index: Vec::with_capacity(reserved),
            first_key: None,
            last_key: None,
            record_count: 0,
            min_version: u64::MAX,
            max_version: 0,
            limiter: None,
            cancel: None,
            state: WriterState::Open,
        })
    }

    /// Throttle every block write through `limiter`
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Fail writes that are waiting on the rate limiter with
    /// [`Error::Cancelled`] once `cancel` is set
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn table_id(&self) -> u64 {
        self.table_id
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Bytes written so far, excluding the pending block
    pub fn bytes_written(&self) -> u64 {
        self.position
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Open => Ok(()),
            _ => Err(Error::WriterClosed),
        }
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = WriterState::Failed;
        }
        result
    }

    /// Append a record. Its key must sort after the previous record's key.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        self.ensure_open()?;

        if let Some(last) = &self.last_key {
            if record.key() <= last {
                let err = Error::OutOfOrderWrite {
                    previous: last.to_string(),
                    current: record.key().to_string(),
                };
                return self.fail(Err(err));
            }
        }

        let added = self.block.add(record);
        self.fail(added)?;
        if self.first_key.is_none() {
            self.first_key = Some(record.key().clone());
        }
        self.last_key = Some(record.key().clone());
        self.record_count += 1;
        self.min_version = self.min_version.min(record.key().version());
        self.max_version = self.max_version.max(record.key().version());

        if self.block.estimated_size() >= self.block_size {
            let flushed = self.flush_block();
            return self.fail(flushed);
        }
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        if let Some(limiter) = &self.limiter {
            match &self.cancel {
                Some(cancel) => {
                    limiter.acquire_or_cancel(bytes.len() as u64, cancel)?;
                }
                None => {
                    limiter.acquire(bytes.len() as u64);
                }
            }
        }
        let file = self.file.as_mut().ok_or(Error::WriterClosed)?;
        file.write_all(bytes)?;
        let offset = self.position;
        self.position += bytes.len() as u64;
        Ok(offset)
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(key) = self.block.first_key().cloned() else {
            return Ok(());
        };
        let bytes = self.block.finish()?;
        let length = encoded_len(bytes.len(), "block")?;
        let offset = self.write_bytes(&bytes)?;
        self.index.push(IndexEntry {
            key,
            offset,
            length,
        });
        Ok(())
    }

    fn write_index_block(&mut self, builder: &mut IndexBlockBuilder, leaf: bool) -> Result<IndexEntry> {
        let key = builder
            .first_key()
            .cloned()
            .unwrap_or_else(|| Key::new(Vec::new(), 0));
        let bytes = builder.finish(leaf)?;
        let length = encoded_len(bytes.len(), "block")?;
        let offset = self.write_bytes(&bytes)?;
        Ok(IndexEntry {
            key,
            offset,
            length,
        })
    }

    /// Write index levels bottom-up and return the root entry
    fn write_index(&mut self) -> Result<IndexEntry> {
        let mut entries = std::mem::take(&mut self.index);
        let mut leaf = true;
        loop {
            let mut parents = Vec::new();
            let mut builder = IndexBlockBuilder::new();
            for entry in &entries {
                builder.add(entry)?;
                // At least two entries per block so every level shrinks
                if builder.len() >= 2 && builder.estimated_size() >= self.index_block_size {
                    parents.push(self.write_index_block(&mut builder, leaf)?);
                }
            }
            if !builder.is_empty() || parents.is_empty() {
                parents.push(self.write_index_block(&mut builder, leaf)?);
            }

            if parents.len() == 1 {
                return Ok(parents.remove(0));
            }
            entries = parents;
            leaf = false;
        }
    }

    fn finish_file(&mut self) -> Result<TableMeta> {
        self.flush_block()?;
        let root = self.write_index()?;

        let data_length = self.position;
        let (min_version, max_version) = if self.record_count == 0 {
            (0, 0)
        } else {
            (self.min_version, self.max_version)
        };
        let trailer = Trailer::new(&root, self.record_count, data_length, min_version, max_version);
        self.write_bytes(&trailer.encode()?)?;

        let mut writer = self.file.take().ok_or(Error::WriterClosed)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        let path = self.paths.table_path(self.table_id);
        fs::rename(&self.temp_path, &path)?;
        self.paths.sync_table_directory()?;

        let file_size = data_length + TRAILER_SIZE as u64;
        debug!(
            table_id = self.table_id,
            records = self.record_count,
            bytes = file_size,
            "finished table"
        );

        Ok(TableMeta {
            id: self.table_id,
            path,
            file_size,
            record_count: self.record_count,
            min_key: self.first_key.clone(),
            max_key: self.last_key.clone(),
            min_version,
            max_version,
        })
    }

    /// Flush remaining data, write index and trailer, fsync and publish the file
    pub fn finish(&mut self) -> Result<TableMeta> {
        self.ensure_open()?;
        let result = self.finish_file();
        if result.is_ok() {
            self.state = WriterState::Finished;
        }
        self.fail(result)
    }

    /// Discard everything written so far
    pub fn abort(mut self) {
        self.state = WriterState::Failed;
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if self.state == WriterState::Finished {
            return;
        }
        self.file.take();
        if fs::remove_file(&self.temp_path).is_ok() {
            debug!(table_id = self.table_id, "discarded unfinished table");
        }
    }
}

impl std::fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableWriter")
            .field("table_id", &self.table_id)
            .field("records", &self.record_count)
            .field("position", &self.position)
            .field("state", &self.state)
            .finish()
    }
}
