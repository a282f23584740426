//! Block codec - record blocks and index blocks
//!
//! Every block on disk is framed the same way:
//!
//! ```text
//! +-------------------+------------------+---------------------------+
//! | payload_len: u32  | crc32: u32       | payload (payload_len)     |
//! +-------------------+------------------+---------------------------+
//! ```
//!
//! The CRC covers the payload only. Record block payload:
//!
//! ```text
//! [count: u32][entry offsets: u32 x count][entries]
//! entry = [key_len: u32][key][version: u64][kind: u8][value_len: u32][value]
//! ```
//!
//! Index block payload:
//!
//! ```text
//! [kind: u8 (0 leaf, 1 branch)][count: u32][entry offsets: u32 x count][entries]
//! entry = [key_len: u32][key][version: u64][block_offset: u64][block_len: u32]
//! ```
//!
//! All integers are little-endian. Entry offsets are relative to the start
//! of the payload and let a decoded block binary-search its entries without
//! materialising them.

use crate::cache::CacheWeight;
use std::cmp::Ordering;
use tierdb_core::{Error, Key, Record, Result, Value};

/// Size of the `[payload_len][crc32]` frame header
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Value kind tags
const KIND_PUT: u8 = 0;
const KIND_TOMBSTONE: u8 = 1;

/// Index block kind tags
const INDEX_LEAF: u8 = 0;
const INDEX_BRANCH: u8 = 1;

/// Fixed bytes of a record entry besides key and value
const RECORD_ENTRY_OVERHEAD: usize = 4 + 8 + 1 + 4;
/// Fixed bytes of an index entry besides the key
const INDEX_ENTRY_OVERHEAD: usize = 4 + 8 + 8 + 4;

fn u32_at(buf: &[u8], pos: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(bytes)
}

fn u64_at(buf: &[u8], pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(bytes)
}

/// A length as its on-disk `u32` field. Blocks larger than 4 GiB cannot
/// be framed, so anything wider is rejected instead of truncated.
pub(crate) fn encoded_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::Serialization(format!("{} of {} bytes exceeds u32 length", what, len)))
}

/// Bounds-checked variant used while validating untrusted bytes
fn checked_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let end = pos.checked_add(4)?;
    (end <= buf.len()).then(|| u32_at(buf, pos))
}

/// Compare an entry's (bytes, version) against a key using key order
fn compare_entry(data: &[u8], version: u64, target: &Key) -> Ordering {
    match data.cmp(target.data()) {
        Ordering::Equal => target.version().cmp(&version),
        ord => ord,
    }
}

/// Wrap a payload with its length prefix and checksum
fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    let payload_len = encoded_len(payload.len(), "block payload")?;
    let mut block = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
    block.extend_from_slice(&payload_len.to_le_bytes());
    block.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    block.extend_from_slice(payload);
    Ok(block)
}

/// Validate a framed block and return its payload
fn unframe(block: &[u8], offset: u64) -> Result<&[u8]> {
    if block.len() < BLOCK_HEADER_SIZE {
        return Err(Error::corrupt_block(offset, "block shorter than header"));
    }

    let payload_len = u32_at(block, 0) as usize;
    let payload = &block[BLOCK_HEADER_SIZE..];
    if payload_len != payload.len() {
        return Err(Error::corrupt_block(
            offset,
            format!(
                "length prefix {} does not match payload size {}",
                payload_len,
                payload.len()
            ),
        ));
    }

    let stored_crc = u32_at(block, 4);
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(Error::corrupt_block(offset, "block CRC mismatch"));
    }

    Ok(payload)
}

/// Accumulates length-delimited entries plus their offset directory
#[derive(Debug, Default)]
struct EntryBuffer {
    entries: Vec<u8>,
    offsets: Vec<u32>,
}

impl EntryBuffer {
    fn begin_entry(&mut self) -> Result<&mut Vec<u8>> {
        let offset = encoded_len(self.entries.len(), "block entries")?;
        self.offsets.push(offset);
        Ok(&mut self.entries)
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn encoded_size(&self, header_len: usize) -> usize {
        BLOCK_HEADER_SIZE + header_len + 4 + self.offsets.len() * 4 + self.entries.len()
    }

    fn finish(&self, header: &[u8]) -> Result<Vec<u8>> {
        let directory_end = header.len() + 4 + self.offsets.len() * 4;
        let count = encoded_len(self.offsets.len(), "entry count")?;
        let base = encoded_len(directory_end, "entry directory")?;
        let mut payload = Vec::with_capacity(directory_end + self.entries.len());
        payload.extend_from_slice(header);
        payload.extend_from_slice(&count.to_le_bytes());
        for offset in &self.offsets {
            let offset = offset.checked_add(base).ok_or_else(|| {
                Error::Serialization(format!("entry offset {} exceeds u32 length", offset))
            })?;
            payload.extend_from_slice(&offset.to_le_bytes());
        }
        payload.extend_from_slice(&self.entries);
        frame(&payload)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.offsets.clear();
    }
}

/// A decoded payload whose entry directory has been validated
#[derive(Debug, Clone)]
struct Entries {
    payload: Vec<u8>,
    offsets: Vec<u32>,
}

impl Entries {
    /// Parse the directory that starts at `header_len` and check every
    /// entry with `entry_len`, which returns the entry's length when its
    /// internal length fields fit inside the given slice.
    fn parse(
        payload: &[u8],
        header_len: usize,
        block_offset: u64,
        entry_len: fn(&[u8]) -> Option<usize>,
    ) -> Result<Self> {
        let count = checked_u32(payload, header_len)
            .ok_or_else(|| Error::corrupt_block(block_offset, "missing entry count"))?
            as usize;

        let directory_end = count
            .checked_mul(4)
            .and_then(|n| n.checked_add(header_len + 4))
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| {
                Error::corrupt_block(block_offset, "entry directory exceeds block size")
            })?;

        let mut offsets = Vec::with_capacity(count);
        let mut expected = directory_end;
        for i in 0..count {
            let offset = u32_at(payload, header_len + 4 + i * 4) as usize;
            if offset != expected {
                return Err(Error::corrupt_block(
                    block_offset,
                    format!("entry {} starts at {} instead of {}", i, offset, expected),
                ));
            }
            let len = entry_len(&payload[offset..]).ok_or_else(|| {
                Error::corrupt_block(block_offset, format!("entry {} is truncated", i))
            })?;
            offsets.push(offset as u32);
            expected = offset + len;
        }

        if expected != payload.len() {
            return Err(Error::corrupt_block(
                block_offset,
                "trailing bytes after last entry",
            ));
        }

        Ok(Self {
            payload: payload.to_vec(),
            offsets,
        })
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn entry(&self, index: usize) -> &[u8] {
        let start = self.offsets[index] as usize;
        let end = self
            .offsets
            .get(index + 1)
            .map(|o| *o as usize)
            .unwrap_or(self.payload.len());
        &self.payload[start..end]
    }

    /// Key bytes and version of an entry (both layouts start with them)
    fn key_parts(&self, index: usize) -> (&[u8], u64) {
        let entry = self.entry(index);
        let key_len = u32_at(entry, 0) as usize;
        (&entry[4..4 + key_len], u64_at(entry, 4 + key_len))
    }

    fn key(&self, index: usize) -> Key {
        let (data, version) = self.key_parts(index);
        Key::new(data.to_vec(), version)
    }

    /// Index of the first entry whose key is >= `target`
    fn seek(&self, target: &Key) -> usize {
        let (mut low, mut high) = (0, self.len());
        while low < high {
            let mid = low + (high - low) / 2;
            let (data, version) = self.key_parts(mid);
            if compare_entry(data, version, target) == Ordering::Less {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low
    }

    fn weight(&self) -> usize {
        self.payload.len() + self.offsets.len() * 4 + std::mem::size_of::<Self>()
    }
}

fn record_entry_len(entry: &[u8]) -> Option<usize> {
    let key_len = checked_u32(entry, 0)? as usize;
    let kind_pos = 4usize.checked_add(key_len)?.checked_add(8)?;
    let kind = *entry.get(kind_pos)?;
    if kind != KIND_PUT && kind != KIND_TOMBSTONE {
        return None;
    }
    let value_len = checked_u32(entry, kind_pos + 1)? as usize;
    if kind == KIND_TOMBSTONE && value_len != 0 {
        return None;
    }
    let end = (kind_pos + 5).checked_add(value_len)?;
    (end <= entry.len()).then_some(end)
}

fn index_entry_len(entry: &[u8]) -> Option<usize> {
    let key_len = checked_u32(entry, 0)? as usize;
    let end = key_len.checked_add(INDEX_ENTRY_OVERHEAD)?;
    (end <= entry.len()).then_some(end)
}

/// Builds one serialized record block from records supplied in key order
#[derive(Debug, Default)]
pub struct RecordBlockBuilder {
    buffer: EntryBuffer,
    first_key: Option<Key>,
}

impl RecordBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Records must already be in key order.
    ///
    /// Fails without changing the block when the record would push the
    /// block past what a `u32` length can describe.
    pub fn add(&mut self, record: &Record) -> Result<()> {
        let key = record.key();
        let key_len = encoded_len(key.data().len(), "key")?;
        let value_len = record.value().as_bytes().map(|v| v.len()).unwrap_or(0);
        let value_len = encoded_len(value_len, "value")?;
        encoded_len(self.size_with(record), "record block")?;

        let out = self.buffer.begin_entry()?;
        out.extend_from_slice(&key_len.to_le_bytes());
        out.extend_from_slice(key.data());
        out.extend_from_slice(&key.version().to_le_bytes());
        match record.value() {
            Value::Put(value) => {
                out.push(KIND_PUT);
                out.extend_from_slice(&value_len.to_le_bytes());
                out.extend_from_slice(value);
            }
            Value::Tombstone => {
                out.push(KIND_TOMBSTONE);
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        if self.first_key.is_none() {
            self.first_key = Some(key.clone());
        }
        Ok(())
    }

    /// Serialized size the block would have if finished now
    pub fn estimated_size(&self) -> usize {
        self.buffer.encoded_size(0)
    }

    /// Serialized size after appending a record of this shape
    pub fn size_with(&self, record: &Record) -> usize {
        let value_len = record.value().as_bytes().map(|v| v.len()).unwrap_or(0);
        self.estimated_size() + 4 + RECORD_ENTRY_OVERHEAD + record.key().data().len() + value_len
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn first_key(&self) -> Option<&Key> {
        self.first_key.as_ref()
    }

    /// Serialize the block and reset the builder for reuse
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let block = self.buffer.finish(&[]);
        self.buffer.clear();
        self.first_key = None;
        block
    }
}

/// A decoded, checksum-verified page of records
#[derive(Debug, Clone)]
pub struct RecordBlock {
    entries: Entries,
}

impl RecordBlock {
    /// Serialize records that are already in key order
    pub fn encode(records: &[Record]) -> Result<Vec<u8>> {
        let mut builder = RecordBlockBuilder::new();
        for record in records {
            builder.add(record)?;
        }
        builder.finish()
    }

    /// Decode a framed block. `offset` is only used in error reports.
    pub fn decode(block: &[u8], offset: u64) -> Result<Self> {
        let payload = unframe(block, offset)?;
        let entries = Entries::parse(payload, 0, offset, record_entry_len)?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    pub fn key(&self, index: usize) -> Key {
        self.entries.key(index)
    }

    pub fn record(&self, index: usize) -> Record {
        let entry = self.entries.entry(index);
        let key_len = u32_at(entry, 0) as usize;
        let kind_pos = 4 + key_len + 8;
        let value = if entry[kind_pos] == KIND_TOMBSTONE {
            Value::Tombstone
        } else {
            Value::Put(entry[kind_pos + 5..].to_vec())
        };
        Record::new(self.entries.key(index), value)
    }

    /// Index of the first record whose key is >= `target`.
    ///
    /// Because versions sort descending, for equal bytes this is the
    /// newest record with a version <= `target.version()`.
    pub fn seek(&self, target: &Key) -> usize {
        self.entries.seek(target)
    }

    /// Latest record for `target`'s bytes with version <= `target.version()`
    pub fn get(&self, target: &Key) -> Option<Record> {
        let index = self.seek(target);
        if index < self.len() && self.entries.key_parts(index).0 == target.data() {
            Some(self.record(index))
        } else {
            None
        }
    }

    pub fn first_key(&self) -> Option<Key> {
        (!self.is_empty()).then(|| self.key(0))
    }

    pub fn last_key(&self) -> Option<Key> {
        (!self.is_empty()).then(|| self.key(self.len() - 1))
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.len()).map(move |i| self.record(i))
    }
}

impl CacheWeight for RecordBlock {
    fn weight(&self) -> usize {
        self.entries.weight()
    }
}

/// Index entry pointing to a child block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// First key in the child block
    pub key: Key,
    /// Offset of the child block in the file
    pub offset: u64,
    /// Framed size of the child block in bytes
    pub length: u32,
}

/// Builds one serialized index block
#[derive(Debug, Default)]
pub struct IndexBlockBuilder {
    buffer: EntryBuffer,
    first_key: Option<Key>,
}

impl IndexBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: &IndexEntry) -> Result<()> {
        let key_len = encoded_len(entry.key.data().len(), "key")?;
        let size = self.estimated_size() + 4 + INDEX_ENTRY_OVERHEAD + entry.key.data().len();
        encoded_len(size, "index block")?;

        let out = self.buffer.begin_entry()?;
        out.extend_from_slice(&key_len.to_le_bytes());
        out.extend_from_slice(entry.key.data());
        out.extend_from_slice(&entry.key.version().to_le_bytes());
        out.extend_from_slice(&entry.offset.to_le_bytes());
        out.extend_from_slice(&entry.length.to_le_bytes());
        if self.first_key.is_none() {
            self.first_key = Some(entry.key.clone());
        }
        Ok(())
    }

    pub fn estimated_size(&self) -> usize {
        self.buffer.encoded_size(1)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn first_key(&self) -> Option<&Key> {
        self.first_key.as_ref()
    }

    /// Serialize the block and reset the builder for reuse
    pub fn finish(&mut self, leaf: bool) -> Result<Vec<u8>> {
        let kind = if leaf { INDEX_LEAF } else { INDEX_BRANCH };
        let block = self.buffer.finish(&[kind]);
        self.buffer.clear();
        self.first_key = None;
        block
    }
}

/// A decoded, checksum-verified index block
#[derive(Debug, Clone)]
pub struct IndexBlock {
    leaf: bool,
    entries: Entries,
}

impl IndexBlock {
    pub fn encode(entries: &[IndexEntry], leaf: bool) -> Result<Vec<u8>> {
        let mut builder = IndexBlockBuilder::new();
        for entry in entries {
            builder.add(entry)?;
        }
        builder.finish(leaf)
    }

    pub fn decode(block: &[u8], offset: u64) -> Result<Self> {
        let payload = unframe(block, offset)?;
        let leaf = match payload.first() {
            Some(&INDEX_LEAF) => true,
            Some(&INDEX_BRANCH) => false,
            _ => return Err(Error::corrupt_block(offset, "unknown index block kind")),
        };
        let entries = Entries::parse(payload, 1, offset, index_entry_len)?;
        Ok(Self { leaf, entries })
    }

    /// Leaf blocks point at record blocks, branch blocks at index blocks
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }

    pub fn entry(&self, index: usize) -> IndexEntry {
        let raw = self.entries.entry(index);
        let key_len = u32_at(raw, 0) as usize;
        IndexEntry {
            key: self.entries.key(index),
            offset: u64_at(raw, 4 + key_len + 8),
            length: u32_at(raw, 4 + key_len + 16),
        }
    }

    /// Child that could hold the first key >= `target`: the last entry
    /// whose first key is <= `target`, or the first entry when `target`
    /// sorts before everything.
    pub fn find(&self, target: &Key) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let index = self.entries.seek(target);
        if index < self.len() {
            let (data, version) = self.entries.key_parts(index);
            if compare_entry(data, version, target) == Ordering::Equal {
                return Some(index);
            }
        }
        Some(index.saturating_sub(1))
    }
}

impl CacheWeight for IndexBlock {
    fn weight(&self) -> usize {
        self.entries.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> Vec<Record> {
        vec![
            Record::put(b"apple".to_vec(), 3, b"red".to_vec()),
            Record::put(b"banana".to_vec(), 10, b"yellow".to_vec()),
            Record::tombstone(b"banana".to_vec(), 7),
            Record::put(b"banana".to_vec(), 5, b"green".to_vec()),
            Record::put(b"cherry".to_vec(), 1, Vec::new()),
        ]
    }

    #[test]
    fn test_record_block_round_trip() {
        let records = sample_records();
        let encoded = RecordBlock::encode(&records).unwrap();
        let block = RecordBlock::decode(&encoded, 0).unwrap();

        assert_eq!(block.len(), records.len());
        let decoded: Vec<Record> = block.iter().collect();
        assert_eq!(decoded, records);
        assert_eq!(block.first_key(), Some(Key::new(b"apple".to_vec(), 3)));
        assert_eq!(block.last_key(), Some(Key::new(b"cherry".to_vec(), 1)));
    }

    #[test]
    fn test_record_block_version_resolution() {
        let encoded = RecordBlock::encode(&sample_records()).unwrap();
        let block = RecordBlock::decode(&encoded, 0).unwrap();

        let found = block.get(&Key::new(b"banana".to_vec(), 6)).unwrap();
        assert_eq!(found.key().version(), 5);

        let found = block.get(&Key::new(b"banana".to_vec(), 7)).unwrap();
        assert!(found.is_tombstone());

        let found = block.get(&Key::latest(b"banana".to_vec())).unwrap();
        assert_eq!(found.value().as_bytes(), Some(&b"yellow"[..]));

        // No version old enough
        assert!(block.get(&Key::new(b"banana".to_vec(), 4)).is_none());
        assert!(block.get(&Key::new(b"apple".to_vec(), 2)).is_none());
        // Absent keys
        assert!(block.get(&Key::latest(b"avocado".to_vec())).is_none());
        assert!(block.get(&Key::latest(b"zucchini".to_vec())).is_none());
    }

    #[test]
    fn test_record_block_seek() {
        let encoded = RecordBlock::encode(&sample_records()).unwrap();
        let block = RecordBlock::decode(&encoded, 0).unwrap();

        assert_eq!(block.seek(&Key::latest(b"a".to_vec())), 0);
        assert_eq!(block.seek(&Key::latest(b"b".to_vec())), 1);
        assert_eq!(block.seek(&Key::new(b"banana".to_vec(), 6)), 3);
        assert_eq!(block.seek(&Key::latest(b"z".to_vec())), block.len());
    }

    #[test]
    fn test_builder_size_estimate_matches_output() {
        let mut builder = RecordBlockBuilder::new();
        let records = sample_records();
        for record in &records {
            let predicted = builder.size_with(record);
            builder.add(record).unwrap();
            assert_eq!(builder.estimated_size(), predicted);
        }
        let expected = builder.estimated_size();
        assert_eq!(builder.finish().unwrap().len(), expected);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_every_flipped_byte_is_detected() {
        let encoded = RecordBlock::encode(&sample_records()).unwrap();
        for position in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[position] ^= 0x5a;
            let result = RecordBlock::decode(&corrupted, 64);
            assert!(
                matches!(result, Err(ref e) if e.is_corruption()),
                "flip at byte {} went undetected",
                position
            );
        }
    }

    #[test]
    fn test_truncated_block_is_corrupt() {
        let encoded = RecordBlock::encode(&sample_records()).unwrap();
        assert!(RecordBlock::decode(&encoded[..encoded.len() - 1], 0)
            .unwrap_err()
            .is_corruption());
        assert!(RecordBlock::decode(&encoded[..4], 0)
            .unwrap_err()
            .is_corruption());
    }

    #[test]
    fn test_consistent_length_with_bad_directory_is_corrupt() {
        // A well-framed payload whose directory points past the end
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes());
        let block = frame(&payload).unwrap();
        assert!(RecordBlock::decode(&block, 0).unwrap_err().is_corruption());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_lengths_past_u32_are_rejected() {
        assert_eq!(encoded_len(u32::MAX as usize, "key").unwrap(), u32::MAX);
        let err = encoded_len(u32::MAX as usize + 1, "key").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_entry_offset_overflow_fails_instead_of_wrapping() {
        let buffer = EntryBuffer {
            entries: Vec::new(),
            offsets: vec![u32::MAX - 2],
        };
        // Directory ends at byte 8, so the shifted offset no longer fits
        assert!(matches!(buffer.finish(&[]), Err(Error::Serialization(_))));

        let buffer = EntryBuffer {
            entries: vec![0; 4],
            offsets: vec![0],
        };
        assert!(buffer.finish(&[]).is_ok());
    }

    #[test]
    fn test_index_block_find() {
        let entries = vec![
            IndexEntry {
                key: Key::new(b"b".to_vec(), 4),
                offset: 0,
                length: 100,
            },
            IndexEntry {
                key: Key::new(b"f".to_vec(), 9),
                offset: 100,
                length: 120,
            },
            IndexEntry {
                key: Key::new(b"m".to_vec(), 2),
                offset: 220,
                length: 80,
            },
        ];
        let encoded = IndexBlock::encode(&entries, true).unwrap();
        let block = IndexBlock::decode(&encoded, 0).unwrap();

        assert!(block.is_leaf());
        assert_eq!(block.len(), 3);
        assert_eq!(block.entry(1), entries[1]);

        assert_eq!(block.find(&Key::latest(b"a".to_vec())), Some(0));
        assert_eq!(block.find(&Key::latest(b"c".to_vec())), Some(0));
        assert_eq!(block.find(&Key::new(b"f".to_vec(), 9)), Some(1));
        // f@20 sorts before f@9, so it belongs to the previous block
        assert_eq!(block.find(&Key::new(b"f".to_vec(), 20)), Some(0));
        assert_eq!(block.find(&Key::latest(b"z".to_vec())), Some(2));
    }

    #[test]
    fn test_index_block_corruption() {
        let entries = vec![IndexEntry {
            key: Key::new(b"k".to_vec(), 1),
            offset: 8,
            length: 16,
        }];
        let encoded = IndexBlock::encode(&entries, false).unwrap();
        let decoded = IndexBlock::decode(&encoded, 0).unwrap();
        assert!(!decoded.is_leaf());

        for position in 0..encoded.len() {
            let mut corrupted = encoded.clone();
            corrupted[position] = corrupted[position].wrapping_add(1);
            assert!(IndexBlock::decode(&corrupted, 0).unwrap_err().is_corruption());
        }
    }
}
