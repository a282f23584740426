//! Key, Value and Record - the data unit exchanged by every component
//!
//! Keys are ordered by their bytes ascending and then by version
//! descending, so that the newest version of a key sorts first among
//! its duplicates.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A versioned key.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    data: Vec<u8>,
    version: u64,
}

impl Key {
    /// Create a key from its bytes and version
    pub fn new(data: impl Into<Vec<u8>>, version: u64) -> Self {
        Self {
            data: data.into(),
            version,
        }
    }

    /// A key that matches the newest version of `data`
    pub fn latest(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, u64::MAX)
    }

    /// The key bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The version (larger is newer)
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Size in bytes used for memory accounting
    pub fn size(&self) -> usize {
        self.data.len() + 8
    }

    pub fn into_parts(self) -> (Vec<u8>, u64) {
        (self.data, self.version)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.data.cmp(&other.data) {
            Ordering::Equal => other.version.cmp(&self.version),
            ord => ord,
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", String::from_utf8_lossy(&self.data), self.version)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A stored value - either live bytes or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A live value (may be empty)
    Put(Vec<u8>),
    /// A tombstone marking deletion
    Tombstone,
}

impl Value {
    /// Returns true if this value marks a deletion
    pub fn is_tombstone(&self) -> bool {
        matches!(self, Value::Tombstone)
    }

    /// Bytes of a live value, `None` for tombstones
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Put(v) => Some(v),
            Value::Tombstone => None,
        }
    }

    /// Returns the size of this value in bytes
    pub fn size(&self) -> usize {
        match self {
            Value::Put(v) => v.len() + 1, // +1 for kind tag
            Value::Tombstone => 1,
        }
    }
}

/// A (Key, Value) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: Key,
    value: Value,
}

impl Record {
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Create a live record
    pub fn put(data: impl Into<Vec<u8>>, version: u64, value: impl Into<Vec<u8>>) -> Self {
        Self::new(Key::new(data, version), Value::Put(value.into()))
    }

    /// Create a tombstone record
    pub fn tombstone(data: impl Into<Vec<u8>>, version: u64) -> Self {
        Self::new(Key::new(data, version), Value::Tombstone)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_tombstone()
    }

    /// Approximate in-memory size
    pub fn size(&self) -> usize {
        self.key.size() + self.value.size()
    }

    pub fn into_parts(self) -> (Key, Value) {
        (self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering() {
        let a1 = Key::new(b"a".to_vec(), 1);
        let a5 = Key::new(b"a".to_vec(), 5);
        let b0 = Key::new(b"b".to_vec(), 0);

        // Newer versions of the same bytes sort first
        assert!(a5 < a1);
        assert!(a1 < b0);
        assert!(a5 < b0);

        let mut keys = vec![b0.clone(), a1.clone(), a5.clone()];
        keys.sort();
        assert_eq!(keys, vec![a5, a1, b0]);
    }

    #[test]
    fn test_latest_key_sorts_before_all_versions() {
        let latest = Key::latest(b"k".to_vec());
        assert!(latest <= Key::new(b"k".to_vec(), u64::MAX));
        assert!(latest < Key::new(b"k".to_vec(), 0));
        assert!(Key::new(b"j".to_vec(), 0) < latest);
    }

    #[test]
    fn test_record_tombstone() {
        let record = Record::tombstone(b"gone".to_vec(), 9);
        assert!(record.is_tombstone());
        assert_eq!(record.value().as_bytes(), None);

        let record = Record::put(b"here".to_vec(), 9, Vec::new());
        assert!(!record.is_tombstone());
        assert_eq!(record.value().as_bytes(), Some(&b""[..]));
    }
}
