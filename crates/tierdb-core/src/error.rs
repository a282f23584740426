//! Error types for tierdb.

use std::fmt;

/// The main error type for tierdb operations.
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// A block failed checksum or structural validation
    CorruptBlock {
        /// File offset of the block, when known
        offset: u64,
        /// What failed to validate
        reason: String,
    },

    /// A table file failed trailer or structural validation
    CorruptTable {
        /// Id of the table
        table_id: u64,
        /// What failed to validate
        reason: String,
    },

    /// The file backing a table does not exist
    TableNotFound(u64),

    /// A record was written out of key order
    OutOfOrderWrite {
        /// The last key accepted by the writer
        previous: String,
        /// The rejected key
        current: String,
    },

    /// A write was issued to a writer that already finished
    WriterClosed,

    /// Configuration rejected by the builder
    InvalidConfig(String),

    /// A background job was cancelled before it completed
    Cancelled,

    /// The engine is shutting down and refuses new work
    ShuttingDown,

    /// A worker thread panicked while running a job
    WorkerPanicked,
}

impl Error {
    /// Returns true for checksum or structural mismatches.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::CorruptBlock { .. } | Error::CorruptTable { .. })
    }

    /// Returns true for caller bugs (write ordering, use after finish).
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Error::OutOfOrderWrite { .. } | Error::WriterClosed)
    }

    /// Shorthand for [`Error::CorruptBlock`].
    pub fn corrupt_block(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptBlock {
            offset,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::CorruptBlock { offset, reason } => {
                write!(f, "Corrupt block at offset {}: {}", offset, reason)
            }
            Error::CorruptTable { table_id, reason } => {
                write!(f, "Corrupt table {}: {}", table_id, reason)
            }
            Error::TableNotFound(id) => write!(f, "Table {} not found", id),
            Error::OutOfOrderWrite { previous, current } => write!(
                f,
                "Out of order write: {} does not sort after {}",
                current, previous
            ),
            Error::WriterClosed => write!(f, "Table writer already finished"),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::Cancelled => write!(f, "Operation cancelled"),
            Error::ShuttingDown => write!(f, "Engine is shutting down"),
            Error::WorkerPanicked => write!(f, "Worker thread panicked"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for tierdb operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::corrupt_block(12, "crc").is_corruption());
        assert!(Error::CorruptTable {
            table_id: 3,
            reason: "bad magic".into()
        }
        .is_corruption());
        assert!(Error::WriterClosed.is_contract_violation());
        assert!(!Error::TableNotFound(1).is_corruption());
    }

    #[test]
    fn test_error_display() {
        let err = Error::corrupt_block(4096, "checksum mismatch");
        assert_eq!(
            err.to_string(),
            "Corrupt block at offset 4096: checksum mismatch"
        );
        assert_eq!(Error::TableNotFound(7).to_string(), "Table 7 not found");
    }
}
