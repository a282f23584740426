//! On-disk format identifiers for tierdb table files
//!
//! Every table ends in a trailer carrying [`magic::TABLE`] and the format
//! version it was written with. Readers accept any version in
//! [`FormatVersion::readable`]; writers always emit [`TABLE_FORMAT_VERSION`].

use std::ops::RangeInclusive;

/// Version written into new table trailers
pub const TABLE_FORMAT_VERSION: u16 = 1;

/// Oldest table format this build still reads
pub const OLDEST_READABLE_TABLE_FORMAT: u16 = 1;

pub mod magic {
    /// Table trailer magic: ASCII "TIER"
    pub const TABLE: u32 = 0x5449_4552;
}

/// Range of format versions a reader understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatVersion {
    pub readable: RangeInclusive<u16>,
}

impl FormatVersion {
    pub fn can_read(&self, version: u16) -> bool {
        self.readable.contains(&version)
    }

    pub fn current(&self) -> u16 {
        *self.readable.end()
    }
}

/// Formats accepted by the table reader
pub fn table_version() -> FormatVersion {
    FormatVersion {
        readable: OLDEST_READABLE_TABLE_FORMAT..=TABLE_FORMAT_VERSION,
    }
}
