//! Storage configuration
//!
//! `Config` is immutable once built. Every tunable has a default, so the
//! only required setting is the directory tables live in.

use crate::compaction::{CompactionStrategy, SizeTieredCompactionStrategy};
use crate::paths::Paths;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tierdb_core::{Error, Result};

/// Default memory table size before a flush (~8MB)
pub const DEFAULT_MEMORY_TABLE_SIZE: usize = 8_192_000;
/// Default target size of a record block (16KB)
pub const DEFAULT_TABLE_BLOCK_SIZE: usize = 16_384;
/// Default target size of an index block (64KB)
pub const DEFAULT_INDEX_BLOCK_SIZE: usize = 65_536;
pub const DEFAULT_TABLE_WRITER_THREADS: usize = 4;
pub const DEFAULT_TABLE_COMPACTION_THREADS: usize = 8;
/// Default record block cache budget (~128MB)
pub const DEFAULT_TABLE_CACHE_SIZE: usize = 128_000_000;
/// Default index block cache budget (~32MB)
pub const DEFAULT_INDEX_CACHE_SIZE: usize = 32_000_000;
/// Default compaction write rate in bytes/sec (~32MB/s)
pub const DEFAULT_MAX_COMPACTION_RATE: u64 = 32_768_000;
/// Default flush write rate in bytes/sec (~32MB/s)
pub const DEFAULT_MAX_WRITE_RATE: u64 = 32_768_000;

/// Smallest accepted block size. Anything below cannot hold a header and a record.
const MIN_BLOCK_SIZE: usize = 64;

/// Which versions of a key survive compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionRetention {
    /// Keep only the newest version of each key; drop shadowed versions
    /// and tombstones that no longer hide anything
    #[default]
    Latest,
    /// Keep every version and every tombstone (snapshot reads)
    All,
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct Config {
    compaction_strategy: Arc<dyn CompactionStrategy>,
    version_retention: VersionRetention,
    memory_table_size: usize,
    table_block_size: usize,
    index_block_size: usize,
    table_writer_threads: usize,
    table_compaction_threads: usize,
    table_cache_size: usize,
    index_cache_size: usize,
    max_compaction_rate: u64,
    max_write_rate: u64,
    print_metrics: bool,
    table_directory: PathBuf,
    log_directory: PathBuf,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults with both tables and logs under `dir`
    pub fn with_directory(dir: impl AsRef<Path>) -> Result<Self> {
        Self::builder().directory(dir).build()
    }

    pub fn compaction_strategy(&self) -> &Arc<dyn CompactionStrategy> {
        &self.compaction_strategy
    }

    pub fn version_retention(&self) -> VersionRetention {
        self.version_retention
    }

    pub fn memory_table_size(&self) -> usize {
        self.memory_table_size
    }

    pub fn table_block_size(&self) -> usize {
        self.table_block_size
    }

    pub fn index_block_size(&self) -> usize {
        self.index_block_size
    }

    pub fn table_writer_threads(&self) -> usize {
        self.table_writer_threads
    }

    pub fn table_compaction_threads(&self) -> usize {
        self.table_compaction_threads
    }

    pub fn table_cache_size(&self) -> usize {
        self.table_cache_size
    }

    pub fn index_cache_size(&self) -> usize {
        self.index_cache_size
    }

    pub fn max_compaction_rate(&self) -> u64 {
        self.max_compaction_rate
    }

    pub fn max_write_rate(&self) -> u64 {
        self.max_write_rate
    }

    pub fn print_metrics(&self) -> bool {
        self.print_metrics
    }

    pub fn table_directory(&self) -> &Path {
        &self.table_directory
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.table_directory, &self.log_directory)
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    compaction_strategy: Option<Arc<dyn CompactionStrategy>>,
    version_retention: VersionRetention,
    memory_table_size: usize,
    table_block_size: usize,
    index_block_size: usize,
    table_writer_threads: usize,
    table_compaction_threads: usize,
    table_cache_size: usize,
    index_cache_size: usize,
    max_compaction_rate: u64,
    max_write_rate: u64,
    print_metrics: bool,
    table_directory: Option<PathBuf>,
    log_directory: Option<PathBuf>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            compaction_strategy: None,
            version_retention: VersionRetention::default(),
            memory_table_size: DEFAULT_MEMORY_TABLE_SIZE,
            table_block_size: DEFAULT_TABLE_BLOCK_SIZE,
            index_block_size: DEFAULT_INDEX_BLOCK_SIZE,
            table_writer_threads: DEFAULT_TABLE_WRITER_THREADS,
            table_compaction_threads: DEFAULT_TABLE_COMPACTION_THREADS,
            table_cache_size: DEFAULT_TABLE_CACHE_SIZE,
            index_cache_size: DEFAULT_INDEX_CACHE_SIZE,
            max_compaction_rate: DEFAULT_MAX_COMPACTION_RATE,
            max_write_rate: DEFAULT_MAX_WRITE_RATE,
            print_metrics: false,
            table_directory: None,
            log_directory: None,
        }
    }

    pub fn compaction_strategy(mut self, strategy: impl CompactionStrategy + 'static) -> Self {
        self.compaction_strategy = Some(Arc::new(strategy));
        self
    }

    pub fn version_retention(mut self, retention: VersionRetention) -> Self {
        self.version_retention = retention;
        self
    }

    pub fn memory_table_size(mut self, bytes: usize) -> Self {
        self.memory_table_size = bytes;
        self
    }

    pub fn table_block_size(mut self, bytes: usize) -> Self {
        self.table_block_size = bytes;
        self
    }

    pub fn index_block_size(mut self, bytes: usize) -> Self {
        self.index_block_size = bytes;
        self
    }

    pub fn table_writer_threads(mut self, threads: usize) -> Self {
        self.table_writer_threads = threads;
        self
    }

    pub fn table_compaction_threads(mut self, threads: usize) -> Self {
        self.table_compaction_threads = threads;
        self
    }

    pub fn table_cache_size(mut self, bytes: usize) -> Self {
        self.table_cache_size = bytes;
        self
    }

    pub fn index_cache_size(mut self, bytes: usize) -> Self {
        self.index_cache_size = bytes;
        self
    }

    /// Compaction output budget in bytes/sec, 0 for unlimited
    pub fn max_compaction_rate(mut self, bytes_per_sec: u64) -> Self {
        self.max_compaction_rate = bytes_per_sec;
        self
    }

    /// Flush output budget in bytes/sec, 0 for unlimited
    pub fn max_write_rate(mut self, bytes_per_sec: u64) -> Self {
        self.max_write_rate = bytes_per_sec;
        self
    }

    pub fn print_metrics(mut self, enabled: bool) -> Self {
        self.print_metrics = enabled;
        self
    }

    /// Sets both the table and the log directory
    pub fn directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.table_directory = Some(dir.as_ref().to_path_buf());
        self.log_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn table_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.table_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn log_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn build(self) -> Result<Config> {
        let table_directory = self
            .table_directory
            .ok_or_else(|| Error::InvalidConfig("table directory is required".into()))?;
        let log_directory = self.log_directory.unwrap_or_else(|| table_directory.clone());

        if self.table_block_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "table block size {} is below the minimum of {}",
                self.table_block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.index_block_size < MIN_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "index block size {} is below the minimum of {}",
                self.index_block_size, MIN_BLOCK_SIZE
            )));
        }
        if self.table_writer_threads == 0 || self.table_compaction_threads == 0 {
            return Err(Error::InvalidConfig(
                "worker pools need at least one thread".into(),
            ));
        }
        if self.memory_table_size == 0 {
            return Err(Error::InvalidConfig("memory table size must be positive".into()));
        }

        Ok(Config {
            compaction_strategy: self
                .compaction_strategy
                .unwrap_or_else(|| Arc::new(SizeTieredCompactionStrategy::default())),
            version_retention: self.version_retention,
            memory_table_size: self.memory_table_size,
            table_block_size: self.table_block_size,
            index_block_size: self.index_block_size,
            table_writer_threads: self.table_writer_threads,
            table_compaction_threads: self.table_compaction_threads,
            table_cache_size: self.table_cache_size,
            index_cache_size: self.index_cache_size,
            max_compaction_rate: self.max_compaction_rate,
            max_write_rate: self.max_write_rate,
            print_metrics: self.print_metrics,
            table_directory,
            log_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::NoCompactionStrategy;

    #[test]
    fn test_defaults() {
        let config = Config::with_directory("/tmp/tierdb").unwrap();
        assert_eq!(config.memory_table_size(), 8_192_000);
        assert_eq!(config.table_block_size(), 16_384);
        assert_eq!(config.index_block_size(), 65_536);
        assert_eq!(config.table_writer_threads(), 4);
        assert_eq!(config.table_compaction_threads(), 8);
        assert_eq!(config.table_cache_size(), 128_000_000);
        assert_eq!(config.index_cache_size(), 32_000_000);
        assert_eq!(config.max_compaction_rate(), 32_768_000);
        assert_eq!(config.max_write_rate(), 32_768_000);
        assert!(!config.print_metrics());
        assert_eq!(config.version_retention(), VersionRetention::Latest);
        assert_eq!(config.compaction_strategy().name(), "size-tiered");
        assert_eq!(config.table_directory(), config.log_directory());
    }

    #[test]
    fn test_separate_directories() {
        let config = Config::builder()
            .table_directory("/data/tables")
            .log_directory("/data/logs")
            .build()
            .unwrap();
        let paths = config.paths();
        assert_eq!(paths.table_path(1), PathBuf::from("/data/tables/1.table"));
        assert_eq!(paths.log_path(1), PathBuf::from("/data/logs/1.log"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::builder()
            .directory("/tmp/x")
            .table_block_size(4096)
            .max_write_rate(0)
            .print_metrics(true)
            .version_retention(VersionRetention::All)
            .compaction_strategy(NoCompactionStrategy)
            .build()
            .unwrap();
        assert_eq!(config.table_block_size(), 4096);
        assert_eq!(config.max_write_rate(), 0);
        assert!(config.print_metrics());
        assert_eq!(config.version_retention(), VersionRetention::All);
        assert_eq!(config.compaction_strategy().name(), "none");
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Config::builder().build(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Config::builder().directory("/x").table_block_size(8).build().is_err());
        assert!(Config::builder().directory("/x").index_block_size(0).build().is_err());
        assert!(Config::builder().directory("/x").table_writer_threads(0).build().is_err());
        assert!(Config::builder().directory("/x").table_compaction_threads(0).build().is_err());
    }
}
