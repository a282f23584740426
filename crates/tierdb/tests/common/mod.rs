// Common test utilities for tierdb integration tests

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tierdb::{Config, ConfigBuilder, MemoryTable, Record, TableStore};

/// Temporary table directory plus helpers to open stores on it
pub struct StoreFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub table_dir: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let table_dir = temp_dir.path().join("tables");
        Self {
            temp_dir,
            table_dir,
        }
    }

    /// Small blocks so a few hundred records span many blocks and index levels
    pub fn config(&self) -> ConfigBuilder {
        Config::builder()
            .directory(&self.table_dir)
            .table_block_size(256)
            .index_block_size(128)
            .table_writer_threads(2)
            .table_compaction_threads(2)
            .table_cache_size(1 << 20)
            .index_cache_size(1 << 20)
            .max_write_rate(0)
            .max_compaction_rate(0)
    }

    pub fn open(&self, config: ConfigBuilder) -> TableStore {
        TableStore::open(config.build().expect("Invalid config")).expect("Failed to open store")
    }

    #[allow(dead_code)]
    pub fn table_dir(&self) -> &Path {
        &self.table_dir
    }

    #[allow(dead_code)]
    pub fn list_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.table_dir)
            .expect("Failed to read table directory")
            .filter_map(|entry| {
                entry
                    .ok()
                    .and_then(|e| e.file_name().to_str().map(String::from))
            })
            .collect();
        names.sort();
        names
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn key(i: u32) -> String {
    format!("key{:06}", i)
}

/// Memory table holding `key(i)` at `version` for each `i` in `keys`
#[allow(dead_code)]
pub fn memory_table(
    store: &TableStore,
    keys: impl IntoIterator<Item = u32>,
    version: u64,
) -> MemoryTable {
    let mut table = store.new_memory_table();
    for i in keys {
        table.put(key(i), version, format!("value-{}-{}", i, version));
    }
    table
}

#[allow(dead_code)]
pub fn value_of(record: &Record) -> String {
    match record.value().as_bytes() {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "<tombstone>".to_string(),
    }
}

#[allow(dead_code)]
pub fn scan(store: &TableStore) -> Vec<Record> {
    store
        .ascending_iter(None)
        .expect("Failed to open iterator")
        .collect::<tierdb::Result<Vec<_>>>()
        .expect("Scan failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config_builds() {
        let fixture = StoreFixture::new();
        let config = fixture.config().build().unwrap();
        assert_eq!(config.table_directory(), fixture.table_dir());
    }
}
