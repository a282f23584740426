//! Paths - directory layout for table and log files
//!
//! ```text
//! <table_dir>/<id>.table       finished, immutable table
//! <table_dir>/<id>.table.tmp   table being written (never read)
//! <log_dir>/<id>.log           write-ahead log segment (owned by the WAL)
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use tierdb_core::Result;
use tracing::debug;

const TABLE_EXTENSION: &str = "table";
const TEMP_SUFFIX: &str = ".table.tmp";
const LOG_EXTENSION: &str = "log";

/// Resolves file locations for table ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    table_dir: PathBuf,
    log_dir: PathBuf,
}

impl Paths {
    pub fn new(table_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            table_dir: table_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    pub fn table_directory(&self) -> &Path {
        &self.table_dir
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_dir
    }

    pub fn table_path(&self, id: u64) -> PathBuf {
        self.table_dir.join(format!("{}.{}", id, TABLE_EXTENSION))
    }

    pub fn temp_path(&self, id: u64) -> PathBuf {
        self.table_dir.join(format!("{}{}", id, TEMP_SUFFIX))
    }

    pub fn log_path(&self, id: u64) -> PathBuf {
        self.log_dir.join(format!("{}.{}", id, LOG_EXTENSION))
    }

    /// Create both directories if missing
    pub fn create_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.table_dir)?;
        fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }

    /// Ids of all finished tables in the table directory, ascending
    pub fn table_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.table_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TABLE_EXTENSION) {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Delete leftovers of writers that never finished
    pub fn remove_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.table_dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(TEMP_SUFFIX))
                .unwrap_or(false);
            if is_temp {
                debug!(path = %path.display(), "removing unfinished table");
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Make renames and unlinks in the table directory durable
    pub fn sync_table_directory(&self) -> Result<()> {
        #[cfg(unix)]
        {
            fs::File::open(&self.table_dir)?.sync_all()?;
        }
        Ok(())
    }
}
