#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::Arc;
use tierdb_core::Key;
use tierdb_storage::{FileTable, IndexBlockCache, Paths, RecordBlockCache};

fuzz_target!(|data: &[u8]| {
    if data.len() > 10_000_000 {
        return;
    }

    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let paths = Paths::new(dir.path(), dir.path());
    if std::fs::write(paths.table_path(1), data).is_err() {
        return;
    }

    let table = match FileTable::open(
        1,
        &paths,
        Arc::new(RecordBlockCache::new("fuzz-records", 1 << 20)),
        Arc::new(IndexBlockCache::new("fuzz-index", 1 << 20)),
    ) {
        Ok(table) => Arc::new(table),
        Err(_) => return,
    };

    if let Ok(iter) = table.ascending_iter(None) {
        for record in iter.take(10_000) {
            match record {
                Ok(record) => {
                    let _ = table.get(&Key::latest(record.key().data()));
                }
                Err(_) => break,
            }
        }
    }
});
