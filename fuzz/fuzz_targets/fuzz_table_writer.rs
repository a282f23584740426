#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use std::sync::Arc;
use tierdb_core::{Key, Record, Value};
use tierdb_storage::{FileTable, IndexBlockCache, Paths, RecordBlockCache, TableWriter};

#[derive(Arbitrary, Debug)]
struct Input {
    block_size: u16,
    index_block_size: u16,
    records: Vec<(Vec<u8>, u64, Option<Vec<u8>>)>,
}

fuzz_target!(|input: Input| {
    if input.records.len() > 5_000 {
        return;
    }
    let sorted: BTreeMap<Key, Value> = input
        .records
        .into_iter()
        .map(|(data, version, value)| {
            let value = value.map_or(Value::Tombstone, Value::Put);
            (Key::new(data, version), value)
        })
        .collect();

    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let paths = Paths::new(dir.path(), dir.path());
    let mut writer = TableWriter::open(
        1,
        &paths,
        sorted.len(),
        (input.block_size as usize).max(64),
        (input.index_block_size as usize).max(64),
    )
    .unwrap();
    for (key, value) in &sorted {
        writer.write(&Record::new(key.clone(), value.clone())).unwrap();
    }
    if sorted.is_empty() {
        let meta = writer.finish().unwrap();
        assert_eq!(meta.record_count, 0);
        return;
    }
    writer.finish().unwrap();

    let table = Arc::new(
        FileTable::open(
            1,
            &paths,
            Arc::new(RecordBlockCache::new("fuzz-records", 1 << 16)),
            Arc::new(IndexBlockCache::new("fuzz-index", 1 << 16)),
        )
        .unwrap(),
    );
    let read: Vec<Record> = table
        .ascending_iter(None)
        .unwrap()
        .collect::<tierdb_core::Result<_>>()
        .unwrap();
    assert_eq!(read.len(), sorted.len());
    for (record, (key, value)) in read.iter().zip(&sorted) {
        assert_eq!(record.key(), key);
        assert_eq!(record.value(), value);
        let found = table.get(key).unwrap().unwrap();
        assert_eq!(found.key(), key);
    }
});
