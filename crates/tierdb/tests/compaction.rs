// Compaction behavior observed through TableStore

mod common;

use common::{key, memory_table, scan, value_of, StoreFixture};
use std::sync::Arc;
use std::thread;
use tierdb::{
    CompactionStrategy, FullCompactionStrategy, Key, NoCompactionStrategy, Record, TableMeta,
    VersionRetention,
};

/// Always merges the two newest tables
#[derive(Debug)]
struct NewestPair;

impl CompactionStrategy for NewestPair {
    fn name(&self) -> &'static str {
        "newest-pair"
    }

    fn select(&self, candidates: &[TableMeta]) -> Option<Vec<u64>> {
        let mut ids: Vec<u64> = candidates.iter().map(|t| t.id).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.truncate(2);
        Some(ids)
    }
}

fn versions(records: &[Record]) -> Vec<(String, u64, String)> {
    records
        .iter()
        .map(|r| {
            (
                String::from_utf8_lossy(r.key().data()).into_owned(),
                r.key().version(),
                value_of(r),
            )
        })
        .collect()
}

#[test]
fn test_latest_retention_keeps_newest_version() {
    let fixture = StoreFixture::new();
    let store = fixture.open(fixture.config().compaction_strategy(FullCompactionStrategy::new(2)));

    let mut first = store.new_memory_table();
    first.put("a", 1, "a1");
    first.put("b", 2, "b2");
    let mut second = store.new_memory_table();
    second.put("a", 3, "a3");

    // Both flushed before anything compacts
    store.flush_and_wait(first).unwrap();
    store.flush_and_wait(second).unwrap();
    store.wait_for_background_work();

    assert_eq!(store.table_count(), 1);
    assert_eq!(
        versions(&scan(&store)),
        vec![
            ("a".to_string(), 3, "a3".to_string()),
            ("b".to_string(), 2, "b2".to_string()),
        ]
    );
    assert!(store.get(&Key::new("a", 2)).unwrap().is_none());

    let stats = store.stats();
    assert_eq!(stats.compaction.compactions, 1);
    assert_eq!(stats.compaction.records_read, 3);
    assert_eq!(stats.compaction.records_written, 2);
    assert_eq!(stats.compaction.records_dropped, 1);
    assert_eq!(fixture.list_files().len(), 1);
}

#[test]
fn test_all_retention_keeps_every_version() {
    let fixture = StoreFixture::new();
    let store = fixture.open(
        fixture
            .config()
            .compaction_strategy(FullCompactionStrategy::new(2))
            .version_retention(VersionRetention::All),
    );

    let mut first = store.new_memory_table();
    first.put("a", 1, "a1");
    first.put("b", 2, "b2");
    let mut second = store.new_memory_table();
    second.put("a", 3, "a3");
    store.flush_and_wait(first).unwrap();
    store.flush_and_wait(second).unwrap();
    store.wait_for_background_work();

    assert_eq!(store.table_count(), 1);
    assert_eq!(
        versions(&scan(&store)),
        vec![
            ("a".to_string(), 3, "a3".to_string()),
            ("a".to_string(), 1, "a1".to_string()),
            ("b".to_string(), 2, "b2".to_string()),
        ]
    );
    assert_eq!(value_of(&store.get(&Key::new("a", 2)).unwrap().unwrap()), "a1");
}

#[test]
fn test_repeated_merges_drop_deleted_key() {
    let fixture = StoreFixture::new();
    let store = fixture.open(fixture.config().compaction_strategy(NewestPair));

    let mut oldest = store.new_memory_table();
    oldest.put("a", 1, "a1");
    let mut deletes = store.new_memory_table();
    deletes.delete("a", 2);
    deletes.put("c", 2, "c2");
    let mut unrelated = store.new_memory_table();
    unrelated.put("d", 3, "d3");

    store.flush_and_wait(oldest).unwrap();
    store.flush_and_wait(deletes).unwrap();
    store.flush_and_wait(unrelated).unwrap();
    store.wait_for_background_work();

    assert_eq!(store.table_count(), 1);
    assert!(store.get(&Key::latest("a")).unwrap().is_none());
    assert_eq!(
        versions(&scan(&store)),
        vec![
            ("c".to_string(), 2, "c2".to_string()),
            ("d".to_string(), 3, "d3".to_string()),
        ]
    );
}

#[test]
fn test_partial_merge_keeps_needed_tombstone() {
    let fixture = StoreFixture::new();
    let store = fixture.open(fixture.config().compaction_strategy(NoCompactionStrategy));

    let mut oldest = store.new_memory_table();
    oldest.put("a", 1, "a1");
    let mut deletes = store.new_memory_table();
    deletes.delete("a", 2);
    let mut unrelated = store.new_memory_table();
    unrelated.put("d", 3, "d3");
    store.flush_and_wait(oldest).unwrap();
    store.flush_and_wait(deletes).unwrap();
    store.flush_and_wait(unrelated).unwrap();
    assert!(store.compact_once().unwrap().is_none());

    // Reopen with a strategy that merges only the two newest tables
    store.close().unwrap();
    drop(store);
    let store = fixture.open(fixture.config().compaction_strategy(NewestPair));
    let outcome = store.compact_once().unwrap().unwrap();
    assert_eq!(outcome.plan.inputs, vec![3, 2]);

    let output = outcome.output.unwrap();
    assert_eq!(output.record_count, 2);
    let a = store.get(&Key::latest("a")).unwrap().unwrap();
    assert!(a.is_tombstone());
    assert_eq!(a.key().version(), 2);
    assert!(store.get(&Key::new("a", 1)).unwrap().is_some());
}

#[test]
fn test_merge_of_only_tombstones_leaves_no_table() {
    let fixture = StoreFixture::new();
    let store = fixture.open(fixture.config().compaction_strategy(NoCompactionStrategy));
    store.flush_and_wait(memory_table(&store, 0..50, 1)).unwrap();
    let mut deletes = store.new_memory_table();
    for i in 0..50 {
        deletes.delete(key(i), 2);
    }
    store.flush_and_wait(deletes).unwrap();
    store.close().unwrap();
    drop(store);

    let store = fixture.open(fixture.config().compaction_strategy(FullCompactionStrategy::new(2)));
    let outcome = store.compact_once().unwrap().unwrap();
    assert!(outcome.output.is_none());
    assert_eq!(store.table_count(), 0);
    assert!(scan(&store).is_empty());
    assert!(fixture.list_files().is_empty());
}

#[test]
fn test_size_tiered_merges_similar_tables() {
    let fixture = StoreFixture::new();
    // Default strategy: four tables of the same tier trigger a merge
    let store = fixture.open(fixture.config());

    for batch in 0..3u32 {
        store
            .flush_and_wait(memory_table(&store, batch * 100..batch * 100 + 100, 1))
            .unwrap();
    }
    store.wait_for_background_work();
    assert_eq!(store.table_count(), 3);

    store.flush_and_wait(memory_table(&store, 300..400, 1)).unwrap();
    store.wait_for_background_work();
    assert_eq!(store.table_count(), 1);
    assert_eq!(scan(&store).len(), 400);
}

#[test]
fn test_readers_are_isolated_from_compaction() {
    let fixture = StoreFixture::new();
    let store = fixture.open(fixture.config().compaction_strategy(NoCompactionStrategy));
    for version in 1..=4u64 {
        store
            .flush_and_wait(memory_table(&store, 0..300, version))
            .unwrap();
    }
    let before = scan(&store);
    let input_ids: Vec<u64> = store.table_metas().iter().map(|m| m.id).collect();
    store.close().unwrap();
    drop(store);

    let store = fixture.open(fixture.config().compaction_strategy(FullCompactionStrategy::new(2)));
    let snapshot = store.snapshot();
    let mut iter = store.ascending_iter(None).unwrap();
    let head: Vec<Record> = iter.by_ref().take(10).collect::<tierdb::Result<_>>().unwrap();

    store.schedule_compactions().unwrap();
    store.wait_for_background_work();
    assert_eq!(store.table_count(), 1);

    // The iterator and the snapshot still see the old tables
    let rest: Vec<Record> = iter.collect::<tierdb::Result<_>>().unwrap();
    let mut seen = head;
    seen.extend(rest);
    assert_eq!(seen, before);
    assert_eq!(snapshot.len(), 4);
    for id in &input_ids {
        assert!(fixture.table_dir().join(format!("{}.table", id)).exists());
    }

    // Files go away with the last reference
    drop(snapshot);
    for id in &input_ids {
        assert!(!fixture.table_dir().join(format!("{}.table", id)).exists());
    }
    let after = scan(&store);
    assert_eq!(after.len(), 300);
    assert!(after.iter().all(|r| r.key().version() == 4));
}

#[test]
fn test_concurrent_reads_during_flush_and_compaction() {
    let fixture = StoreFixture::new();
    let store = Arc::new(
        fixture.open(
            fixture
                .config()
                .compaction_strategy(FullCompactionStrategy::new(2)),
        ),
    );
    store.flush_and_wait(memory_table(&store, 0..200, 1)).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for round in 0..20 {
                    for i in (0..200).step_by(7) {
                        let record = store
                            .get(&Key::latest(key(i)))
                            .unwrap()
                            .unwrap_or_else(|| panic!("{} missing in round {}", key(i), round));
                        assert!(record.key().version() >= 1);
                    }
                }
            })
        })
        .collect();

    for version in 2..=6u64 {
        store.flush_and_wait(memory_table(&store, 0..200, version)).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    store.wait_for_background_work();

    let record = store.get(&Key::latest(key(0))).unwrap().unwrap();
    assert_eq!(record.key().version(), 6);
}

#[test]
fn test_close_during_compaction_leaves_inputs_intact() {
    let fixture = StoreFixture::new();
    {
        let store = fixture.open(fixture.config().compaction_strategy(NoCompactionStrategy));
        for version in 1..=2u64 {
            store
                .flush_and_wait(memory_table(&store, 0..1_000, version))
                .unwrap();
        }
    }
    let files_before = fixture.list_files();

    // Throttled so the merge is still running when the store closes
    let store = fixture.open(
        fixture
            .config()
            .compaction_strategy(FullCompactionStrategy::new(2))
            .max_compaction_rate(4_096),
    );
    assert_eq!(store.schedule_compactions().unwrap(), 1);
    store.close().unwrap();

    assert_eq!(fixture.list_files(), files_before);
    assert!(!fixture.list_files().iter().any(|f| f.ends_with(".tmp")));
    drop(store);

    let store = fixture.open(fixture.config().compaction_strategy(NoCompactionStrategy));
    assert_eq!(store.table_count(), 2);
    assert_eq!(scan(&store).len(), 2_000);
}
