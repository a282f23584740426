use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tierdb_core::{Key, Record};
use tierdb_storage::{FileTable, IndexBlockCache, Paths, RecordBlockCache, TableWriter};

const RECORDS: usize = 100_000;

fn key(i: usize) -> String {
    format!("key{:08}", i)
}

fn build_table(paths: &Paths, block_size: usize) {
    let mut writer = TableWriter::open(1, paths, RECORDS, block_size, 65_536).unwrap();
    for i in 0..RECORDS {
        writer
            .write(&Record::put(key(i), 1, vec![b'v'; 100]))
            .unwrap();
    }
    writer.finish().unwrap();
}

fn file_table_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_table_get");

    for block_size in [4_096usize, 16_384] {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path(), dir.path());
        build_table(&paths, block_size);

        let table = FileTable::open(
            1,
            &paths,
            Arc::new(RecordBlockCache::new("records", 128_000_000)),
            Arc::new(IndexBlockCache::new("index", 32_000_000)),
        )
        .unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        group.bench_with_input(BenchmarkId::from_parameter(block_size), &table, |b, table| {
            b.iter(|| {
                let target = Key::latest(key(rng.gen_range(0..RECORDS)));
                table.get(&target).unwrap()
            });
        });
    }

    group.finish();
}

fn file_table_scan(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let paths = Paths::new(dir.path(), dir.path());
    build_table(&paths, 16_384);
    let table = Arc::new(
        FileTable::open(
            1,
            &paths,
            Arc::new(RecordBlockCache::new("records", 128_000_000)),
            Arc::new(IndexBlockCache::new("index", 32_000_000)),
        )
        .unwrap(),
    );

    c.bench_function("file_table_scan_100k", |b| {
        b.iter(|| table.ascending_iter(None).unwrap().count());
    });
}

criterion_group!(benches, file_table_get, file_table_scan);
criterion_main!(benches);
