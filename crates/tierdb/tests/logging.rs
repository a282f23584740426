// Logging setup; a separate test binary because the subscriber is global

use tierdb::logging::{LogConfig, LogFormat};
use tierdb::{Config, Key, NoCompactionStrategy, TableStore};

#[test]
fn test_file_logging_captures_store_events() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("logs").join("tierdb.log");
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();

    let guard = LogConfig::storage_debug()
        .with_file(&log_file)
        .with_format(LogFormat::Compact)
        .init()
        .expect("Failed to install subscriber")
        .expect("File output returns a guard");

    // A second global subscriber is refused instead of panicking
    assert!(LogConfig::info().init().is_err());

    let config = Config::builder()
        .directory(dir.path().join("tables"))
        .compaction_strategy(NoCompactionStrategy)
        .print_metrics(true)
        .build()
        .unwrap();
    let store = TableStore::open(config).unwrap();
    let mut table = store.new_memory_table();
    table.put("k", 1, "v");
    store.flush_and_wait(table).unwrap();
    assert!(store.get(&Key::latest("k")).unwrap().is_some());
    store.close().unwrap();
    drop(guard);

    let written: String = std::fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("tierdb.log"))
        .map(|e| std::fs::read_to_string(e.path()).unwrap())
        .collect();
    // RUST_LOG overrides the configured level
    if std::env::var_os("RUST_LOG").is_none() {
        assert!(written.contains("flushed memory table"));
        assert!(written.contains("table store metrics"));
    }
}
