mod common;

use std::fs;
use std::sync::Arc;
use std::thread;
use common::{open_engine, setup_table, table_def, text_block};
use stratumdb::wal::entry::WalEntry;
use stratumdb::wal::log_file::parse_wal_filenames;
use stratumdb::{Config, ConflictType, Engine, ErrorKind, FlushOption};
use tempfile::TempDir;

#[test]
fn concurrent_commits_are_wal_ordered() {
    let dir = TempDir::new().unwrap();
    let workers = 8usize;
    let txns_per_worker = 5usize;
    {
        // large threshold: keep a single wal.log so file order is total
        let config = Config {
            flush_option: FlushOption::FlushAtOnce,
            ..Config::with_data_dir(dir.path())
        };
        let engine = Arc::new(Engine::open(config).unwrap());
        setup_table(&engine, "d", "t");

        let mut handles = Vec::new();
        for w in 0..workers {
            let engine = engine.clone();
            handles.push(thread::spawn(move || {
                for i in 0..txns_per_worker {
                    let txn = engine.begin_txn().unwrap();
                    let row = (
                        format!("w{}i{}", w, i),
                        format!("row from worker {} iteration {}", w, i),
                    );
                    txn.append("d", "t", text_block(&[row])).unwrap();
                    engine.commit_txn(&txn).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let txn = engine.begin_txn().unwrap();
        assert_eq!(
            txn.row_count("d", "t").unwrap(),
            (workers * txns_per_worker) as u64
        );
        engine.commit_txn(&txn).unwrap();
        engine.shutdown();
    }

    // wal order must equal commit-ts order
    let (active, rolled) = parse_wal_filenames(&dir.path().join("wal")).unwrap();
    assert!(rolled.is_empty(), "threshold was large enough for one file");
    let bytes = fs::read(active.unwrap()).unwrap();
    let mut pos = 0usize;
    let mut commit_timestamps = Vec::new();
    while pos < bytes.len() {
        let (entry, consumed) = WalEntry::parse(&bytes[pos..]).unwrap().unwrap();
        commit_timestamps.push(entry.commit_ts);
        pos += consumed;
    }
    assert!(commit_timestamps.len() >= workers * txns_per_worker);
    for pair in commit_timestamps.windows(2) {
        assert!(pair[0] < pair[1], "wal order must be ascending commit_ts");
    }

    // replay yields a catalog consistent with that order
    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    assert_eq!(
        txn.row_count("d", "t").unwrap(),
        (workers * txns_per_worker) as u64
    );
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn duplicate_and_missing_ddl_respect_conflict_type() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    setup_table(&engine, "d", "t");

    let txn = engine.begin_txn().unwrap();
    let err = txn
        .create_table("d", table_def("t"), ConflictType::Error)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateEntry);
    // ignore turns the duplicate into a no-op
    txn.create_table("d", table_def("t"), ConflictType::Ignore)
        .unwrap();
    let err = txn.drop_table("d", "missing", ConflictType::Error).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    txn.drop_table("d", "missing", ConflictType::Ignore).unwrap();
    engine.commit_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    let err = txn.drop_database("ghost", ConflictType::Error).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    txn.drop_database("ghost", ConflictType::Ignore).unwrap();
    let err = txn.create_database("d", ConflictType::Error).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateEntry);
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn rollback_reverts_staged_catalog_entries() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());

    let txn = engine.begin_txn().unwrap();
    txn.create_database("d", ConflictType::Error).unwrap();
    txn.create_table("d", table_def("t"), ConflictType::Error)
        .unwrap();
    // staged entries are visible to the owning transaction
    assert_eq!(txn.row_count("d", "t").unwrap(), 0);
    engine.rollback_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    let err = txn.row_count("d", "t").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    // the name is free again
    txn.create_database("d", ConflictType::Error).unwrap();
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn uncommitted_ddl_is_invisible_to_other_transactions() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());

    let writer = engine.begin_txn().unwrap();
    writer.create_database("d", ConflictType::Error).unwrap();

    let reader = engine.begin_txn().unwrap();
    let err = reader.table("d", "t").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    engine.commit_txn(&reader).unwrap();

    engine.commit_txn(&writer).unwrap();

    let reader = engine.begin_txn().unwrap();
    assert!(reader.table("d", "t").is_err()); // table still missing
    reader.create_table("d", table_def("t"), ConflictType::Error).unwrap();
    engine.commit_txn(&reader).unwrap();
}

#[test]
fn compacting_requires_sealed_segments() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    setup_table(&engine, "d", "t");

    // appended rows live in an unsealed segment
    let txn = engine.begin_txn().unwrap();
    txn.append(
        "d",
        "t",
        text_block(&[("a".to_string(), "some text".to_string())]),
    )
    .unwrap();
    engine.commit_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    let err = txn.compact("d", "t", None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = txn.compact("d", "t", Some(vec![0])).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TxnConflict);
    engine.rollback_txn(&txn).unwrap();
}

#[test]
fn read_only_transactions_skip_the_wal() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    setup_table(&engine, "d", "t");

    let wal_size_before = engine.wal.wal_size();
    let txn = engine.begin_txn().unwrap();
    assert_eq!(txn.row_count("d", "t").unwrap(), 0);
    engine.commit_txn(&txn).unwrap();
    assert_eq!(engine.wal.wal_size(), wal_size_before);
}
