mod common;

use common::{open_engine, setup_table, text_block};
use stratumdb::wal::log_file::parse_wal_filenames;
use stratumdb::{ConflictType, ErrorKind, Value};
use tempfile::TempDir;

fn rows(n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|i| (format!("r{:04}", i), format!("payload number {}", i)))
        .collect()
}

#[test]
fn append_then_recover_reproduces_rows() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        let txn = engine.begin_txn().unwrap();
        txn.append("d", "t", text_block(&rows(100))).unwrap();
        engine.commit_txn(&txn).unwrap();

        let check = engine.begin_txn().unwrap();
        assert_eq!(check.row_count("d", "t").unwrap(), 100);
        engine.commit_txn(&check).unwrap();
        // no checkpoint here: recovery must come from the log alone
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    assert_eq!(txn.row_count("d", "t").unwrap(), 100);

    let ids = txn.scan_column("d", "t", "id").unwrap();
    assert_eq!(ids.len(), 100);
    for (i, (_, value)) in ids.iter().enumerate() {
        assert_eq!(value, &Value::Varchar(format!("r{:04}", i)));
    }
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn create_then_drop_replays_to_absent_table() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        let txn = engine.begin_txn().unwrap();
        txn.drop_table("d", "t", ConflictType::Error).unwrap();
        engine.commit_txn(&txn).unwrap();
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    let err = txn.row_count("d", "t").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn checkpoint_recycling_preserves_recoverability() {
    let dir = TempDir::new().unwrap();
    let total_batches = 60usize;
    let batch = 50usize;
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        // several times the 4KB wal threshold, forcing rotations and
        // size-triggered delta checkpoints along the way
        for b in 0..total_batches {
            let txn = engine.begin_txn().unwrap();
            let rows: Vec<(String, String)> = (0..batch)
                .map(|i| {
                    let n = b * batch + i;
                    (format!("r{:06}", n), format!("text for row {}", n))
                })
                .collect();
            txn.append("d", "t", text_block(&rows)).unwrap();
            engine.commit_txn(&txn).unwrap();
        }

        engine.checkpoint(true);

        let full_ckp_ts = engine.wal.last_full_ckp_ts();
        let (_, rolled) = parse_wal_filenames(&engine.config.wal_dir).unwrap();
        for file in &rolled {
            assert!(
                file.max_commit_ts > full_ckp_ts,
                "wal file {} should have been recycled (full ckp at {})",
                file.path.display(),
                full_ckp_ts
            );
        }
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    assert_eq!(
        txn.row_count("d", "t").unwrap(),
        (total_batches * batch) as u64
    );
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn compact_then_delete_then_recover() {
    let dir = TempDir::new().unwrap();
    let deleted_ids: Vec<String>;
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        // two sealed segments via bulk import
        let txn = engine.begin_txn().unwrap();
        let s0 = txn.import("d", "t", vec![text_block(&rows(10))]).unwrap();
        engine.commit_txn(&txn).unwrap();
        let txn = engine.begin_txn().unwrap();
        let more: Vec<(String, String)> = (10..20)
            .map(|i| (format!("r{:04}", i), format!("payload number {}", i)))
            .collect();
        let s1 = txn.import("d", "t", vec![text_block(&more)]).unwrap();
        engine.commit_txn(&txn).unwrap();
        assert_ne!(s0, s1);

        // compact S0 and S1 into a replacement segment
        let txn = engine.begin_txn().unwrap();
        txn.compact("d", "t", None).unwrap();
        engine.commit_txn(&txn).unwrap();

        // delete two rows that now live in the compacted segment
        let txn = engine.begin_txn().unwrap();
        let table = txn.table("d", "t").unwrap();
        let visible = table.visible_segments(txn.begin_ts, txn.txn_id);
        assert_eq!(visible.len(), 1);
        assert!(visible[0].segment_id > s1);

        let scan = txn.scan_column("d", "t", "id").unwrap();
        assert_eq!(scan.len(), 20);
        let victims: Vec<_> = scan
            .iter()
            .filter(|(_, v)| {
                matches!(v, Value::Varchar(s) if s == "r0003" || s == "r0015")
            })
            .map(|(row_id, _)| *row_id)
            .collect();
        assert_eq!(victims.len(), 2);
        deleted_ids = vec!["r0003".to_string(), "r0015".to_string()];
        txn.delete("d", "t", victims).unwrap();
        engine.commit_txn(&txn).unwrap();
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    assert_eq!(txn.row_count("d", "t").unwrap(), 18);

    let table = txn.table("d", "t").unwrap();
    let visible = table.visible_segments(txn.begin_ts, txn.txn_id);
    assert_eq!(visible.len(), 1, "only the compacted segment survives");
    assert_eq!(visible[0].segment_id, 2);

    let ids: Vec<String> = txn
        .scan_column("d", "t", "id")
        .unwrap()
        .into_iter()
        .filter_map(|(_, v)| v.as_str().map(|s| s.to_string()))
        .collect();
    for gone in &deleted_ids {
        assert!(!ids.contains(gone), "{} should stay deleted", gone);
    }
    assert_eq!(ids.len(), 18);
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn delta_checkpoint_covers_appends_without_wal() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        let txn = engine.begin_txn().unwrap();
        txn.append("d", "t", text_block(&rows(25))).unwrap();
        engine.commit_txn(&txn).unwrap();

        // delta checkpoint, then rotate nothing away: recovery should use
        // the delta file for rows and the wal only for later entries
        engine.checkpoint(false);

        let txn = engine.begin_txn().unwrap();
        txn.append("d", "t", text_block(&rows(5))).unwrap();
        engine.commit_txn(&txn).unwrap();
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    assert_eq!(txn.row_count("d", "t").unwrap(), 30);
    engine.commit_txn(&txn).unwrap();
}
