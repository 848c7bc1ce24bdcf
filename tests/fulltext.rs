mod common;

use common::{open_engine, setup_table, text_block};
use stratumdb::{ConflictType, IndexDef, RowId};
use tempfile::TempDir;

/// 1000-row corpus; a handful of rows carry the query terms with known
/// frequencies so the BM25 ranking is deterministic.
fn corpus() -> Vec<(String, String)> {
    (0..1000)
        .map(|i| {
            let text = match i {
                200 => "harmful chemical harmful chemical".to_string(),
                300 => "harmful chemical spill downstream of the plant".to_string(),
                400 => "the chemical was not considered harmful by the agency in its latest report".to_string(),
                500 => "harmful noise levels".to_string(),
                600 => "chemical engineering lecture notes".to_string(),
                _ => format!("ordinary filler document number {}", i),
            };
            (format!("doc{:04}", i), text)
        })
        .collect()
}

#[test]
fn fulltext_index_after_import_ranks_deterministically() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    setup_table(&engine, "d", "t");

    let txn = engine.begin_txn().unwrap();
    let segment_id = txn.import("d", "t", vec![text_block(&corpus())]).unwrap();
    engine.commit_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    txn.create_index(
        "d",
        "t",
        IndexDef::fulltext("ft_text", "text", "standard"),
        ConflictType::Error,
    )
    .unwrap();
    engine.commit_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    let hits = txn
        .fulltext_match("d", "t", "text", "harmful chemical", 3)
        .unwrap();
    assert_eq!(hits.len(), 3);
    // row 200 matches both terms twice in the shortest text
    assert_eq!(hits[0].0, RowId::new(segment_id, 200));
    // both-term matches outrank single-term matches
    let runners: Vec<u32> = hits[1..].iter().map(|(r, _)| r.segment_offset).collect();
    assert!(runners.contains(&300));
    assert!(hits[0].1 > hits[1].1);
    assert!(hits[1].1 >= hits[2].1);
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn fulltext_survives_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        let txn = engine.begin_txn().unwrap();
        txn.import("d", "t", vec![text_block(&corpus())]).unwrap();
        engine.commit_txn(&txn).unwrap();

        let txn = engine.begin_txn().unwrap();
        txn.create_index(
            "d",
            "t",
            IndexDef::fulltext("ft_text", "text", "standard"),
            ConflictType::Error,
        )
        .unwrap();
        engine.commit_txn(&txn).unwrap();
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    let hits = txn
        .fulltext_match("d", "t", "text", "harmful chemical", 3)
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].0.segment_offset, 200);
    engine.commit_txn(&txn).unwrap();
}

#[test]
fn reader_cache_freshness_window() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(dir.path());
    setup_table(&engine, "d", "t");

    let txn = engine.begin_txn().unwrap();
    txn.import("d", "t", vec![text_block(&corpus())]).unwrap();
    engine.commit_txn(&txn).unwrap();

    let txn = engine.begin_txn().unwrap();
    txn.create_index(
        "d",
        "t",
        IndexDef::fulltext("ft_text", "text", "standard"),
        ConflictType::Error,
    )
    .unwrap();
    engine.commit_txn(&txn).unwrap();

    // reader opened before the update keeps seeing the old snapshot
    let t0 = engine.begin_txn().unwrap();
    let reader0 = t0.get_index_reader("d", "t").unwrap();
    assert!(reader0.search(1, &["zebra".to_string()], 10).unwrap().is_empty());

    // commit an index-relevant update at a later timestamp
    let tw = engine.begin_txn().unwrap();
    tw.append(
        "d",
        "t",
        text_block(&[("docN".to_string(), "zebra zoo".to_string())]),
    )
    .unwrap();
    engine.commit_txn(&tw).unwrap();

    // a reader at a snapshot past the update observes the new postings
    let t2 = engine.begin_txn().unwrap();
    let reader2 = t2.get_index_reader("d", "t").unwrap();
    let hits = reader2.search(1, &["zebra".to_string()], 10).unwrap();
    assert_eq!(hits.len(), 1);

    // the earlier reader still resolves against its own snapshot
    assert!(reader0.search(1, &["zebra".to_string()], 10).unwrap().is_empty());

    // with no further updates the cache is shared between readers
    let t3 = engine.begin_txn().unwrap();
    let reader3 = t3.get_index_reader("d", "t").unwrap();
    assert!(std::sync::Arc::ptr_eq(
        &reader2.column_readers,
        &reader3.column_readers
    ));

    engine.commit_txn(&t0).unwrap();
    engine.commit_txn(&t2).unwrap();
    engine.commit_txn(&t3).unwrap();
}

#[test]
fn appended_rows_reach_existing_index_and_survive_checkpointed_recovery() {
    let dir = TempDir::new().unwrap();
    {
        let engine = open_engine(dir.path());
        setup_table(&engine, "d", "t");

        let txn = engine.begin_txn().unwrap();
        txn.create_index(
            "d",
            "t",
            IndexDef::fulltext("ft_text", "text", "standard"),
            ConflictType::Error,
        )
        .unwrap();
        engine.commit_txn(&txn).unwrap();

        let txn = engine.begin_txn().unwrap();
        txn.append(
            "d",
            "t",
            text_block(&[
                ("a".to_string(), "golden retriever".to_string()),
                ("b".to_string(), "siamese cat".to_string()),
            ]),
        )
        .unwrap();
        engine.commit_txn(&txn).unwrap();

        // visible through the in-memory indexer before any flush
        let txn = engine.begin_txn().unwrap();
        let hits = txn
            .fulltext_match("d", "t", "text", "retriever", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        engine.commit_txn(&txn).unwrap();

        // the checkpoint dumps the in-memory postings to a disk base
        engine.checkpoint(true);
        engine.shutdown();
    }

    let engine = open_engine(dir.path());
    let txn = engine.begin_txn().unwrap();
    let hits = txn
        .fulltext_match("d", "t", "text", "retriever", 5)
        .unwrap();
    assert_eq!(hits.len(), 1);
    let hits = txn.fulltext_match("d", "t", "text", "cat", 5).unwrap();
    assert_eq!(hits.len(), 1);
    engine.commit_txn(&txn).unwrap();
}
