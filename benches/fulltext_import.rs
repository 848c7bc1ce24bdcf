use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use stratumdb::{
    ColumnDef, Config, ConflictType, DataBlock, DataType, Engine, FlushOption, IndexDef,
    TableDef, Value,
};
use tempfile::TempDir;

const WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "harmful", "chemical",
    "report", "analysis", "segment", "index", "storage", "engine",
];

/// Helper to build a column-major batch of generated documents
fn generate_block(rng: &mut StdRng, rows: usize, words_per_doc: usize) -> DataBlock {
    let mut block = DataBlock::new(2);
    for i in 0..rows {
        let text: String = (0..words_per_doc)
            .map(|_| WORDS[rng.gen_range(0..WORDS.len())])
            .collect::<Vec<_>>()
            .join(" ");
        block.push_row(&[
            Value::Varchar(format!("doc{:06}", i)),
            Value::Varchar(text),
        ]);
    }
    block
}

fn open_engine(dir: &TempDir) -> Arc<Engine> {
    let config = Config {
        // keep fsync out of the measured path
        flush_option: FlushOption::OnlyWrite,
        ..Config::with_data_dir(dir.path())
    };
    let engine = Arc::new(Engine::open(config).unwrap());
    let txn = engine.begin_txn().unwrap();
    txn.create_database("bench", ConflictType::Error).unwrap();
    txn.create_table(
        "bench",
        TableDef::new(
            "docs",
            vec![
                ColumnDef::new(0, "id", DataType::Varchar),
                ColumnDef::new(1, "text", DataType::Varchar),
            ],
        ),
        ConflictType::Error,
    )
    .unwrap();
    engine.commit_txn(&txn).unwrap();
    engine
}

fn bench_import(c: &mut Criterion) {
    let mut group = c.benchmark_group("fulltext_import");
    for rows in [1_000usize, 5_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter_with_setup(
                || {
                    let dir = TempDir::new().unwrap();
                    let engine = open_engine(&dir);
                    let mut rng = StdRng::seed_from_u64(42);
                    let block = generate_block(&mut rng, rows, 24);
                    (dir, engine, block)
                },
                |(_dir, engine, block)| {
                    let txn = engine.begin_txn().unwrap();
                    txn.import("bench", "docs", vec![block]).unwrap();
                    engine.commit_txn(&txn).unwrap();
                    engine.shutdown();
                },
            );
        });
    }
    group.finish();
}

fn bench_index_build(c: &mut Criterion) {
    c.bench_function("create_fulltext_index_5000_docs", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let engine = open_engine(&dir);
                let mut rng = StdRng::seed_from_u64(7);
                let block = generate_block(&mut rng, 5_000, 24);
                let txn = engine.begin_txn().unwrap();
                txn.import("bench", "docs", vec![block]).unwrap();
                engine.commit_txn(&txn).unwrap();
                (dir, engine)
            },
            |(_dir, engine)| {
                let txn = engine.begin_txn().unwrap();
                txn.create_index(
                    "bench",
                    "docs",
                    IndexDef::fulltext("ft_text", "text", "standard"),
                    ConflictType::Error,
                )
                .unwrap();
                engine.commit_txn(&txn).unwrap();
                engine.shutdown();
            },
        );
    });
}

fn bench_match_query(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir);
    let mut rng = StdRng::seed_from_u64(7);
    let block = generate_block(&mut rng, 5_000, 24);
    let txn = engine.begin_txn().unwrap();
    txn.import("bench", "docs", vec![block]).unwrap();
    engine.commit_txn(&txn).unwrap();
    let txn = engine.begin_txn().unwrap();
    txn.create_index(
        "bench",
        "docs",
        IndexDef::fulltext("ft_text", "text", "standard"),
        ConflictType::Error,
    )
    .unwrap();
    engine.commit_txn(&txn).unwrap();

    c.bench_function("fulltext_match_top10", |b| {
        b.iter(|| {
            let txn = engine.begin_txn().unwrap();
            let hits = txn
                .fulltext_match("bench", "docs", "text", "harmful chemical", 10)
                .unwrap();
            engine.commit_txn(&txn).unwrap();
            hits
        });
    });
}

criterion_group!(benches, bench_import, bench_index_build, bench_match_query);
criterion_main!(benches);
