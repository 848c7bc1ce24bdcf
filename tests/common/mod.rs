use std::path::Path;
use stratumdb::{
    ColumnDef, Config, DataBlock, DataType, Engine, FlushOption, TableDef, Value,
};

/// Engine configuration sized for tests: tiny logs so rotation and delta
/// checkpoints actually trigger.
pub fn test_config(data_dir: &Path) -> Config {
    Config {
        wal_size_threshold: 4 * 1024,
        delta_checkpoint_interval_wal_bytes: 8 * 1024,
        flush_option: FlushOption::FlushAtOnce,
        ..Config::with_data_dir(data_dir)
    }
}

pub fn open_engine(data_dir: &Path) -> Engine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
    Engine::open(test_config(data_dir)).expect("engine open")
}

/// `t(id varchar, text varchar)`
pub fn table_def(name: &str) -> TableDef {
    TableDef::new(
        name,
        vec![
            ColumnDef::new(0, "id", DataType::Varchar),
            ColumnDef::new(1, "text", DataType::Varchar),
        ],
    )
}

pub fn text_block(rows: &[(String, String)]) -> DataBlock {
    let mut block = DataBlock::new(2);
    for (id, text) in rows {
        block.push_row(&[Value::Varchar(id.clone()), Value::Varchar(text.clone())]);
    }
    block
}

/// Create database `db` with table `table` in one committed transaction.
pub fn setup_table(engine: &Engine, db: &str, table: &str) {
    let txn = engine.begin_txn().unwrap();
    txn.create_database(db, stratumdb::ConflictType::Error).unwrap();
    txn.create_table(db, table_def(table), stratumdb::ConflictType::Error)
        .unwrap();
    engine.commit_txn(&txn).unwrap();
}
