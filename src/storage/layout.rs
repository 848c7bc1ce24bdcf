use std::fs;
use std::path::{Path, PathBuf};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{BlockId, ColumnId, SegmentId};

/// Directory structure for data, catalog and WAL files.
///
/// Data root layout:
///   db/<db_dir_tail>/tbl/<table_dir_tail>/seg/<segment_id>/blk/<block_id>/col<column_id>
/// Index directories:
///   db/<db_dir_tail>/tbl/<table_dir_tail>/idx/<index_dir_tail>
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub data_dir: PathBuf,
    pub wal_dir: PathBuf,
    pub catalog_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir.clone();
        let wal_dir = config.wal_dir.clone();
        let catalog_dir = data_dir.join("catalog");

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&catalog_dir)?;

        Ok(StorageLayout {
            data_dir,
            wal_dir,
            catalog_dir,
        })
    }

    pub fn db_dir(&self, db_dir_tail: &str) -> PathBuf {
        self.data_dir.join("db").join(db_dir_tail)
    }

    pub fn table_dir(db_dir: &Path, table_dir_tail: &str) -> PathBuf {
        db_dir.join("tbl").join(table_dir_tail)
    }

    pub fn segment_dir(table_dir: &Path, segment_id: SegmentId) -> PathBuf {
        table_dir.join("seg").join(segment_id.to_string())
    }

    pub fn block_dir(segment_dir: &Path, block_id: BlockId) -> PathBuf {
        segment_dir.join("blk").join(block_id.to_string())
    }

    pub fn column_file(block_dir: &Path, column_id: ColumnId) -> PathBuf {
        block_dir.join(format!("col{}", column_id))
    }

    pub fn index_dir(table_dir: &Path, index_dir_tail: &str) -> PathBuf {
        table_dir.join("idx").join(index_dir_tail)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(".lock")
    }
}
