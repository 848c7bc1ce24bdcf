use std::path::PathBuf;

/// Durability policy applied by the WAL flush thread after each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOption {
    FlushAtOnce,    // fsync after every batch
    FlushPerSecond, // coalesce fsyncs, at most one per second
    OnlyWrite,      // no fsync at all; unsafe, test-only
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub wal_dir: PathBuf,

    pub wal_size_threshold: u64,                  // rotate wal.log above this
    pub delta_checkpoint_interval_wal_bytes: u64, // delta ckp trigger
    pub flush_option: FlushOption,

    pub buffer_pool_files: usize,                 // page cache capacity (cached files)
    pub session_memory_limit: usize,              // per-query posting memory cap
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            wal_dir: PathBuf::from("./data/wal"),
            wal_size_threshold: 64 * 1024 * 1024,                // 64MB per log file
            delta_checkpoint_interval_wal_bytes: 16 * 1024 * 1024, // 16MB between delta ckps
            flush_option: FlushOption::FlushAtOnce,
            buffer_pool_files: 1024,
            session_memory_limit: 64 * 1024 * 1024,              // 64MB per query
        }
    }
}

impl Config {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Config {
            wal_dir: data_dir.join("wal"),
            data_dir,
            ..Config::default()
        }
    }
}
