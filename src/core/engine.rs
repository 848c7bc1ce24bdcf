use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::catalog::catalog::Catalog;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::storage::buffer::BufferManager;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::txn::manager::TxnManager;
use crate::txn::transaction::Txn;
use crate::wal::manager::WalManager;

/// Storage engine facade: wires the catalog, buffer manager, transaction
/// manager and WAL manager together over one data directory.
pub struct Engine {
    pub config: Config,
    pub catalog: Arc<Catalog>,
    pub buffer: Arc<BufferManager>,
    pub registry: Arc<AnalyzerRegistry>,
    pub txn_mgr: Arc<TxnManager>,
    pub wal: Arc<WalManager>,
    _lock: FileLock,
    shutting_down: AtomicBool,
}

impl Engine {
    /// Open (or create) the engine: lock the data directory, replay the
    /// WAL, start the background threads. A fresh directory gets a
    /// bootstrap full checkpoint so recovery always finds one.
    pub fn open(config: Config) -> Result<Engine> {
        info!(data_dir = %config.data_dir.display(), "engine starting");
        let layout = StorageLayout::new(&config)?;
        let lock = FileLock::acquire(&layout, true)?;

        let catalog = Arc::new(Catalog::new(layout.clone(), config.session_memory_limit));
        let buffer = Arc::new(BufferManager::new(config.buffer_pool_files));
        let registry = Arc::new(AnalyzerRegistry::new());

        let txn_mgr = Arc::new(TxnManager::new(
            catalog.clone(),
            buffer.clone(),
            registry.clone(),
        ));
        let wal = Arc::new(WalManager::new(
            &config,
            &layout,
            catalog.clone(),
            buffer.clone(),
            registry.clone(),
        ));
        txn_mgr.set_wal(wal.clone());
        wal.set_txn_manager(txn_mgr.clone());

        let start_ts = wal.replay()?;
        txn_mgr.set_start_ts(start_ts.unwrap_or(0));
        wal.start()?;
        if start_ts.is_none() {
            wal.checkpoint_now(true);
        }

        info!(start_ts = start_ts.unwrap_or(0), "engine started");
        Ok(Engine {
            config,
            catalog,
            buffer,
            registry,
            txn_mgr,
            wal,
            _lock: lock,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn begin_txn(&self) -> Result<Arc<Txn>> {
        self.txn_mgr.begin()
    }

    pub fn commit_txn(&self, txn: &Arc<Txn>) -> Result<()> {
        self.txn_mgr.commit(txn)
    }

    pub fn rollback_txn(&self, txn: &Arc<Txn>) -> Result<()> {
        self.txn_mgr.rollback(txn)
    }

    /// Force a checkpoint; mainly a test and maintenance hook.
    pub fn checkpoint(&self, is_full: bool) {
        self.wal.checkpoint_now(is_full);
    }

    /// Idempotent clean shutdown: stops the transaction manager, drains
    /// the WAL queue, joins the background threads.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("engine shutting down");
        self.wal.stop();
        info!("engine shut down");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
