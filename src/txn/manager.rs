use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::catalog::catalog::Catalog;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Ts, TxnId};
use crate::storage::buffer::BufferManager;
use crate::txn::transaction::{Txn, TxnState};
use crate::wal::manager::WalManager;

/// Allocates transaction ids and timestamps, tracks active transactions,
/// and runs the two-phase commit against the WAL manager.
pub struct TxnManager {
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    registry: Arc<AnalyzerRegistry>,
    wal: RwLock<Option<Arc<WalManager>>>,
    // monotonic source of begin and commit timestamps
    ts_counter: AtomicU64,
    // serializes commit_ts allocation with WAL enqueue order
    commit_mutex: Mutex<()>,
    txn_map: RwLock<HashMap<TxnId, Arc<Txn>>>,
    running: AtomicBool,
}

impl TxnManager {
    pub fn new(
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        registry: Arc<AnalyzerRegistry>,
    ) -> Self {
        TxnManager {
            catalog,
            buffer,
            registry,
            wal: RwLock::new(None),
            ts_counter: AtomicU64::new(0),
            commit_mutex: Mutex::new(()),
            txn_map: RwLock::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    pub fn set_wal(&self, wal: Arc<WalManager>) {
        *self.wal.write() = Some(wal);
    }

    /// Seed the timestamp counter after recovery.
    pub fn set_start_ts(&self, ts: Ts) {
        self.ts_counter.store(ts, Ordering::Release);
    }

    pub fn current_ts(&self) -> Ts {
        self.ts_counter.load(Ordering::Acquire)
    }

    pub fn begin(self: &Arc<Self>) -> Result<Arc<Txn>> {
        if !self.running.load(Ordering::Acquire) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                "transaction manager is stopped".to_string(),
            ));
        }
        let txn_id = self.catalog.allocate_txn_id();
        let begin_ts = self.current_ts();
        let txn = Arc::new(Txn::new(
            txn_id,
            begin_ts,
            self.catalog.clone(),
            self.buffer.clone(),
            self.registry.clone(),
        ));
        self.txn_map.write().insert(txn_id, txn.clone());
        debug!(txn_id, begin_ts, "txn begin");
        Ok(txn)
    }

    /// Two-phase commit: allocate commit_ts and enqueue the WAL entry under
    /// the commit-order mutex, then block until the flush thread has made
    /// the entry durable and run `commit_bottom`.
    pub fn commit(&self, txn: &Arc<Txn>) -> Result<()> {
        if txn.state() != TxnState::Active {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("txn {} is not active", txn.txn_id),
            ));
        }

        if txn.is_read_only() {
            txn.commit_bottom();
            let _ = txn.wait_done();
            self.cleanup(txn.txn_id);
            return Ok(());
        }

        let wal = self.wal.read().clone().ok_or_else(|| {
            Error::new(ErrorKind::InvalidState, "WAL manager not attached".to_string())
        })?;

        {
            let _order = self.commit_mutex.lock();
            let commit_ts = self.ts_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let entry = match txn.prepare_commit(commit_ts) {
                Ok(entry) => entry,
                Err(err) => {
                    txn.rollback_inner();
                    self.cleanup(txn.txn_id);
                    return Err(err);
                }
            };
            wal.put_entry(Arc::new(entry), txn.clone());
        }

        let result = txn.wait_done();
        if result.is_err() {
            // the WAL never persisted the entry; revert staged state
            txn.rollback_inner();
        }
        self.cleanup(txn.txn_id);
        debug!(txn_id = txn.txn_id, commit_ts = txn.commit_ts(), ok = result.is_ok(), "txn commit");
        result
    }

    pub fn rollback(&self, txn: &Arc<Txn>) -> Result<()> {
        if txn.state() != TxnState::Active {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("txn {} is not active", txn.txn_id),
            ));
        }
        txn.rollback_inner();
        self.cleanup(txn.txn_id);
        debug!(txn_id = txn.txn_id, "txn rollback");
        Ok(())
    }

    /// Lookup an active (not yet cleaned up) transaction.
    pub fn get_txn(&self, txn_id: TxnId) -> Option<Arc<Txn>> {
        self.txn_map.read().get(&txn_id).cloned()
    }

    fn cleanup(&self, txn_id: TxnId) {
        self.txn_map.write().remove(&txn_id);
    }

    pub fn active_txn_count(&self) -> usize {
        self.txn_map.read().len()
    }

    /// Reject new transactions; called ahead of WAL shutdown.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
