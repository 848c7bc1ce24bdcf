use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::catalog::catalog::Catalog;
use crate::catalog::delta::{CatalogDeltaEntry, DeltaOp};
use crate::catalog::segment::SegmentEntry;
use crate::core::config::{Config, FlushOption};
use crate::core::error::{fatal, Result};
use crate::core::types::{Ts, TxnId, UNCOMMITTED};
use crate::storage::buffer::BufferManager;
use crate::storage::layout::StorageLayout;
use crate::txn::manager::TxnManager;
use crate::txn::store::build_segment_fulltext_index;
use crate::txn::transaction::Txn;
use crate::wal::entry::{WalCmd, WalEntry};
use crate::wal::log_file::{
    self, parse_wal_filenames, recycle_catalog_files, recycle_wal_files, select_catalog_files,
    WAL_FILENAME,
};

enum FlushMsg {
    Entry(Arc<WalEntry>, Arc<Txn>),
    Shutdown,
}

enum CheckpointMsg {
    Run { is_full: bool },
    Shutdown,
}

/// Persists every mutating transaction, drives checkpointing, and replays
/// logs into the catalog during recovery.
///
/// A single flush thread is the sole WAL writer; transactions block on it
/// until their entry is durable and their `commit_bottom` has run, in WAL
/// order.
pub struct WalManager {
    wal_dir: PathBuf,
    wal_path: PathBuf,
    catalog_dir: PathBuf,
    cfg_wal_size_threshold: u64,
    cfg_delta_ckp_interval: u64,
    flush_option: FlushOption,

    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    registry: Arc<AnalyzerRegistry>,
    txn_mgr: RwLock<Option<Arc<TxnManager>>>,

    queue_tx: Sender<FlushMsg>,
    queue_rx: Receiver<FlushMsg>,
    ckp_tx: Sender<CheckpointMsg>,
    ckp_rx: Receiver<CheckpointMsg>,

    running: AtomicBool,
    checkpoint_in_progress: AtomicBool,
    max_commit_ts: AtomicU64,
    wal_size: AtomicU64,
    last_ckp_ts: AtomicU64,
    last_full_ckp_ts: AtomicU64,
    last_ckp_wal_size: Mutex<u64>,

    flush_handle: Mutex<Option<JoinHandle<()>>>,
    ckp_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WalManager {
    pub fn new(
        config: &Config,
        layout: &StorageLayout,
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        registry: Arc<AnalyzerRegistry>,
    ) -> Self {
        let (queue_tx, queue_rx) = unbounded();
        let (ckp_tx, ckp_rx) = unbounded();
        WalManager {
            wal_dir: layout.wal_dir.clone(),
            wal_path: layout.wal_dir.join(WAL_FILENAME),
            catalog_dir: layout.catalog_dir.clone(),
            cfg_wal_size_threshold: config.wal_size_threshold,
            cfg_delta_ckp_interval: config.delta_checkpoint_interval_wal_bytes,
            flush_option: config.flush_option,
            catalog,
            buffer,
            registry,
            txn_mgr: RwLock::new(None),
            queue_tx,
            queue_rx,
            ckp_tx,
            ckp_rx,
            running: AtomicBool::new(false),
            checkpoint_in_progress: AtomicBool::new(false),
            max_commit_ts: AtomicU64::new(0),
            wal_size: AtomicU64::new(0),
            last_ckp_ts: AtomicU64::new(UNCOMMITTED),
            last_full_ckp_ts: AtomicU64::new(UNCOMMITTED),
            last_ckp_wal_size: Mutex::new(0),
            flush_handle: Mutex::new(None),
            ckp_handle: Mutex::new(None),
        }
    }

    pub fn set_txn_manager(&self, txn_mgr: Arc<TxnManager>) {
        *self.txn_mgr.write() = Some(txn_mgr);
    }

    pub fn max_commit_ts(&self) -> Ts {
        self.max_commit_ts.load(Ordering::Acquire)
    }

    pub fn wal_size(&self) -> u64 {
        self.wal_size.load(Ordering::Acquire)
    }

    pub fn last_ckp_ts(&self) -> Ts {
        self.last_ckp_ts.load(Ordering::Acquire)
    }

    pub fn last_full_ckp_ts(&self) -> Ts {
        self.last_full_ckp_ts.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------

    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("WAL manager is starting");
        fs::create_dir_all(&self.wal_dir)?;
        let existing = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        self.wal_size.store(existing, Ordering::Release);

        let flusher = self.clone();
        *self.flush_handle.lock() = Some(std::thread::spawn(move || flusher.flush_loop()));
        let checkpointer = self.clone();
        *self.ckp_handle.lock() = Some(std::thread::spawn(move || checkpointer.checkpoint_loop()));
        info!(path = %self.wal_path.display(), "WAL manager started");
        Ok(())
    }

    /// Idempotent shutdown: stop admitting transactions, drain the flush
    /// queue through a sentinel, join both background threads.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("WAL manager already stopped");
            return;
        }
        info!("WAL manager is stopping");
        if let Some(txn_mgr) = self.txn_mgr.read().clone() {
            txn_mgr.stop();
        }
        // the checkpoint worker may still need the flusher; join it first
        let _ = self.ckp_tx.send(CheckpointMsg::Shutdown);
        if let Some(handle) = self.ckp_handle.lock().take() {
            let _ = handle.join();
        }
        let _ = self.queue_tx.send(FlushMsg::Shutdown);
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }
        info!("WAL manager stopped");
    }

    /// Session request to persist an entry. The transaction id and commit
    /// timestamp of the entry are already assigned.
    pub fn put_entry(&self, entry: Arc<WalEntry>, txn: Arc<Txn>) {
        if !self.running.load(Ordering::Acquire) {
            txn.commit_failed(crate::core::error::Error::new(
                crate::core::error::ErrorKind::InvalidState,
                "WAL manager is not running".to_string(),
            ));
            return;
        }
        let _ = self.queue_tx.send(FlushMsg::Entry(entry, txn));
    }

    // ------------------------------------------------------------------
    // flush thread
    // ------------------------------------------------------------------

    fn flush_loop(self: Arc<Self>) {
        trace!("WAL flush mainloop begin");
        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
        {
            Ok(file) => file,
            Err(err) => fatal(&format!("failed to open wal file: {}", err)),
        };
        let mut last_sync = Instant::now();

        loop {
            let first = match self.queue_rx.recv() {
                Ok(msg) => msg,
                Err(_) => break,
            };
            let mut batch = vec![first];
            while let Ok(msg) = self.queue_rx.try_recv() {
                batch.push(msg);
            }

            let mut committed: Vec<Arc<Txn>> = Vec::new();
            let mut shutdown = false;
            for msg in batch {
                match msg {
                    FlushMsg::Shutdown => {
                        // finish the rest of the batch, then exit
                        shutdown = true;
                    }
                    FlushMsg::Entry(entry, txn) => {
                        if entry.cmds.is_empty() {
                            fatal(&format!("WalEntry of txn {} has no commands", entry.txn_id));
                        }
                        // size prediction mismatch inside serialize is fatal
                        let bytes = match entry.serialize() {
                            Ok(bytes) => bytes,
                            Err(err) => fatal(&err.to_string()),
                        };
                        match file.write_all(&bytes) {
                            Ok(()) => {
                                trace!(
                                    txn_id = entry.txn_id,
                                    commit_ts = entry.commit_ts,
                                    "wal entry written"
                                );
                                self.max_commit_ts.store(entry.commit_ts, Ordering::Release);
                                self.wal_size
                                    .fetch_add(bytes.len() as u64, Ordering::SeqCst);
                                committed.push(txn);
                            }
                            Err(err) => {
                                error!(txn_id = entry.txn_id, %err, "wal write failed");
                                txn.commit_failed(err.into());
                            }
                        }
                    }
                }
            }

            let sync_result = match self.flush_option {
                FlushOption::FlushAtOnce => file.sync_data(),
                FlushOption::FlushPerSecond => {
                    if last_sync.elapsed() >= Duration::from_secs(1) {
                        last_sync = Instant::now();
                        file.sync_data()
                    } else {
                        Ok(())
                    }
                }
                // unsafe, test-only: no fsync at all
                FlushOption::OnlyWrite => Ok(()),
            };
            if let Err(err) = sync_result {
                error!(%err, "wal fsync failed");
                for txn in committed.drain(..) {
                    txn.commit_failed(std::io::Error::new(std::io::ErrorKind::Other, "wal fsync failed").into());
                }
            }

            // commit sequentially so transactions become visible in WAL order
            for txn in &committed {
                txn.commit_bottom();
            }

            if shutdown {
                if self.flush_option != FlushOption::OnlyWrite {
                    let _ = file.sync_data();
                }
                // anything that slipped in behind the sentinel must not
                // leave its transaction waiting forever
                while let Ok(msg) = self.queue_rx.try_recv() {
                    if let FlushMsg::Entry(_, txn) = msg {
                        txn.commit_failed(crate::core::error::Error::new(
                            crate::core::error::ErrorKind::InvalidState,
                            "WAL manager shut down".to_string(),
                        ));
                    }
                }
                break;
            }

            // rotate when the active log grows past the threshold
            match fs::metadata(&self.wal_path) {
                Ok(meta) if meta.len() > self.cfg_wal_size_threshold => {
                    match self.swap_wal_file() {
                        Ok(new_file) => file = new_file,
                        Err(err) => error!(%err, "wal rotation failed"),
                    }
                }
                _ => {}
            }

            // delta checkpoint trigger by WAL growth
            let last_ckp_wal_size = *self.last_ckp_wal_size.lock();
            if self.wal_size() - last_ckp_wal_size > self.cfg_delta_ckp_interval {
                trace!("WAL growth triggers a delta checkpoint");
                if !self.try_submit_checkpoint(false) {
                    trace!("skip delta checkpoint, another checkpoint is running");
                }
            }
        }
        trace!("WAL flush mainloop end");
    }

    fn swap_wal_file(&self) -> Result<File> {
        let max_commit_ts = self.max_commit_ts();
        let new_path = self.wal_dir.join(log_file::wal_filename(max_commit_ts));
        info!(from = %self.wal_path.display(), to = %new_path.display(), "wal swap");
        fs::rename(&self.wal_path, &new_path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)?;
        Ok(file)
    }

    // ------------------------------------------------------------------
    // checkpoints
    // ------------------------------------------------------------------

    /// Submit a checkpoint to the worker unless one is already running.
    pub fn try_submit_checkpoint(&self, is_full: bool) -> bool {
        if self
            .checkpoint_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.ckp_tx.send(CheckpointMsg::Run { is_full });
            true
        } else {
            false
        }
    }

    /// Run a checkpoint on the calling thread, waiting out any checkpoint
    /// already in progress.
    pub fn checkpoint_now(&self, is_full: bool) {
        while self
            .checkpoint_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            std::thread::yield_now();
        }
        self.checkpoint_inner(is_full);
        self.checkpoint_in_progress.store(false, Ordering::Release);
    }

    fn checkpoint_loop(self: Arc<Self>) {
        loop {
            match self.ckp_rx.recv() {
                Ok(CheckpointMsg::Run { is_full }) => {
                    self.checkpoint_inner(is_full);
                    self.checkpoint_in_progress.store(false, Ordering::Release);
                }
                Ok(CheckpointMsg::Shutdown) | Err(_) => break,
            }
        }
    }

    fn checkpoint_inner(&self, is_full: bool) {
        let max_commit_ts = self.max_commit_ts();
        let wal_size = self.wal_size();
        let last_ckp_ts = self.last_ckp_ts();
        let last_full_ckp_ts = self.last_full_ckp_ts();

        if is_full {
            if last_full_ckp_ts != UNCOMMITTED && max_commit_ts == last_full_ckp_ts {
                trace!(max_commit_ts, "skip full checkpoint, nothing new");
                return;
            }
            if last_full_ckp_ts != UNCOMMITTED && last_full_ckp_ts >= max_commit_ts {
                fatal(&format!(
                    "full checkpoint regression: last_full_ckp_ts {} >= max_commit_ts {}",
                    last_full_ckp_ts, max_commit_ts
                ));
            }
            if last_ckp_ts != UNCOMMITTED && last_ckp_ts > max_commit_ts {
                fatal(&format!(
                    "checkpoint regression: last_ckp_ts {} > max_commit_ts {}",
                    last_ckp_ts, max_commit_ts
                ));
            }
        } else {
            if last_ckp_ts != UNCOMMITTED && max_commit_ts == last_ckp_ts {
                trace!(max_commit_ts, "skip delta checkpoint, nothing new");
                return;
            }
            if last_ckp_ts != UNCOMMITTED && last_ckp_ts >= max_commit_ts {
                fatal(&format!(
                    "checkpoint regression: last_ckp_ts {} >= max_commit_ts {}",
                    last_ckp_ts, max_commit_ts
                ));
            }
        }

        let Some(txn_mgr) = self.txn_mgr.read().clone() else {
            warn!("checkpoint without a transaction manager");
            return;
        };
        let txn = match txn_mgr.begin() {
            Ok(txn) => txn,
            Err(err) => {
                warn!(%err, "checkpoint txn begin failed");
                return;
            }
        };
        info!(
            kind = if is_full { "FULL" } else { "DELTA" },
            txn_id = txn.txn_id,
            begin_ts = txn.begin_ts,
            max_commit_ts,
            "checkpoint begin"
        );

        // make in-memory postings durable before serializing the catalog
        self.dump_memory_indexers(txn.txn_id, max_commit_ts);

        let catalog_path = if is_full {
            self.catalog_dir
                .join(log_file::full_catalog_filename(max_commit_ts))
        } else {
            self.catalog_dir
                .join(log_file::delta_catalog_filename(max_commit_ts))
        };
        let write_result = if is_full {
            self.catalog.save_full(&catalog_path, max_commit_ts)
        } else {
            let entries = self.catalog.take_delta_entries_upto(max_commit_ts);
            Catalog::save_delta(&catalog_path, &entries)
        };
        if let Err(err) = write_result {
            error!(%err, "checkpoint catalog write failed");
            let _ = txn_mgr.rollback(&txn);
            return;
        }

        txn.set_checkpoint_cmd(
            max_commit_ts,
            is_full,
            catalog_path.to_string_lossy().to_string(),
        );
        if let Err(err) = txn_mgr.commit(&txn) {
            error!(%err, "checkpoint commit failed");
            return;
        }

        self.last_ckp_ts.store(max_commit_ts, Ordering::Release);
        *self.last_ckp_wal_size.lock() = wal_size;
        if is_full {
            self.last_full_ckp_ts.store(max_commit_ts, Ordering::Release);
            self.catalog.discard_delta_entries_upto(max_commit_ts);
            if let Err(err) = recycle_wal_files(&self.wal_dir, max_commit_ts) {
                warn!(%err, "wal recycling failed");
            }
            if let Err(err) = recycle_catalog_files(&self.catalog_dir, max_commit_ts) {
                warn!(%err, "catalog recycling failed");
            }
        }
        info!(
            kind = if is_full { "FULL" } else { "DELTA" },
            max_commit_ts,
            "checkpoint done"
        );
    }

    /// Flush every non-empty in-memory indexer to an on-disk posting base
    /// and record the change in the delta-op stream, so indexed rows
    /// survive recovery without their WAL entries.
    fn dump_memory_indexers(&self, txn_id: TxnId, max_commit_ts: Ts) {
        let mut ops: Vec<DeltaOp> = Vec::new();
        for (db_name, db_chain) in self.catalog.db_chains_snapshot() {
            let Some(db) = db_chain.committed_at(max_commit_ts) else {
                continue;
            };
            if db.version.deleted {
                continue;
            }
            for (table_name, table_chain) in db.table_chains_snapshot() {
                let Some(table) = table_chain.committed_at(max_commit_ts) else {
                    continue;
                };
                if table.version.deleted {
                    continue;
                }
                for (index_name, index_chain) in table.index_meta_snapshot() {
                    let Some(index_entry) = index_chain.committed_at(max_commit_ts) else {
                        continue;
                    };
                    if index_entry.version.deleted || !index_entry.def.is_fulltext() {
                        continue;
                    }
                    let mut dumped = false;
                    for (_, segment_index) in index_entry.index_by_segment_snapshot() {
                        match segment_index.dump_memory_indexer(&index_entry.dir) {
                            Ok(Some(_)) => {
                                dumped = true;
                                let (bases, _) = segment_index.fulltext_snapshot();
                                let (len_sum, len_count) = segment_index.column_len_info();
                                ops.push(DeltaOp::SetSegmentIndex {
                                    db_name: db_name.clone(),
                                    table_name: table_name.clone(),
                                    index_name: index_name.clone(),
                                    segment_id: segment_index.segment_id,
                                    bases,
                                    column_len_sum: len_sum,
                                    column_len_count: len_count,
                                    update_ts: max_commit_ts,
                                });
                            }
                            Ok(None) => {}
                            Err(err) => {
                                error!(%err, index = %index_name, "memory indexer dump failed");
                            }
                        }
                    }
                    if dumped {
                        table
                            .index_reader_cache
                            .refresh_update_window(max_commit_ts, index_entry.update_ts_cell());
                    }
                }
            }
        }
        if !ops.is_empty() {
            self.catalog.append_delta_entry(CatalogDeltaEntry {
                txn_id,
                commit_ts: max_commit_ts,
                ops,
            });
        }
    }

    // ------------------------------------------------------------------
    // recovery
    // ------------------------------------------------------------------

    /// Replay the WAL directory into the catalog.
    ///
    /// Phase 1 walks entries newest-to-oldest until the first Checkpoint
    /// command; phase 2 keeps collecting older entries still above the
    /// checkpoint's max commit timestamp; phase 3 replays the collected
    /// entries in ascending commit order over the attached catalog files.
    ///
    /// Returns `None` for an empty WAL directory (fresh start), otherwise
    /// the system start timestamp.
    pub fn replay(&self) -> Result<Option<Ts>> {
        let (active, mut rolled) = parse_wal_filenames(&self.wal_dir)?;
        rolled.sort_by(|a, b| b.max_commit_ts.cmp(&a.max_commit_ts));

        let mut wal_list: Vec<(PathBuf, bool)> = Vec::new();
        if let Some(active) = active {
            wal_list.push((active, true));
        }
        for file in &rolled {
            wal_list.push((file.path.clone(), false));
        }
        if wal_list.is_empty() {
            info!("no wal files, initializing a fresh catalog");
            return Ok(None);
        }
        for (path, _) in &wal_list {
            info!(path = %path.display(), "found wal file");
        }

        let mut iterator = WalListIterator::new(wal_list)?;

        // phase 1: locate the newest checkpoint
        info!("replay phase 1: locate the checkpoint");
        let mut replay_entries: Vec<WalEntry> = Vec::new();
        let mut checkpoint: Option<(Ts, String)> = None;
        let mut system_start_ts = 0;
        while let Some(entry) = iterator.next() {
            if let Some(WalCmd::Checkpoint { max_commit_ts, catalog_path, .. }) =
                entry.checkpoint_cmd()
            {
                checkpoint = Some((*max_commit_ts, catalog_path.clone()));
                system_start_ts = entry.commit_ts;
                break;
            }
            replay_entries.push(entry);
        }
        let Some((ckp_max_commit_ts, ckp_catalog_path)) = checkpoint else {
            // once the wal is non-empty, a checkpoint must exist
            fatal("no checkpoint found in wal");
        };
        info!(ckp_max_commit_ts, "checkpoint found");

        // phase 2: drain older entries still above the checkpoint
        info!("replay phase 2: collect entries above the checkpoint");
        while let Some(entry) = iterator.next() {
            if entry.commit_ts > ckp_max_commit_ts {
                replay_entries.push(entry);
            } else {
                break;
            }
        }

        // attach the catalog snapshot plus deltas
        let catalog_dir = Path::new(&ckp_catalog_path)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| self.catalog_dir.clone());
        let Some((full, deltas)) = select_catalog_files(&catalog_dir, ckp_max_commit_ts)? else {
            fatal(&format!(
                "no catalog snapshot covering commit_ts {} under {}",
                ckp_max_commit_ts,
                catalog_dir.display()
            ));
        };
        self.catalog.load_full(&full.path)?;
        for delta in &deltas {
            self.catalog.load_delta(&delta.path)?;
        }

        // phase 3: replay in ascending commit order
        info!(entries = replay_entries.len(), "replay phase 3: apply entries");
        replay_entries.reverse();
        let mut last_txn_id: TxnId = 0;
        for entry in &replay_entries {
            if entry.commit_ts < ckp_max_commit_ts {
                fatal("replay entry commit_ts below checkpoint max commit_ts");
            }
            self.replay_entry(entry)?;
            system_start_ts = entry.commit_ts;
            last_txn_id = entry.txn_id;
            debug!(txn_id = entry.txn_id, commit_ts = entry.commit_ts, "entry replayed");
        }

        let _ = self
            .catalog
            .next_txn_id
            .fetch_max(last_txn_id + 1, Ordering::SeqCst);
        self.max_commit_ts.store(system_start_ts, Ordering::Release);
        self.last_ckp_ts.store(ckp_max_commit_ts, Ordering::Release);
        self.last_full_ckp_ts.store(full.commit_ts, Ordering::Release);
        info!(system_start_ts, "wal replay finished");
        Ok(Some(system_start_ts))
    }

    fn replay_entry(&self, entry: &WalEntry) -> Result<()> {
        for cmd in &entry.cmds {
            trace!(commit_ts = entry.commit_ts, ?cmd, "replay wal cmd");
            self.replay_cmd(cmd, entry.txn_id, entry.commit_ts)?;
        }
        Ok(())
    }

    fn replay_cmd(&self, cmd: &WalCmd, txn_id: TxnId, commit_ts: Ts) -> Result<()> {
        match cmd {
            WalCmd::CreateDatabase { db_name, db_dir_tail } => {
                self.catalog
                    .create_database_replay(db_name, db_dir_tail, txn_id, commit_ts);
            }
            WalCmd::DropDatabase { db_name } => {
                self.catalog.drop_database_replay(db_name, txn_id, commit_ts);
            }
            WalCmd::CreateTable { db_name, table_dir_tail, def } => {
                self.catalog.create_table_replay(
                    db_name,
                    def.clone(),
                    table_dir_tail,
                    txn_id,
                    commit_ts,
                );
            }
            WalCmd::DropTable { db_name, table_name } => {
                self.catalog
                    .drop_table_replay(db_name, table_name, txn_id, commit_ts);
            }
            WalCmd::CreateIndex { db_name, table_name, index_dir_tail, def } => {
                let index_entry = self.catalog.create_index_replay(
                    db_name,
                    table_name,
                    def.clone(),
                    index_dir_tail,
                    txn_id,
                    commit_ts,
                );
                // rebuild the per-segment indexes the original commit built
                let table = self
                    .catalog
                    .get_table_replay(db_name, table_name, commit_ts, txn_id);
                if let Some(column_id) = table.column_id_by_name(&index_entry.def.column_name) {
                    let analyzer = self.registry.get(index_entry.def.analyzer())?;
                    for segment in table.visible_segments(commit_ts, txn_id) {
                        let segment_index = build_segment_fulltext_index(
                            &segment,
                            &index_entry,
                            column_id,
                            &analyzer,
                            &self.buffer,
                        )?;
                        index_entry.install_segment_index(segment_index);
                    }
                }
                table
                    .index_reader_cache
                    .update_known_update_ts(commit_ts, index_entry.update_ts_cell());
            }
            WalCmd::DropIndex { db_name, table_name, index_name } => {
                self.catalog
                    .drop_index_replay(db_name, table_name, index_name, txn_id, commit_ts);
            }
            WalCmd::Import { db_name, table_name, segment_info } => {
                let table = self
                    .catalog
                    .get_table_replay(db_name, table_name, commit_ts, txn_id);
                let segment = Arc::new(SegmentEntry::new_replay(
                    &table.dir,
                    segment_info,
                    txn_id,
                    commit_ts,
                ));
                let segment = table.add_segment_replay(segment);
                table.add_row_count(segment_info.row_count);
                self.rebuild_segment_indexes(&table, &segment, txn_id, commit_ts)?;
            }
            WalCmd::Append { db_name, table_name, block } => {
                let txn = Txn::new(
                    txn_id,
                    commit_ts, // replay reads resolve at the replayed commit
                    self.catalog.clone(),
                    self.buffer.clone(),
                    self.registry.clone(),
                );
                txn.append(db_name, table_name, block.clone())?;
                txn.replay_commit(commit_ts)?;
            }
            WalCmd::Delete { db_name, table_name, row_ids } => {
                let txn = Txn::new(
                    txn_id,
                    commit_ts,
                    self.catalog.clone(),
                    self.buffer.clone(),
                    self.registry.clone(),
                );
                txn.delete(db_name, table_name, row_ids.clone())?;
                txn.replay_commit(commit_ts)?;
            }
            WalCmd::Compact { db_name, table_name, new_segment_infos, deprecated_segment_ids } => {
                let table = self
                    .catalog
                    .get_table_replay(db_name, table_name, commit_ts, txn_id);
                for info in new_segment_infos {
                    let segment =
                        Arc::new(SegmentEntry::new_replay(&table.dir, info, txn_id, commit_ts));
                    let segment = table.add_segment_replay(segment);
                    table.add_row_count(info.row_count);
                    self.rebuild_segment_indexes(&table, &segment, txn_id, commit_ts)?;
                }
                for segment_id in deprecated_segment_ids {
                    let Some(segment) = table.get_segment(*segment_id) else {
                        fatal(&format!("replay: deprecated segment {} missing", segment_id));
                    };
                    if !segment.try_set_compacting() {
                        fatal("replay: segment should be compactable");
                    }
                    segment.set_deprecated(commit_ts);
                    for (index_name, chain) in table.index_meta_snapshot() {
                        if let Ok(index_entry) = chain.get(commit_ts, txn_id, &index_name) {
                            index_entry.remove_segment_index(*segment_id);
                        }
                    }
                }
            }
            WalCmd::Checkpoint { .. } => {
                // checkpoint entries drive phase 1 only
            }
        }
        Ok(())
    }

    fn rebuild_segment_indexes(
        &self,
        table: &Arc<crate::catalog::table::TableEntry>,
        segment: &Arc<SegmentEntry>,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Result<()> {
        for (index_name, chain) in table.index_meta_snapshot() {
            let Ok(index_entry) = chain.get(commit_ts, txn_id, &index_name) else {
                continue;
            };
            if !index_entry.def.is_fulltext() {
                continue;
            }
            let Some(column_id) = table.column_id_by_name(&index_entry.def.column_name) else {
                continue;
            };
            let analyzer = self.registry.get(index_entry.def.analyzer())?;
            let segment_index = build_segment_fulltext_index(
                segment,
                &index_entry,
                column_id,
                &analyzer,
                &self.buffer,
            )?;
            index_entry.install_segment_index(segment_index);
            table
                .index_reader_cache
                .update_known_update_ts(commit_ts, index_entry.update_ts_cell());
        }
        Ok(())
    }
}

/// Iterates WAL entries newest-to-oldest across the discovered files:
/// each file's entries are parsed front-to-back, then yielded reversed,
/// active file first, rolled files in descending max commit order.
struct WalListIterator {
    // (entries of one file, reversed lazily), newest file first
    files: Vec<Vec<WalEntry>>,
    file_idx: usize,
    entry_idx: usize,
}

impl WalListIterator {
    fn new(wal_list: Vec<(PathBuf, bool)>) -> Result<Self> {
        let mut files = Vec::new();
        for (path, is_active) in wal_list {
            files.push(Self::read_file(&path, is_active)?);
        }
        Ok(WalListIterator { files, file_idx: 0, entry_idx: 0 })
    }

    fn read_file(path: &Path, is_active: bool) -> Result<Vec<WalEntry>> {
        let bytes = fs::read(path)?;
        let mut entries = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            match WalEntry::parse(&bytes[pos..]) {
                Ok(Some((entry, consumed))) => {
                    entries.push(entry);
                    pos += consumed;
                }
                Ok(None) => {
                    // torn tail: expected in the active file after a crash
                    if is_active {
                        warn!(path = %path.display(), offset = pos, "truncated wal tail ignored");
                        break;
                    }
                    fatal(&format!("rolled wal file {} is truncated", path.display()));
                }
                Err(err) => {
                    fatal(&format!("wal file {} corrupt: {}", path.display(), err));
                }
            }
        }
        Ok(entries)
    }

    /// Next entry, newest to oldest.
    fn next(&mut self) -> Option<WalEntry> {
        while self.file_idx < self.files.len() {
            let file = &self.files[self.file_idx];
            if self.entry_idx < file.len() {
                let entry = file[file.len() - 1 - self.entry_idx].clone();
                self.entry_idx += 1;
                return Some(entry);
            }
            self.file_idx += 1;
            self.entry_idx = 0;
        }
        None
    }
}
