use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex, RwLock};
use crate::analysis::analyzer::AnalyzerRegistry;
use crate::catalog::catalog::Catalog;
use crate::catalog::delta::{CatalogDeltaEntry, DeltaOp};
use crate::catalog::entry::ConflictType;
use crate::catalog::index::IndexDef;
use crate::catalog::segment::SegmentStatus;
use crate::catalog::table::TableEntry;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    ColumnId, DataBlock, DataType, RowId, SegmentId, TableDef, Ts, TxnId, Value,
};
use crate::index::reader_cache::IndexReader;
use crate::storage::buffer::BufferManager;
use crate::txn::store::{
    build_sealed_segment, build_segment_fulltext_index, CompactState, StagedImport, StagedIndex,
    TxnStore,
};
use crate::wal::entry::{WalCmd, WalEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committing,
    Committed,
    Rollback,
}

/// A single read-write transaction.
///
/// Reads resolve against the `begin_ts` snapshot; writes are buffered in
/// the per-transaction store and become durable through the WAL manager.
pub struct Txn {
    pub txn_id: TxnId,
    pub begin_ts: Ts,
    state: RwLock<TxnState>,
    commit_ts: AtomicU64,
    pub(crate) store: Mutex<TxnStore>,
    checkpoint_cmd: Mutex<Option<WalCmd>>,
    pending_delta: Mutex<Vec<DeltaOp>>,
    catalog: Arc<Catalog>,
    buffer: Arc<BufferManager>,
    registry: Arc<AnalyzerRegistry>,
    done: Mutex<Option<std::result::Result<(), Error>>>,
    done_cv: Condvar,
}

impl Txn {
    pub fn new(
        txn_id: TxnId,
        begin_ts: Ts,
        catalog: Arc<Catalog>,
        buffer: Arc<BufferManager>,
        registry: Arc<AnalyzerRegistry>,
    ) -> Self {
        Txn {
            txn_id,
            begin_ts,
            state: RwLock::new(TxnState::Active),
            commit_ts: AtomicU64::new(0),
            store: Mutex::new(TxnStore::default()),
            checkpoint_cmd: Mutex::new(None),
            pending_delta: Mutex::new(Vec::new()),
            catalog,
            buffer,
            registry,
            done: Mutex::new(None),
            done_cv: Condvar::new(),
        }
    }

    pub fn state(&self) -> TxnState {
        *self.state.read()
    }

    pub fn commit_ts(&self) -> Ts {
        self.commit_ts.load(Ordering::Acquire)
    }

    fn check_active(&self) -> Result<()> {
        if self.state() != TxnState::Active {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("txn {} is not active", self.txn_id),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DDL
    // ------------------------------------------------------------------

    pub fn create_database(&self, name: &str, conflict: ConflictType) -> Result<()> {
        self.check_active()?;
        if let Some(entry) =
            self.catalog
                .stage_create_database(name, self.txn_id, self.begin_ts, conflict)?
        {
            self.store.lock().created_dbs.push(entry);
        }
        Ok(())
    }

    pub fn drop_database(&self, name: &str, conflict: ConflictType) -> Result<()> {
        self.check_active()?;
        if let Some(entry) =
            self.catalog
                .stage_drop_database(name, self.txn_id, self.begin_ts, conflict)?
        {
            self.store.lock().dropped_dbs.push(entry);
        }
        Ok(())
    }

    pub fn create_table(
        &self,
        db_name: &str,
        def: TableDef,
        conflict: ConflictType,
    ) -> Result<()> {
        self.check_active()?;
        if def.columns.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("table {} has no columns", def.name),
            ));
        }
        for (pos, column) in def.columns.iter().enumerate() {
            if column.id as usize != pos {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("column {} id {} does not match position {}", column.name, column.id, pos),
                ));
            }
        }
        let db = self
            .catalog
            .get_database(db_name, self.begin_ts, self.txn_id)?;
        let dir_tail = def.name.clone();
        let entry = Arc::new(TableEntry::new(
            &db.dir,
            def,
            dir_tail,
            self.txn_id,
            self.begin_ts,
            self.catalog.session_memory_limit,
        ));
        if let Some(entry) = db.stage_table(entry, self.begin_ts, self.txn_id, conflict)? {
            self.store
                .lock()
                .created_tables
                .push((db_name.to_string(), entry));
        }
        Ok(())
    }

    pub fn drop_table(&self, db_name: &str, table_name: &str, conflict: ConflictType) -> Result<()> {
        self.check_active()?;
        let db = self
            .catalog
            .get_database(db_name, self.begin_ts, self.txn_id)?;
        let entry = Arc::new(TableEntry::new_dropped(
            table_name,
            self.txn_id,
            self.begin_ts,
            self.catalog.session_memory_limit,
        ));
        if let Some(entry) = db.stage_table(entry, self.begin_ts, self.txn_id, conflict)? {
            self.store
                .lock()
                .dropped_tables
                .push((db_name.to_string(), entry));
        }
        Ok(())
    }

    pub fn create_index(
        &self,
        db_name: &str,
        table_name: &str,
        def: IndexDef,
        conflict: ConflictType,
    ) -> Result<()> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;
        let Some(column_id) = table.column_id_by_name(&def.column_name) else {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("column {} not found in {}", def.column_name, table_name),
            ));
        };
        let column = &table.def.columns[column_id as usize];
        if column.dtype != DataType::Varchar {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("full-text index requires a varchar column, {} is {:?}", column.name, column.dtype),
            ));
        }
        let analyzer = self.registry.get(def.analyzer())?;

        let dir_tail = def.name.clone();
        let entry = Arc::new(crate::catalog::index::TableIndexEntry::new(
            &table.dir,
            def,
            dir_tail,
            self.txn_id,
            self.begin_ts,
        ));
        let Some(entry) = table.stage_index(entry, self.begin_ts, self.txn_id, conflict)? else {
            return Ok(());
        };

        // index the segments visible at the snapshot, plus this
        // transaction's own staged imports
        let mut segment_indexes = Vec::new();
        for segment in table.visible_segments(self.begin_ts, self.txn_id) {
            let segment_index =
                build_segment_fulltext_index(&segment, &entry, column_id, &analyzer, &self.buffer)?;
            entry.install_segment_index(segment_index.clone());
            segment_indexes.push(segment_index);
        }
        {
            let mut store = self.store.lock();
            let table_store = store.table_store(db_name, table.clone());
            for import in &table_store.imports {
                let segment_index = build_segment_fulltext_index(
                    &import.segment,
                    &entry,
                    column_id,
                    &analyzer,
                    &self.buffer,
                )?;
                entry.install_segment_index(segment_index.clone());
                segment_indexes.push(segment_index);
            }
            table_store
                .created_indexes
                .push(StagedIndex { entry, segment_indexes });
        }
        Ok(())
    }

    pub fn drop_index(
        &self,
        db_name: &str,
        table_name: &str,
        index_name: &str,
        conflict: ConflictType,
    ) -> Result<()> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;
        let marker = Arc::new(crate::catalog::index::TableIndexEntry::new_dropped(
            index_name,
            self.txn_id,
            self.begin_ts,
        ));
        if let Some(marker) = table.stage_index(marker, self.begin_ts, self.txn_id, conflict)? {
            self.store
                .lock()
                .table_store(db_name, table.clone())
                .dropped_indexes
                .push((index_name.to_string(), marker));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // DML
    // ------------------------------------------------------------------

    pub fn append(&self, db_name: &str, table_name: &str, block: DataBlock) -> Result<()> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;
        if block.column_count() != table.def.column_count() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "append has {} columns, table {} has {}",
                    block.column_count(),
                    table_name,
                    table.def.column_count()
                ),
            ));
        }
        if block.row_count == 0 {
            return Ok(());
        }
        self.store
            .lock()
            .table_store(db_name, table)
            .appends
            .push(block);
        Ok(())
    }

    pub fn delete(&self, db_name: &str, table_name: &str, row_ids: Vec<RowId>) -> Result<()> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;
        if row_ids.is_empty() {
            return Ok(());
        }
        self.store
            .lock()
            .table_store(db_name, table)
            .delete_rows
            .extend(row_ids);
        Ok(())
    }

    /// Bulk-load a sealed segment from prepared batches. The external
    /// loader drives this; data files are written immediately, the catalog
    /// entry stays private until commit.
    pub fn import(
        &self,
        db_name: &str,
        table_name: &str,
        blocks: Vec<DataBlock>,
    ) -> Result<SegmentId> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;
        let (segment, rows) =
            build_sealed_segment(&table, &blocks, self.txn_id, self.begin_ts, &self.buffer)?;
        let segment_id = segment.segment_id;

        let mut segment_indexes = Vec::new();
        for (index_name, chain) in table.index_meta_snapshot() {
            let Ok(index_entry) = chain.get(self.begin_ts, self.txn_id, &index_name) else {
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
                &segment,
                &index_entry,
                column_id,
                &analyzer,
                &self.buffer,
            )?;
            segment_indexes.push((index_name, segment_index));
        }

        self.store
            .lock()
            .table_store(db_name, table)
            .imports
            .push(StagedImport { segment, rows, segment_indexes });
        Ok(segment_id)
    }

    /// Merge sealed segments into one replacement segment, deprecating the
    /// originals at commit. `segment_ids = None` compacts every sealed
    /// segment visible at the snapshot.
    pub fn compact(
        &self,
        db_name: &str,
        table_name: &str,
        segment_ids: Option<Vec<SegmentId>>,
    ) -> Result<()> {
        self.check_active()?;
        let table = self.table(db_name, table_name)?;

        let deprecated: Vec<_> = match segment_ids {
            Some(ids) => {
                let mut segments = Vec::with_capacity(ids.len());
                for id in ids {
                    let segment = table.get_segment(id).ok_or_else(|| {
                        Error::not_found(format!("segment {} of {}", id, table_name))
                    })?;
                    segments.push(segment);
                }
                segments
            }
            None => table
                .visible_segments(self.begin_ts, self.txn_id)
                .into_iter()
                .filter(|s| s.status() == SegmentStatus::Sealed)
                .collect(),
        };
        if deprecated.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("no sealed segments to compact in {}", table_name),
            ));
        }

        // claim the segments; only sealed ones may enter compaction
        for (pos, segment) in deprecated.iter().enumerate() {
            if !segment.try_set_compacting() {
                for claimed in &deprecated[..pos] {
                    claimed.rollback_compacting();
                }
                return Err(Error::new(
                    ErrorKind::TxnConflict,
                    format!(
                        "segment {} is {:?}, not Sealed",
                        segment.segment_id,
                        segment.status()
                    ),
                ));
            }
        }

        // merge surviving rows, in segment id then offset order
        let column_count = table.def.column_count();
        let mut merged = DataBlock::new(column_count);
        let mut merged_columns: Vec<Vec<Value>> = vec![Vec::new(); column_count];
        for segment in &deprecated {
            for (column_id, merged_column) in merged_columns.iter_mut().enumerate() {
                let values = segment.scan_column(
                    column_id as ColumnId,
                    self.begin_ts,
                    self.txn_id,
                    &self.buffer,
                )?;
                merged_column.extend(values.into_iter().map(|(_, v)| v));
            }
        }
        merged.row_count = merged_columns.first().map(|c| c.len()).unwrap_or(0);
        merged.columns = merged_columns;

        let (new_segment, new_rows) = build_sealed_segment(
            &table,
            std::slice::from_ref(&merged),
            self.txn_id,
            self.begin_ts,
            &self.buffer,
        )?;

        let mut new_segment_indexes = Vec::new();
        for (index_name, chain) in table.index_meta_snapshot() {
            let Ok(index_entry) = chain.get(self.begin_ts, self.txn_id, &index_name) else {
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
                &new_segment,
                &index_entry,
                column_id,
                &analyzer,
                &self.buffer,
            )?;
            new_segment_indexes.push((index_name, segment_index));
        }

        self.store.lock().table_store(db_name, table).compact = Some(CompactState {
            new_segments: vec![new_segment],
            new_rows,
            deprecated,
            new_segment_indexes,
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------

    pub fn table(&self, db_name: &str, table_name: &str) -> Result<Arc<TableEntry>> {
        self.catalog
            .get_table(db_name, table_name, self.begin_ts, self.txn_id)
    }

    pub fn row_count(&self, db_name: &str, table_name: &str) -> Result<u64> {
        Ok(self
            .table(db_name, table_name)?
            .visible_row_count(self.begin_ts, self.txn_id))
    }

    pub fn scan_column(
        &self,
        db_name: &str,
        table_name: &str,
        column_name: &str,
    ) -> Result<Vec<(RowId, Value)>> {
        let table = self.table(db_name, table_name)?;
        let column_id = table.column_id_by_name(column_name).ok_or_else(|| {
            Error::not_found(format!("column {} of {}", column_name, table_name))
        })?;
        table.scan_column(column_id, self.begin_ts, self.txn_id, &self.buffer)
    }

    pub fn get_index_reader(&self, db_name: &str, table_name: &str) -> Result<IndexReader> {
        let table = self.table(db_name, table_name)?;
        table.get_index_reader(self.txn_id, self.begin_ts)
    }

    /// Analyze a query string with the analyzer bound to the column and
    /// rank matching rows by BM25.
    pub fn fulltext_match(
        &self,
        db_name: &str,
        table_name: &str,
        column_name: &str,
        query: &str,
        topn: usize,
    ) -> Result<Vec<(RowId, f32)>> {
        let table = self.table(db_name, table_name)?;
        let column_id = table.column_id_by_name(column_name).ok_or_else(|| {
            Error::not_found(format!("column {} of {}", column_name, table_name))
        })?;
        let reader = table.get_index_reader(self.txn_id, self.begin_ts)?;
        let analyzer_name = reader
            .column2analyzer
            .get(column_name)
            .cloned()
            .unwrap_or_else(|| "standard".to_string());
        let analyzer = self.registry.get(&analyzer_name)?;
        let terms: Vec<String> = analyzer
            .analyze(query)
            .into_iter()
            .map(|t| t.text)
            .collect();
        reader.search(column_id, &terms, topn)
    }

    // ------------------------------------------------------------------
    // commit protocol
    // ------------------------------------------------------------------

    pub(crate) fn set_checkpoint_cmd(&self, max_commit_ts: Ts, is_full: bool, catalog_path: String) {
        *self.checkpoint_cmd.lock() = Some(WalCmd::Checkpoint {
            max_commit_ts,
            is_full,
            catalog_path,
        });
    }

    pub(crate) fn is_read_only(&self) -> bool {
        self.store.lock().is_empty() && self.checkpoint_cmd.lock().is_none()
    }

    /// Write-phase: materialize buffered work and build the WAL entry with
    /// the tentative commit timestamp. Catalog versions stay uncommitted
    /// until `commit_bottom`.
    pub(crate) fn prepare_commit(&self, commit_ts: Ts) -> Result<WalEntry> {
        *self.state.write() = TxnState::Committing;
        self.commit_ts.store(commit_ts, Ordering::Release);

        let (mut cmds, ops) = self.store.lock().prepare_commit(
            self.txn_id,
            self.begin_ts,
            commit_ts,
            &self.buffer,
        )?;
        if let Some(cmd) = self.checkpoint_cmd.lock().take() {
            cmds.push(cmd);
        }
        *self.pending_delta.lock() = ops;
        Ok(WalEntry::new(self.txn_id, commit_ts, cmds))
    }

    /// Finalization, called by the WAL flush thread after the entry is
    /// durable, in WAL order.
    pub(crate) fn commit_bottom(&self) {
        let commit_ts = self.commit_ts();
        self.store
            .lock()
            .commit_bottom(self.txn_id, commit_ts, &self.registry);

        let ops = std::mem::take(&mut *self.pending_delta.lock());
        if !ops.is_empty() {
            self.catalog.append_delta_entry(CatalogDeltaEntry {
                txn_id: self.txn_id,
                commit_ts,
                ops,
            });
        }

        *self.state.write() = TxnState::Committed;
        let mut done = self.done.lock();
        *done = Some(Ok(()));
        self.done_cv.notify_all();
    }

    /// Failure path from the flush thread: the entry never became durable.
    pub(crate) fn commit_failed(&self, err: Error) {
        let mut done = self.done.lock();
        *done = Some(Err(err));
        self.done_cv.notify_all();
    }

    pub(crate) fn wait_done(&self) -> Result<()> {
        let mut done = self.done.lock();
        while done.is_none() {
            self.done_cv.wait(&mut done);
        }
        done.take().unwrap()
    }

    pub(crate) fn rollback_inner(&self) {
        self.store.lock().rollback(self.txn_id, &self.catalog);
        *self.state.write() = TxnState::Rollback;
    }

    /// Replay path: run prepare + finalize with the commit timestamp from
    /// the log, bypassing the WAL.
    pub(crate) fn replay_commit(&self, commit_ts: Ts) -> Result<()> {
        let _entry = self.prepare_commit(commit_ts)?;
        self.commit_bottom();
        Ok(())
    }
}
