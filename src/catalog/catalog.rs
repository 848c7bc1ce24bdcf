use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;
use crate::catalog::database::DatabaseEntry;
use crate::catalog::delta::{CatalogDeltaEntry, DeltaOp};
use crate::catalog::entry::ConflictType;
use crate::catalog::index::{IndexDef, PostingBase, SegmentIndexEntry, TableIndexEntry};
use crate::catalog::meta::EntryChain;
use crate::catalog::segment::{SegmentEntry, SegmentInfo, SegmentStatus};
use crate::catalog::table::TableEntry;
use crate::core::error::{fatal, Result};
use crate::core::types::{SegmentId, TableDef, Ts, TxnId, UNCOMMITTED};
use crate::storage::layout::StorageLayout;

/// Catalog root: version chains of databases, the transaction id allocator,
/// and the delta-op stream feeding delta checkpoints.
pub struct Catalog {
    pub layout: StorageLayout,
    pub session_memory_limit: usize,
    databases: RwLock<HashMap<String, Arc<EntryChain<DatabaseEntry>>>>,
    pub next_txn_id: AtomicU64,
    delta_entries: Mutex<Vec<CatalogDeltaEntry>>,
}

impl Catalog {
    pub fn new(layout: StorageLayout, session_memory_limit: usize) -> Self {
        Catalog {
            layout,
            session_memory_limit,
            databases: RwLock::new(HashMap::new()),
            next_txn_id: AtomicU64::new(1),
            delta_entries: Mutex::new(Vec::new()),
        }
    }

    pub fn allocate_txn_id(&self) -> TxnId {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // lookup
    // ------------------------------------------------------------------

    pub fn db_chain(&self, name: &str) -> Arc<EntryChain<DatabaseEntry>> {
        let mut databases = self.databases.write();
        databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EntryChain::new()))
            .clone()
    }

    pub fn get_database(
        &self,
        name: &str,
        snap_ts: Ts,
        viewer: TxnId,
    ) -> Result<Arc<DatabaseEntry>> {
        self.db_chain(name).get(snap_ts, viewer, name)
    }

    pub fn get_table(
        &self,
        db_name: &str,
        table_name: &str,
        snap_ts: Ts,
        viewer: TxnId,
    ) -> Result<Arc<TableEntry>> {
        self.get_database(db_name, snap_ts, viewer)?
            .get_table(table_name, snap_ts, viewer)
    }

    pub fn db_chains_snapshot(&self) -> Vec<(String, Arc<EntryChain<DatabaseEntry>>)> {
        self.databases
            .read()
            .iter()
            .map(|(name, chain)| (name.clone(), chain.clone()))
            .collect()
    }

    /// Remove every version staged by a rolled-back transaction.
    pub fn remove_uncommitted(&self, txn_id: TxnId) {
        for (_, chain) in self.db_chains_snapshot() {
            if let Some(db) = chain.first_visible(UNCOMMITTED - 1, txn_id) {
                for (_, table_chain) in db.table_chains_snapshot() {
                    if let Some(table) = table_chain.first_visible(UNCOMMITTED - 1, txn_id) {
                        table.remove_uncommitted_indexes(txn_id);
                    }
                    table_chain.remove_uncommitted(txn_id);
                }
            }
            chain.remove_uncommitted(txn_id);
        }
    }

    // ------------------------------------------------------------------
    // staged DDL (active transactions)
    // ------------------------------------------------------------------

    pub fn stage_create_database(
        &self,
        name: &str,
        txn_id: TxnId,
        begin_ts: Ts,
        conflict: ConflictType,
    ) -> Result<Option<Arc<DatabaseEntry>>> {
        let dir_tail = name.to_string();
        let dir = self.layout.db_dir(&dir_tail);
        let entry = Arc::new(DatabaseEntry::new(name, dir_tail, dir, txn_id, begin_ts));
        self.db_chain(name)
            .try_add(entry, begin_ts, txn_id, conflict, name)
    }

    pub fn stage_drop_database(
        &self,
        name: &str,
        txn_id: TxnId,
        begin_ts: Ts,
        conflict: ConflictType,
    ) -> Result<Option<Arc<DatabaseEntry>>> {
        let entry = Arc::new(DatabaseEntry::new_dropped(name, txn_id, begin_ts));
        self.db_chain(name)
            .try_add(entry, begin_ts, txn_id, conflict, name)
    }

    // ------------------------------------------------------------------
    // replay handlers (known commit_ts, begin_ts = 0)
    // ------------------------------------------------------------------

    pub fn create_database_replay(
        &self,
        db_name: &str,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Arc<DatabaseEntry> {
        let dir = self.layout.db_dir(dir_tail);
        let entry = Arc::new(DatabaseEntry::new_replay(
            db_name,
            dir_tail.to_string(),
            dir,
            txn_id,
            commit_ts,
            false,
        ));
        self.db_chain(db_name).add_replay(entry, txn_id, commit_ts)
    }

    pub fn drop_database_replay(&self, db_name: &str, txn_id: TxnId, commit_ts: Ts) {
        let entry = Arc::new(DatabaseEntry::new_replay(
            db_name,
            String::new(),
            Default::default(),
            txn_id,
            commit_ts,
            true,
        ));
        self.db_chain(db_name).add_replay(entry, txn_id, commit_ts);
    }

    pub fn get_database_replay(&self, db_name: &str, commit_ts: Ts, txn_id: TxnId) -> Arc<DatabaseEntry> {
        match self.get_database(db_name, commit_ts, txn_id) {
            Ok(db) => db,
            Err(_) => fatal(&format!("replay: database {} missing from catalog", db_name)),
        }
    }

    pub fn create_table_replay(
        &self,
        db_name: &str,
        def: TableDef,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Arc<TableEntry> {
        let db = self.get_database_replay(db_name, commit_ts, txn_id);
        let table_name = def.name.clone();
        let entry = Arc::new(TableEntry::new_replay(
            &db.dir,
            def,
            dir_tail.to_string(),
            txn_id,
            commit_ts,
            false,
            0,
            crate::core::types::INVALID_SEGMENT_ID,
            0,
            self.session_memory_limit,
        ));
        db.table_chain(&table_name).add_replay(entry, txn_id, commit_ts)
    }

    pub fn drop_table_replay(&self, db_name: &str, table_name: &str, txn_id: TxnId, commit_ts: Ts) {
        let db = self.get_database_replay(db_name, commit_ts, txn_id);
        let entry = Arc::new(TableEntry::new_dropped(
            table_name,
            txn_id,
            commit_ts,
            self.session_memory_limit,
        ));
        entry.version.set_commit_ts(commit_ts);
        db.table_chain(table_name).add_replay(entry, txn_id, commit_ts);
    }

    pub fn get_table_replay(
        &self,
        db_name: &str,
        table_name: &str,
        commit_ts: Ts,
        txn_id: TxnId,
    ) -> Arc<TableEntry> {
        match self.get_table(db_name, table_name, commit_ts, txn_id) {
            Ok(table) => table,
            Err(_) => fatal(&format!(
                "replay: table {}.{} missing from catalog",
                db_name, table_name
            )),
        }
    }

    pub fn create_index_replay(
        &self,
        db_name: &str,
        table_name: &str,
        def: IndexDef,
        dir_tail: &str,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Arc<TableIndexEntry> {
        let table = self.get_table_replay(db_name, table_name, commit_ts, txn_id);
        let index_name = def.name.clone();
        let entry = Arc::new(TableIndexEntry::new_replay(
            &table.dir,
            def,
            dir_tail.to_string(),
            txn_id,
            commit_ts,
            false,
        ));
        table
            .index_chain(&index_name)
            .add_replay(entry, txn_id, commit_ts)
    }

    pub fn drop_index_replay(
        &self,
        db_name: &str,
        table_name: &str,
        index_name: &str,
        txn_id: TxnId,
        commit_ts: Ts,
    ) {
        let table = self.get_table_replay(db_name, table_name, commit_ts, txn_id);
        let entry = Arc::new(TableIndexEntry::new_replay(
            &table.dir,
            IndexDef::fulltext(index_name, "", "standard"),
            String::new(),
            txn_id,
            commit_ts,
            true,
        ));
        table
            .index_chain(index_name)
            .add_replay(entry, txn_id, commit_ts);
    }

    // ------------------------------------------------------------------
    // delta-op stream
    // ------------------------------------------------------------------

    /// Record the delta ops of a committed transaction, in commit order.
    pub fn append_delta_entry(&self, entry: CatalogDeltaEntry) {
        self.delta_entries.lock().push(entry);
    }

    /// Drain delta entries with `commit_ts <= max_commit_ts` for a delta
    /// checkpoint; later entries stay queued for the next one.
    pub fn take_delta_entries_upto(&self, max_commit_ts: Ts) -> Vec<CatalogDeltaEntry> {
        let mut queued = self.delta_entries.lock();
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for entry in queued.drain(..) {
            if entry.commit_ts <= max_commit_ts {
                taken.push(entry);
            } else {
                kept.push(entry);
            }
        }
        *queued = kept;
        taken.sort_by_key(|e| e.commit_ts);
        taken
    }

    /// Drop delta entries already covered by a full checkpoint.
    pub fn discard_delta_entries_upto(&self, max_commit_ts: Ts) {
        self.delta_entries
            .lock()
            .retain(|e| e.commit_ts > max_commit_ts);
    }

    pub fn apply_delta_entry(&self, entry: &CatalogDeltaEntry) {
        for op in &entry.ops {
            self.apply_delta_op(op, entry.txn_id, entry.commit_ts);
        }
    }

    fn apply_delta_op(&self, op: &DeltaOp, txn_id: TxnId, commit_ts: Ts) {
        match op {
            DeltaOp::AddDatabase { db_name, dir_tail, deleted } => {
                if *deleted {
                    self.drop_database_replay(db_name, txn_id, commit_ts);
                } else {
                    self.create_database_replay(db_name, dir_tail, txn_id, commit_ts);
                }
            }
            DeltaOp::AddTable { db_name, def, dir_tail, deleted } => {
                if *deleted {
                    self.drop_table_replay(db_name, &def.name, txn_id, commit_ts);
                } else {
                    self.create_table_replay(db_name, def.clone(), dir_tail, txn_id, commit_ts);
                }
            }
            DeltaOp::SetSegment { db_name, table_name, info, status, deprecate_ts } => {
                let table = self.get_table_replay(db_name, table_name, commit_ts, txn_id);
                let segment = match table.get_segment(info.segment_id) {
                    Some(segment) => {
                        segment.apply_info(info, txn_id, commit_ts);
                        segment
                    }
                    None => {
                        let segment =
                            Arc::new(SegmentEntry::new_replay(&table.dir, info, txn_id, commit_ts));
                        table.add_segment_replay(segment)
                    }
                };
                segment.set_status_replay(*status, *deprecate_ts);
                if *status == SegmentStatus::Unsealed {
                    table.set_unsealed_segment_id(segment.segment_id);
                }
                if *status == SegmentStatus::Deprecated {
                    for (index_name, chain) in table.index_meta_snapshot() {
                        if let Ok(index_entry) = chain.get(commit_ts, txn_id, &index_name) {
                            index_entry.remove_segment_index(segment.segment_id);
                        }
                    }
                }
                table.bump_next_segment_id(info.segment_id + 1);
            }
            DeltaOp::DeleteRows { db_name, table_name, row_ids } => {
                let table = self.get_table_replay(db_name, table_name, commit_ts, txn_id);
                let mut by_segment: HashMap<SegmentId, Vec<u32>> = HashMap::new();
                for row_id in row_ids {
                    by_segment
                        .entry(row_id.segment_id)
                        .or_default()
                        .push(row_id.segment_offset);
                }
                for (segment_id, offsets) in by_segment {
                    if let Some(segment) = table.get_segment(segment_id) {
                        segment.delete_rows(&offsets, commit_ts);
                    }
                }
            }
            DeltaOp::AddIndex { db_name, table_name, def, dir_tail, deleted } => {
                if *deleted {
                    self.drop_index_replay(db_name, table_name, &def.name, txn_id, commit_ts);
                } else {
                    self.create_index_replay(
                        db_name,
                        table_name,
                        def.clone(),
                        dir_tail,
                        txn_id,
                        commit_ts,
                    );
                }
            }
            DeltaOp::SetSegmentIndex {
                db_name,
                table_name,
                index_name,
                segment_id,
                bases,
                column_len_sum,
                column_len_count,
                update_ts,
            } => {
                let table = self.get_table_replay(db_name, table_name, commit_ts, txn_id);
                if let Ok(index_entry) = table.get_index(index_name, commit_ts, txn_id) {
                    let segment_index = Arc::new(SegmentIndexEntry::new_replay(
                        *segment_id,
                        bases.clone(),
                        *column_len_sum,
                        *column_len_count,
                    ));
                    index_entry.install_segment_index(segment_index);
                    table
                        .index_reader_cache
                        .update_known_update_ts(*update_ts, index_entry.update_ts_cell());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // catalog files
    // ------------------------------------------------------------------

    /// Serialize every entry committed at or before `max_commit_ts` into a
    /// full JSON snapshot.
    pub fn save_full(&self, path: &Path, max_commit_ts: Ts) -> Result<()> {
        let snapshot = self.build_snapshot(max_commit_ts);
        let json = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!(path = %path.display(), max_commit_ts, "full catalog snapshot written");
        Ok(())
    }

    pub fn load_full(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;
        let snapshot: CatalogSnapshot = serde_json::from_slice(&bytes)?;
        self.attach_snapshot(snapshot);
        info!(path = %path.display(), "full catalog snapshot attached");
        Ok(())
    }

    pub fn save_delta(path: &Path, entries: &[CatalogDeltaEntry]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bincode::serialize(entries)?)?;
        Ok(())
    }

    pub fn load_delta(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path)?;
        let entries: Vec<CatalogDeltaEntry> = bincode::deserialize(&bytes)?;
        for entry in &entries {
            self.apply_delta_entry(entry);
        }
        info!(path = %path.display(), entries = entries.len(), "delta catalog applied");
        Ok(())
    }

    fn build_snapshot(&self, max_commit_ts: Ts) -> CatalogSnapshot {
        let mut databases = Vec::new();
        let mut db_names: Vec<(String, Arc<EntryChain<DatabaseEntry>>)> = self.db_chains_snapshot();
        db_names.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, chain) in db_names {
            let Some(db) = chain.committed_at(max_commit_ts) else {
                continue;
            };
            if db.version.deleted {
                continue;
            }
            let mut tables = Vec::new();
            let mut table_chains = db.table_chains_snapshot();
            table_chains.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, table_chain) in table_chains {
                let Some(table) = table_chain.committed_at(max_commit_ts) else {
                    continue;
                };
                if table.version.deleted {
                    continue;
                }
                tables.push(self.snapshot_table(&table, max_commit_ts));
            }
            databases.push(DatabaseSnapshot {
                name: db.name.clone(),
                dir_tail: db.dir_tail.clone(),
                txn_id: db.version.txn_id,
                commit_ts: db.version.commit_ts(),
                tables,
            });
        }

        CatalogSnapshot {
            format_version: CATALOG_FORMAT_VERSION,
            max_commit_ts,
            next_txn_id: self.next_txn_id.load(Ordering::Acquire),
            databases,
        }
    }

    fn snapshot_table(&self, table: &Arc<TableEntry>, max_commit_ts: Ts) -> TableSnapshot {
        let mut segments = Vec::new();
        for segment in table.segments_snapshot() {
            if !segment.version.is_committed() || segment.version.commit_ts() > max_commit_ts {
                continue;
            }
            let mut delete_map: Vec<(u32, Ts)> = segment
                .delete_map_snapshot()
                .into_iter()
                .filter(|(_, ts)| *ts <= max_commit_ts)
                .collect();
            delete_map.sort_unstable();
            segments.push(SegmentSnapshot {
                info: segment.info(),
                txn_id: segment.version.txn_id,
                commit_ts: segment.version.commit_ts(),
                deprecate_ts: segment.version.deprecate_ts(),
                status: segment.status(),
                min_row_ts: segment.min_row_ts(),
                max_row_ts: segment.max_row_ts(),
                delete_map,
            });
        }

        let mut indexes = Vec::new();
        let mut index_chains = table.index_meta_snapshot();
        index_chains.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, index_chain) in index_chains {
            let Some(index_entry) = index_chain.committed_at(max_commit_ts) else {
                continue;
            };
            if index_entry.version.deleted {
                continue;
            }
            let mut segment_indexes = Vec::new();
            for (segment_id, segment_index) in index_entry.index_by_segment_snapshot() {
                let (bases, _) = segment_index.fulltext_snapshot();
                let (column_len_sum, column_len_count) = segment_index.column_len_info();
                segment_indexes.push(SegmentIndexSnapshot {
                    segment_id,
                    bases,
                    column_len_sum,
                    column_len_count,
                });
            }
            indexes.push(IndexSnapshot {
                def: index_entry.def.clone(),
                dir_tail: index_entry.dir_tail.clone(),
                txn_id: index_entry.version.txn_id,
                commit_ts: index_entry.version.commit_ts(),
                update_ts: index_entry.fulltext_segment_update_ts(),
                segment_indexes,
            });
        }

        TableSnapshot {
            def: table.def.clone(),
            dir_tail: table.dir_tail.clone(),
            txn_id: table.version.txn_id,
            commit_ts: table.version.commit_ts(),
            row_count: table.row_count(),
            unsealed_segment_id: table.unsealed_segment_id(),
            next_segment_id: table.next_segment_id(),
            segments,
            indexes,
        }
    }

    fn attach_snapshot(&self, snapshot: CatalogSnapshot) {
        if snapshot.format_version != CATALOG_FORMAT_VERSION {
            fatal(&format!(
                "catalog snapshot format {} unsupported",
                snapshot.format_version
            ));
        }
        let _ = self
            .next_txn_id
            .fetch_max(snapshot.next_txn_id, Ordering::SeqCst);

        for db_snapshot in snapshot.databases {
            let db = self.create_database_replay(
                &db_snapshot.name,
                &db_snapshot.dir_tail,
                db_snapshot.txn_id,
                db_snapshot.commit_ts,
            );
            for table_snapshot in db_snapshot.tables {
                let table = Arc::new(TableEntry::new_replay(
                    &db.dir,
                    table_snapshot.def.clone(),
                    table_snapshot.dir_tail.clone(),
                    table_snapshot.txn_id,
                    table_snapshot.commit_ts,
                    false,
                    table_snapshot.row_count,
                    table_snapshot.unsealed_segment_id,
                    table_snapshot.next_segment_id,
                    self.session_memory_limit,
                ));
                let table = db.table_chain(&table_snapshot.def.name).add_replay(
                    table,
                    table_snapshot.txn_id,
                    table_snapshot.commit_ts,
                );

                for seg in table_snapshot.segments {
                    let segment = Arc::new(SegmentEntry::new_from_snapshot(
                        &table.dir,
                        &seg.info,
                        seg.txn_id,
                        seg.commit_ts,
                        seg.deprecate_ts,
                        seg.status,
                        seg.min_row_ts,
                        seg.max_row_ts,
                        seg.delete_map.into_iter().collect(),
                    ));
                    table.add_segment_replay(segment);
                }

                for idx in table_snapshot.indexes {
                    let index_entry = self.create_index_replay(
                        &db_snapshot.name,
                        &table_snapshot.def.name,
                        idx.def,
                        &idx.dir_tail,
                        idx.txn_id,
                        idx.commit_ts,
                    );
                    for seg_idx in idx.segment_indexes {
                        index_entry.install_segment_index(Arc::new(
                            SegmentIndexEntry::new_replay(
                                seg_idx.segment_id,
                                seg_idx.bases,
                                seg_idx.column_len_sum,
                                seg_idx.column_len_count,
                            ),
                        ));
                    }
                    if idx.update_ts > 0 {
                        table
                            .index_reader_cache
                            .update_known_update_ts(idx.update_ts, index_entry.update_ts_cell());
                    }
                }
            }
        }
    }
}

const CATALOG_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogSnapshot {
    format_version: u32,
    max_commit_ts: Ts,
    next_txn_id: TxnId,
    databases: Vec<DatabaseSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseSnapshot {
    name: String,
    dir_tail: String,
    txn_id: TxnId,
    commit_ts: Ts,
    tables: Vec<TableSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableSnapshot {
    def: TableDef,
    dir_tail: String,
    txn_id: TxnId,
    commit_ts: Ts,
    row_count: u64,
    unsealed_segment_id: SegmentId,
    next_segment_id: SegmentId,
    segments: Vec<SegmentSnapshot>,
    indexes: Vec<IndexSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentSnapshot {
    info: SegmentInfo,
    txn_id: TxnId,
    commit_ts: Ts,
    deprecate_ts: Ts,
    status: SegmentStatus,
    min_row_ts: Ts,
    max_row_ts: Ts,
    delete_map: Vec<(u32, Ts)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    def: IndexDef,
    dir_tail: String,
    txn_id: TxnId,
    commit_ts: Ts,
    update_ts: Ts,
    segment_indexes: Vec<SegmentIndexSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentIndexSnapshot {
    segment_id: SegmentId,
    bases: Vec<PostingBase>,
    column_len_sum: u64,
    column_len_count: u32,
}

