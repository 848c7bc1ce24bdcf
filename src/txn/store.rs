use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use crate::analysis::analyzer::{Analyzer, AnalyzerRegistry};
use crate::catalog::catalog::Catalog;
use crate::catalog::database::DatabaseEntry;
use crate::catalog::delta::DeltaOp;
use crate::catalog::index::{SegmentIndexEntry, TableIndexEntry};
use crate::catalog::segment::{BlockEntry, SegmentEntry, SegmentStatus};
use crate::catalog::table::TableEntry;
use crate::core::error::Result;
use crate::core::types::{
    ColumnId, DataBlock, RowId, SegmentId, Ts, TxnId, Value, DEFAULT_BLOCK_CAPACITY,
    DEFAULT_SEGMENT_CAPACITY, INVALID_SEGMENT_ID,
};
use crate::storage::buffer::BufferManager;
use crate::wal::entry::WalCmd;

/// One block write staged by an append, materialized at prepare time.
pub struct StagedAppend {
    pub segment: Arc<SegmentEntry>,
    pub block: Arc<BlockEntry>,
    pub start_offset: u32,
    pub rows: u64,
    pub columns: Vec<Vec<Value>>,
    pub new_segment: bool,
    pub seals_segment: bool,
}

/// A created index with the per-segment indexes built for it.
pub struct StagedIndex {
    pub entry: Arc<TableIndexEntry>,
    pub segment_indexes: Vec<Arc<SegmentIndexEntry>>,
}

/// A staged compaction: replacement segments plus the segments they subsume.
pub struct CompactState {
    pub new_segments: Vec<Arc<SegmentEntry>>,
    pub new_rows: u64,
    pub deprecated: Vec<Arc<SegmentEntry>>,
    // (index name, segment index built for a new segment)
    pub new_segment_indexes: Vec<(String, Arc<SegmentIndexEntry>)>,
}

/// An imported segment with any segment indexes built for it.
pub struct StagedImport {
    pub segment: Arc<SegmentEntry>,
    pub rows: u64,
    pub segment_indexes: Vec<(String, Arc<SegmentIndexEntry>)>,
}

/// Buffered writes of one transaction against one table.
#[derive(Default)]
pub struct TxnTableStore {
    pub appends: Vec<DataBlock>,
    pub staged_appends: Vec<StagedAppend>,
    pub delete_rows: Vec<RowId>,
    pub imports: Vec<StagedImport>,
    pub compact: Option<CompactState>,
    pub created_indexes: Vec<StagedIndex>,
    pub dropped_indexes: Vec<(String, Arc<TableIndexEntry>)>,
}

impl TxnTableStore {
    fn is_empty(&self) -> bool {
        self.appends.is_empty()
            && self.delete_rows.is_empty()
            && self.imports.is_empty()
            && self.compact.is_none()
            && self.created_indexes.is_empty()
            && self.dropped_indexes.is_empty()
    }
}

/// Per-transaction write buffer, grouped by table. DDL entries are staged
/// into the shared catalog immediately (uncommitted, visible only to the
/// owner); DML stays here until prepare.
#[derive(Default)]
pub struct TxnStore {
    pub created_dbs: Vec<Arc<DatabaseEntry>>,
    pub dropped_dbs: Vec<Arc<DatabaseEntry>>,
    pub created_tables: Vec<(String, Arc<TableEntry>)>,
    pub dropped_tables: Vec<(String, Arc<TableEntry>)>,
    pub tables: BTreeMap<(String, String), (Arc<TableEntry>, TxnTableStore)>,
}

impl TxnStore {
    pub fn is_empty(&self) -> bool {
        self.created_dbs.is_empty()
            && self.dropped_dbs.is_empty()
            && self.created_tables.is_empty()
            && self.dropped_tables.is_empty()
            && self.tables.values().all(|(_, store)| store.is_empty())
    }

    pub fn table_store(
        &mut self,
        db_name: &str,
        table: Arc<TableEntry>,
    ) -> &mut TxnTableStore {
        let key = (db_name.to_string(), table.name().to_string());
        &mut self
            .tables
            .entry(key)
            .or_insert_with(|| (table, TxnTableStore::default()))
            .1
    }

    /// Materialize buffered work, stamp nothing yet, and emit the WAL
    /// commands plus catalog delta ops in application order: DDL before
    /// DML, compactions after the appends they subsume.
    pub fn prepare_commit(
        &mut self,
        txn_id: TxnId,
        begin_ts: Ts,
        commit_ts: Ts,
        buffer: &BufferManager,
    ) -> Result<(Vec<WalCmd>, Vec<DeltaOp>)> {
        let mut cmds = Vec::new();
        let mut ops = Vec::new();

        for db in &self.created_dbs {
            cmds.push(WalCmd::CreateDatabase {
                db_name: db.name.clone(),
                db_dir_tail: db.dir_tail.clone(),
            });
            ops.push(DeltaOp::AddDatabase {
                db_name: db.name.clone(),
                dir_tail: db.dir_tail.clone(),
                deleted: false,
            });
        }
        for db in &self.dropped_dbs {
            cmds.push(WalCmd::DropDatabase { db_name: db.name.clone() });
            ops.push(DeltaOp::AddDatabase {
                db_name: db.name.clone(),
                dir_tail: String::new(),
                deleted: true,
            });
        }
        for (db_name, table) in &self.created_tables {
            cmds.push(WalCmd::CreateTable {
                db_name: db_name.clone(),
                table_dir_tail: table.dir_tail.clone(),
                def: table.def.clone(),
            });
            ops.push(DeltaOp::AddTable {
                db_name: db_name.clone(),
                def: table.def.clone(),
                dir_tail: table.dir_tail.clone(),
                deleted: false,
            });
        }
        for (db_name, table) in &self.dropped_tables {
            cmds.push(WalCmd::DropTable {
                db_name: db_name.clone(),
                table_name: table.name().to_string(),
            });
            ops.push(DeltaOp::AddTable {
                db_name: db_name.clone(),
                def: table.def.clone(),
                dir_tail: String::new(),
                deleted: true,
            });
        }

        for ((db_name, table_name), (table, store)) in self.tables.iter_mut() {
            for staged in &store.created_indexes {
                cmds.push(WalCmd::CreateIndex {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    index_dir_tail: staged.entry.dir_tail.clone(),
                    def: staged.entry.def.clone(),
                });
                ops.push(DeltaOp::AddIndex {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    def: staged.entry.def.clone(),
                    dir_tail: staged.entry.dir_tail.clone(),
                    deleted: false,
                });
                for segment_index in &staged.segment_indexes {
                    ops.push(segment_index_op(
                        db_name,
                        table_name,
                        &staged.entry.def.name,
                        segment_index,
                        commit_ts,
                    ));
                }
            }
            for (index_name, _) in &store.dropped_indexes {
                cmds.push(WalCmd::DropIndex {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    index_name: index_name.clone(),
                });
                ops.push(DeltaOp::AddIndex {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    def: crate::catalog::index::IndexDef::fulltext(index_name, "", "standard"),
                    dir_tail: String::new(),
                    deleted: true,
                });
            }

            for import in &store.imports {
                cmds.push(WalCmd::Import {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    segment_info: import.segment.info(),
                });
                ops.push(DeltaOp::SetSegment {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    info: import.segment.info(),
                    status: SegmentStatus::Sealed,
                    deprecate_ts: None,
                });
                for (index_name, segment_index) in &import.segment_indexes {
                    ops.push(segment_index_op(
                        db_name,
                        table_name,
                        index_name,
                        segment_index,
                        commit_ts,
                    ));
                }
            }

            // materialize buffered appends into blocks
            materialize_appends(table, store, txn_id, begin_ts, buffer)?;
            for block_data in &store.appends {
                cmds.push(WalCmd::Append {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    block: block_data.clone(),
                });
            }
            let mut touched: BTreeMap<SegmentId, (Arc<SegmentEntry>, u64, bool, bool)> =
                BTreeMap::new();
            for staged in &store.staged_appends {
                let entry = touched
                    .entry(staged.segment.segment_id)
                    .or_insert_with(|| (staged.segment.clone(), 0, false, false));
                entry.1 += staged.rows;
                entry.2 |= staged.new_segment;
                entry.3 |= staged.seals_segment;
            }
            for (_, (segment, staged_rows, _, seals)) in &touched {
                let mut info = segment.info();
                info.row_count += staged_rows;
                info.actual_row_count += staged_rows;
                ops.push(DeltaOp::SetSegment {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    info,
                    status: if *seals {
                        SegmentStatus::Sealed
                    } else {
                        SegmentStatus::Unsealed
                    },
                    deprecate_ts: None,
                });
            }

            if !store.delete_rows.is_empty() {
                cmds.push(WalCmd::Delete {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    row_ids: store.delete_rows.clone(),
                });
                ops.push(DeltaOp::DeleteRows {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    row_ids: store.delete_rows.clone(),
                });
            }

            if let Some(compact) = &store.compact {
                cmds.push(WalCmd::Compact {
                    db_name: db_name.clone(),
                    table_name: table_name.clone(),
                    new_segment_infos: compact.new_segments.iter().map(|s| s.info()).collect(),
                    deprecated_segment_ids: compact
                        .deprecated
                        .iter()
                        .map(|s| s.segment_id)
                        .collect(),
                });
                for segment in &compact.new_segments {
                    ops.push(DeltaOp::SetSegment {
                        db_name: db_name.clone(),
                        table_name: table_name.clone(),
                        info: segment.info(),
                        status: SegmentStatus::Sealed,
                        deprecate_ts: None,
                    });
                }
                for (index_name, segment_index) in &compact.new_segment_indexes {
                    ops.push(segment_index_op(
                        db_name,
                        table_name,
                        index_name,
                        segment_index,
                        commit_ts,
                    ));
                }
                for segment in &compact.deprecated {
                    ops.push(DeltaOp::SetSegment {
                        db_name: db_name.clone(),
                        table_name: table_name.clone(),
                        info: segment.info(),
                        status: SegmentStatus::Deprecated,
                        deprecate_ts: Some(commit_ts),
                    });
                }
            }
        }

        Ok((cmds, ops))
    }

    /// Finalize catalog state after the WAL entry is durable. Runs on the
    /// flush thread, in WAL order, and must not fail.
    pub fn commit_bottom(
        &mut self,
        txn_id: TxnId,
        commit_ts: Ts,
        registry: &AnalyzerRegistry,
    ) {
        for db in &self.created_dbs {
            db.version.set_commit_ts(commit_ts);
        }
        for db in &self.dropped_dbs {
            db.version.set_commit_ts(commit_ts);
        }
        for (_, table) in &self.created_tables {
            table.version.set_commit_ts(commit_ts);
        }
        for (_, table) in &self.dropped_tables {
            table.version.set_commit_ts(commit_ts);
        }

        for ((_, _), (table, store)) in self.tables.iter_mut() {
            for staged in &store.created_indexes {
                staged.entry.version.set_commit_ts(commit_ts);
                table
                    .index_reader_cache
                    .update_known_update_ts(commit_ts, staged.entry.update_ts_cell());
            }
            for (_, marker) in &store.dropped_indexes {
                marker.version.set_commit_ts(commit_ts);
            }

            for import in &store.imports {
                import.segment.commit_stamp(commit_ts);
                for block in import.segment.blocks() {
                    block.commit(commit_ts);
                }
                table.add_segment(import.segment.clone());
                table.bump_next_segment_id(import.segment.segment_id + 1);
                table.add_row_count(import.rows);
                install_segment_indexes(table, &import.segment_indexes, commit_ts, txn_id);
            }

            for staged in &store.staged_appends {
                staged.block.commit(commit_ts);
                staged.segment.commit_stamp(commit_ts);
                staged.segment.add_rows_built(staged.rows);
                table.add_row_count(staged.rows);
            }
            index_staged_appends(table, store, txn_id, commit_ts, registry);

            if !store.delete_rows.is_empty() {
                let mut by_segment: HashMap<SegmentId, Vec<u32>> = HashMap::new();
                for row_id in &store.delete_rows {
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

            if let Some(compact) = &store.compact {
                for segment in &compact.new_segments {
                    segment.commit_stamp(commit_ts);
                    for block in segment.blocks() {
                        block.commit(commit_ts);
                    }
                    table.add_segment(segment.clone());
                    table.bump_next_segment_id(segment.segment_id + 1);
                }
                table.add_row_count(compact.new_rows);
                install_segment_indexes(table, &compact.new_segment_indexes, commit_ts, txn_id);
                for segment in &compact.deprecated {
                    segment.set_deprecated(commit_ts);
                    remove_segment_from_indexes(table, segment.segment_id, commit_ts, txn_id);
                }
            }
        }
    }

    /// Undo staged state after rollback or a failed WAL write.
    pub fn rollback(&mut self, txn_id: TxnId, catalog: &Catalog) {
        for ((_, _), (table, store)) in self.tables.iter_mut() {
            for staged in &store.staged_appends {
                staged.segment.remove_uncommitted_blocks(txn_id);
                if staged.seals_segment && !staged.new_segment {
                    // the seal was caused by blocks this txn just removed
                    staged.segment.rollback_seal();
                    table.set_unsealed_segment_id(staged.segment.segment_id);
                }
                if staged.new_segment && !staged.segment.version.is_committed() {
                    table.remove_segment(staged.segment.segment_id);
                    if table.unsealed_segment_id() == staged.segment.segment_id {
                        table.set_unsealed_segment_id(INVALID_SEGMENT_ID);
                    }
                }
            }
            store.staged_appends.clear();
            if let Some(compact) = &store.compact {
                for segment in &compact.deprecated {
                    segment.rollback_compacting();
                }
            }
        }
        catalog.remove_uncommitted(txn_id);
    }
}

fn segment_index_op(
    db_name: &str,
    table_name: &str,
    index_name: &str,
    segment_index: &Arc<SegmentIndexEntry>,
    commit_ts: Ts,
) -> DeltaOp {
    let (bases, _) = segment_index.fulltext_snapshot();
    let (column_len_sum, column_len_count) = segment_index.column_len_info();
    DeltaOp::SetSegmentIndex {
        db_name: db_name.to_string(),
        table_name: table_name.to_string(),
        index_name: index_name.to_string(),
        segment_id: segment_index.segment_id,
        bases,
        column_len_sum,
        column_len_count,
        update_ts: commit_ts,
    }
}

fn install_segment_indexes(
    table: &Arc<TableEntry>,
    segment_indexes: &[(String, Arc<SegmentIndexEntry>)],
    commit_ts: Ts,
    txn_id: TxnId,
) {
    for (index_name, segment_index) in segment_indexes {
        if let Ok(index_entry) = table.get_index(index_name, commit_ts, txn_id) {
            index_entry.install_segment_index(segment_index.clone());
            table
                .index_reader_cache
                .update_known_update_ts(commit_ts, index_entry.update_ts_cell());
        }
    }
}

fn remove_segment_from_indexes(
    table: &Arc<TableEntry>,
    segment_id: SegmentId,
    commit_ts: Ts,
    txn_id: TxnId,
) {
    for (index_name, chain) in table.index_meta_snapshot() {
        if let Ok(index_entry) = chain.get(commit_ts, txn_id, &index_name) {
            index_entry.remove_segment_index(segment_id);
        }
    }
}

/// Split buffered append blocks into staged block writes against the
/// table's unsealed segment, creating and sealing segments as capacity
/// demands. Deterministic: replay re-runs this with the same inputs and
/// produces the same segment and block ids and the same file offsets.
fn materialize_appends(
    table: &Arc<TableEntry>,
    store: &mut TxnTableStore,
    txn_id: TxnId,
    begin_ts: Ts,
    buffer: &BufferManager,
) -> Result<()> {
    if store.appends.is_empty() {
        return Ok(());
    }
    let column_count = table.def.column_count();

    // (segment, created by this txn)
    let mut active: Option<(Arc<SegmentEntry>, bool)> = None;
    let unsealed_id = table.unsealed_segment_id();
    if unsealed_id != INVALID_SEGMENT_ID {
        if let Some(segment) = table.get_segment(unsealed_id) {
            if segment.status() == SegmentStatus::Unsealed {
                active = Some((segment, false));
            }
        }
    }

    let appends = std::mem::take(&mut store.appends);
    for block_data in &appends {
        let mut row_pos = 0usize;
        while row_pos < block_data.row_count {
            let (segment, new_segment) = match &active {
                Some((segment, is_new)) if segment.remaining_capacity() > 0 => {
                    (segment.clone(), *is_new)
                }
                _ => {
                    let segment = Arc::new(SegmentEntry::new(
                        &table.dir,
                        table.allocate_segment_id(),
                        DEFAULT_SEGMENT_CAPACITY as u64,
                        column_count,
                        txn_id,
                        begin_ts,
                    ));
                    // published (invisible) right away: prepare runs under
                    // the commit-order mutex, so the next transaction's
                    // prepare sees the same unsealed segment replay will
                    active = Some((segment.clone(), true));
                    table.add_segment(segment.clone());
                    table.set_unsealed_segment_id(segment.segment_id);
                    (segment, true)
                }
            };

            let remaining = segment.remaining_capacity() as usize;
            let take = (block_data.row_count - row_pos)
                .min(DEFAULT_BLOCK_CAPACITY)
                .min(remaining);
            let start_offset = (segment.row_capacity as usize - remaining) as u32;

            let block = Arc::new(BlockEntry::new(
                &segment.dir,
                segment.next_block_id(),
                DEFAULT_BLOCK_CAPACITY as u32,
                column_count,
                txn_id,
                begin_ts,
            ));
            let columns: Vec<Vec<Value>> = block_data
                .columns
                .iter()
                .map(|c| c[row_pos..row_pos + take].to_vec())
                .collect();
            let slices: Vec<&[Value]> = columns.iter().map(|c| c.as_slice()).collect();
            let rows = block.write_rows(buffer, &slices)?;
            segment.add_block(block.clone());

            let seals_segment = segment.remaining_capacity() == 0;
            if seals_segment {
                segment.seal();
                if table.unsealed_segment_id() == segment.segment_id {
                    table.set_unsealed_segment_id(INVALID_SEGMENT_ID);
                }
                active = None;
            }

            store.staged_appends.push(StagedAppend {
                segment,
                block,
                start_offset,
                rows,
                columns,
                new_segment,
                seals_segment,
            });
            row_pos += take;
        }
    }
    store.appends = appends;

    Ok(())
}

/// Feed freshly committed rows into every full-text index of the table.
/// Rows are indexed contiguously, so the index's covered row count equals
/// the staged write's start offset.
fn index_staged_appends(
    table: &Arc<TableEntry>,
    store: &TxnTableStore,
    txn_id: TxnId,
    commit_ts: Ts,
    registry: &AnalyzerRegistry,
) {
    if store.staged_appends.is_empty() {
        return;
    }
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
        let analyzer = registry
            .get(index_entry.def.analyzer())
            .unwrap_or_else(|_| {
                warn!(
                    analyzer = index_entry.def.analyzer(),
                    "analyzer missing, falling back to standard"
                );
                Arc::new(Analyzer::standard())
            });

        for staged in &store.staged_appends {
            let segment_index = index_entry.segment_index(staged.segment.segment_id);
            let covered = segment_index.column_len_info().1;
            if covered != staged.start_offset {
                warn!(
                    segment_id = staged.segment.segment_id,
                    covered,
                    start_offset = staged.start_offset,
                    "index coverage gap, skipping rows"
                );
                continue;
            }
            let texts: Vec<String> = staged.columns[column_id as usize]
                .iter()
                .map(|v| v.as_str().unwrap_or("").to_string())
                .collect();
            segment_index.append_memory_rows(&texts, &analyzer);
        }
        table
            .index_reader_cache
            .update_known_update_ts(commit_ts, index_entry.update_ts_cell());
    }
}

/// Build a sealed segment from column-major batches; used by import and
/// compact. Files are written immediately, entry stays private to the
/// transaction until commit.
pub fn build_sealed_segment(
    table: &Arc<TableEntry>,
    blocks: &[DataBlock],
    txn_id: TxnId,
    begin_ts: Ts,
    buffer: &BufferManager,
) -> Result<(Arc<SegmentEntry>, u64)> {
    let column_count = table.def.column_count();
    let segment = Arc::new(SegmentEntry::new(
        &table.dir,
        table.allocate_segment_id(),
        DEFAULT_SEGMENT_CAPACITY as u64,
        column_count,
        txn_id,
        begin_ts,
    ));

    let mut total_rows = 0u64;
    for block_data in blocks {
        let mut row_pos = 0usize;
        while row_pos < block_data.row_count {
            let take = (block_data.row_count - row_pos).min(DEFAULT_BLOCK_CAPACITY);
            let block = Arc::new(BlockEntry::new(
                &segment.dir,
                segment.next_block_id(),
                DEFAULT_BLOCK_CAPACITY as u32,
                column_count,
                txn_id,
                begin_ts,
            ));
            let columns: Vec<Vec<Value>> = block_data
                .columns
                .iter()
                .map(|c| c[row_pos..row_pos + take].to_vec())
                .collect();
            let slices: Vec<&[Value]> = columns.iter().map(|c| c.as_slice()).collect();
            total_rows += block.write_rows(buffer, &slices)?;
            segment.add_block(block);
            row_pos += take;
        }
    }
    segment.add_rows_built(total_rows);
    segment.seal();
    Ok((segment, total_rows))
}

/// Build the full-text index of one segment by scanning its indexed column
/// and dumping a posting base under the index directory.
pub fn build_segment_fulltext_index(
    segment: &SegmentEntry,
    index_entry: &TableIndexEntry,
    column_id: ColumnId,
    analyzer: &Analyzer,
    buffer: &BufferManager,
) -> Result<Arc<SegmentIndexEntry>> {
    let values = segment.read_column_all(column_id, buffer)?;
    let segment_index = Arc::new(SegmentIndexEntry::new(segment.segment_id));
    if values.is_empty() {
        return Ok(segment_index);
    }
    let texts: Vec<String> = values
        .iter()
        .map(|v| v.as_str().unwrap_or("").to_string())
        .collect();

    let indexer = crate::index::memory_indexer::MemoryIndexer::new(
        format!("s{}_b0", segment.segment_id),
        RowId::new(segment.segment_id, 0),
    );
    indexer.insert(&texts, analyzer);
    let (base, len_sum, len_count) = indexer.dump(&index_entry.dir)?;
    segment_index.add_base(base, len_sum, len_count);
    Ok(segment_index)
}
