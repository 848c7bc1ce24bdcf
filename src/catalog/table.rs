use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use crate::catalog::entry::{ConflictType, EntryVersion, Versioned};
use crate::catalog::index::TableIndexEntry;
use crate::catalog::meta::EntryChain;
use crate::catalog::segment::SegmentEntry;
use crate::core::error::Result;
use crate::core::types::{
    ColumnId, RowId, SegmentId, TableDef, Ts, TxnId, Value, INVALID_SEGMENT_ID,
};
use crate::index::reader_cache::{IndexReader, TableIndexReaderCache};
use crate::storage::buffer::BufferManager;
use crate::storage::layout::StorageLayout;

/// Versioned table entry owning segments and index chains.
#[derive(Debug)]
pub struct TableEntry {
    pub version: EntryVersion,
    pub def: TableDef,
    pub dir_tail: String,
    pub dir: PathBuf,
    segments: RwLock<BTreeMap<SegmentId, Arc<SegmentEntry>>>,
    indexes: RwLock<HashMap<String, Arc<EntryChain<TableIndexEntry>>>>,
    next_segment_id: AtomicU32,
    unsealed_segment_id: AtomicU32,
    row_count: AtomicU64,
    pub index_reader_cache: TableIndexReaderCache,
}

impl TableEntry {
    pub fn new(
        db_dir: &Path,
        def: TableDef,
        dir_tail: String,
        txn_id: TxnId,
        begin_ts: Ts,
        session_memory_limit: usize,
    ) -> Self {
        TableEntry {
            version: EntryVersion::new(txn_id, begin_ts),
            dir: StorageLayout::table_dir(db_dir, &dir_tail),
            def,
            dir_tail,
            segments: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(HashMap::new()),
            next_segment_id: AtomicU32::new(0),
            unsealed_segment_id: AtomicU32::new(INVALID_SEGMENT_ID),
            row_count: AtomicU64::new(0),
            index_reader_cache: TableIndexReaderCache::new(session_memory_limit),
        }
    }

    pub fn new_dropped(name: &str, txn_id: TxnId, begin_ts: Ts, session_memory_limit: usize) -> Self {
        TableEntry {
            version: EntryVersion::new_dropped(txn_id, begin_ts),
            def: TableDef::new(name, Vec::new()),
            dir_tail: String::new(),
            dir: PathBuf::new(),
            segments: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(HashMap::new()),
            next_segment_id: AtomicU32::new(0),
            unsealed_segment_id: AtomicU32::new(INVALID_SEGMENT_ID),
            row_count: AtomicU64::new(0),
            index_reader_cache: TableIndexReaderCache::new(session_memory_limit),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_replay(
        db_dir: &Path,
        def: TableDef,
        dir_tail: String,
        txn_id: TxnId,
        commit_ts: Ts,
        deleted: bool,
        row_count: u64,
        unsealed_segment_id: SegmentId,
        next_segment_id: SegmentId,
        session_memory_limit: usize,
    ) -> Self {
        TableEntry {
            version: EntryVersion::new_replay(txn_id, commit_ts, deleted),
            dir: StorageLayout::table_dir(db_dir, &dir_tail),
            def,
            dir_tail,
            segments: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(HashMap::new()),
            next_segment_id: AtomicU32::new(next_segment_id),
            unsealed_segment_id: AtomicU32::new(unsealed_segment_id),
            row_count: AtomicU64::new(row_count),
            index_reader_cache: TableIndexReaderCache::new(session_memory_limit),
        }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn column_id_by_name(&self, name: &str) -> Option<ColumnId> {
        self.def.column_id_by_name(name)
    }

    // ------------------------------------------------------------------
    // segments
    // ------------------------------------------------------------------

    /// Segment ids are unique and monotonically assigned within a table.
    pub fn allocate_segment_id(&self) -> SegmentId {
        self.next_segment_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_segment_id(&self) -> SegmentId {
        self.next_segment_id.load(Ordering::Acquire)
    }

    pub fn bump_next_segment_id(&self, floor: SegmentId) {
        let _ = self.next_segment_id.fetch_max(floor, Ordering::SeqCst);
    }

    pub fn unsealed_segment_id(&self) -> SegmentId {
        self.unsealed_segment_id.load(Ordering::Acquire)
    }

    pub fn set_unsealed_segment_id(&self, id: SegmentId) {
        self.unsealed_segment_id.store(id, Ordering::Release);
    }

    pub fn add_segment(&self, segment: Arc<SegmentEntry>) {
        self.segments.write().insert(segment.segment_id, segment);
    }

    /// Idempotent insert during replay: an already-present segment with the
    /// same id is kept.
    pub fn add_segment_replay(&self, segment: Arc<SegmentEntry>) -> Arc<SegmentEntry> {
        let mut segments = self.segments.write();
        let entry = segments.entry(segment.segment_id).or_insert(segment);
        self.bump_next_segment_id(entry.segment_id + 1);
        entry.clone()
    }

    pub fn get_segment(&self, segment_id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.segments.read().get(&segment_id).cloned()
    }

    pub fn remove_segment(&self, segment_id: SegmentId) {
        self.segments.write().remove(&segment_id);
    }

    pub fn segments_snapshot(&self) -> Vec<Arc<SegmentEntry>> {
        self.segments.read().values().cloned().collect()
    }

    pub fn visible_segments(&self, snap_ts: Ts, viewer: TxnId) -> Vec<Arc<SegmentEntry>> {
        self.segments
            .read()
            .values()
            .filter(|s| s.version.visible(snap_ts, viewer))
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    pub fn add_row_count(&self, delta: u64) {
        self.row_count.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn visible_row_count(&self, snap_ts: Ts, viewer: TxnId) -> u64 {
        self.visible_segments(snap_ts, viewer)
            .iter()
            .map(|s| s.visible_row_count(snap_ts, viewer))
            .sum()
    }

    /// Materialize one column across visible segments, ascending row id.
    pub fn scan_column(
        &self,
        column_id: ColumnId,
        snap_ts: Ts,
        viewer: TxnId,
        buffer: &BufferManager,
    ) -> Result<Vec<(RowId, Value)>> {
        let mut rows = Vec::new();
        for segment in self.visible_segments(snap_ts, viewer) {
            for (offset, value) in segment.scan_column(column_id, snap_ts, viewer, buffer)? {
                rows.push((RowId::new(segment.segment_id, offset), value));
            }
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // indexes
    // ------------------------------------------------------------------

    pub fn index_chain(&self, name: &str) -> Arc<EntryChain<TableIndexEntry>> {
        let mut indexes = self.indexes.write();
        indexes
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EntryChain::new()))
            .clone()
    }

    pub fn stage_index(
        &self,
        entry: Arc<TableIndexEntry>,
        snap_ts: Ts,
        viewer: TxnId,
        conflict: ConflictType,
    ) -> Result<Option<Arc<TableIndexEntry>>> {
        let name = entry.def.name.clone();
        self.index_chain(&name)
            .try_add(entry, snap_ts, viewer, conflict, &name)
    }

    pub fn get_index(
        &self,
        name: &str,
        snap_ts: Ts,
        viewer: TxnId,
    ) -> Result<Arc<TableIndexEntry>> {
        self.index_chain(name).get(snap_ts, viewer, name)
    }

    /// Snapshot of the index meta map, taken under the table-level lock.
    pub fn index_meta_snapshot(&self) -> Vec<(String, Arc<EntryChain<TableIndexEntry>>)> {
        self.indexes
            .read()
            .iter()
            .map(|(name, chain)| (name.clone(), chain.clone()))
            .collect()
    }

    pub fn remove_uncommitted_indexes(&self, txn_id: TxnId) {
        for chain in self.indexes.read().values() {
            chain.remove_uncommitted(txn_id);
        }
    }

    pub fn get_index_reader(&self, txn_id: TxnId, begin_ts: Ts) -> Result<IndexReader> {
        self.index_reader_cache
            .get_index_reader(txn_id, begin_ts, self)
    }
}

impl Versioned for TableEntry {
    fn version(&self) -> &EntryVersion {
        &self.version
    }
}
