use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::catalog::entry::{EntryVersion, Versioned};
use crate::core::types::{RowId, SegmentId, Ts, TxnId};
use crate::index::memory_indexer::MemoryIndexer;
use crate::storage::layout::StorageLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    FullText { analyzer: String },
}

/// Index definition: kind, target column, parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexKind,
    pub column_name: String,
}

impl IndexDef {
    pub fn fulltext(name: &str, column_name: &str, analyzer: &str) -> Self {
        IndexDef {
            name: name.to_string(),
            kind: IndexKind::FullText {
                analyzer: analyzer.to_string(),
            },
            column_name: column_name.to_string(),
        }
    }

    pub fn is_fulltext(&self) -> bool {
        matches!(self.kind, IndexKind::FullText { .. })
    }

    pub fn analyzer(&self) -> &str {
        match &self.kind {
            IndexKind::FullText { analyzer } => analyzer,
        }
    }
}

/// One flushed posting set of a segment index: files named after
/// `base_name` under the index directory, rows addressed from `base_row_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostingBase {
    pub base_name: String,
    pub base_row_id: RowId,
}

/// Per-segment state of one table index: the on-disk posting bases plus an
/// optional in-memory indexer holding rows not yet flushed.
#[derive(Debug)]
pub struct SegmentIndexEntry {
    pub segment_id: SegmentId,
    bases: RwLock<Vec<PostingBase>>,
    memory_indexer: RwLock<Option<Arc<MemoryIndexer>>>,
    column_len_sum: AtomicU64,
    column_len_count: AtomicU32,
}

impl SegmentIndexEntry {
    pub fn new(segment_id: SegmentId) -> Self {
        SegmentIndexEntry {
            segment_id,
            bases: RwLock::new(Vec::new()),
            memory_indexer: RwLock::new(None),
            column_len_sum: AtomicU64::new(0),
            column_len_count: AtomicU32::new(0),
        }
    }

    pub fn new_replay(
        segment_id: SegmentId,
        bases: Vec<PostingBase>,
        column_len_sum: u64,
        column_len_count: u32,
    ) -> Self {
        SegmentIndexEntry {
            segment_id,
            bases: RwLock::new(bases),
            memory_indexer: RwLock::new(None),
            column_len_sum: AtomicU64::new(column_len_sum),
            column_len_count: AtomicU32::new(column_len_count),
        }
    }

    /// Append analyzed rows to the in-memory indexer, creating it at the
    /// current coverage offset if absent. Exclusive on the indexer slot,
    /// so a concurrent checkpoint dump cannot lose rows.
    pub fn append_memory_rows(
        &self,
        texts: &[String],
        analyzer: &crate::analysis::analyzer::Analyzer,
    ) {
        let mut slot = self.memory_indexer.write();
        let indexer = match &*slot {
            Some(indexer) => indexer.clone(),
            None => {
                let covered = self.column_len_count.load(Ordering::Acquire);
                let indexer = Arc::new(MemoryIndexer::new(
                    format!("s{}_m{}", self.segment_id, covered),
                    RowId::new(self.segment_id, covered),
                ));
                *slot = Some(indexer.clone());
                indexer
            }
        };
        let before = indexer.total_length();
        indexer.insert(texts, analyzer);
        self.column_len_sum
            .fetch_add(indexer.total_length() - before, Ordering::SeqCst);
        self.column_len_count
            .fetch_add(texts.len() as u32, Ordering::SeqCst);
    }

    /// Flush the in-memory indexer (if any) to an on-disk posting base and
    /// clear the slot. Length statistics were accounted on insert.
    pub fn dump_memory_indexer(
        &self,
        index_dir: &std::path::Path,
    ) -> crate::core::error::Result<Option<PostingBase>> {
        let mut slot = self.memory_indexer.write();
        let Some(indexer) = slot.clone().filter(|m| m.doc_count() > 0) else {
            return Ok(None);
        };
        let (base, _, _) = indexer.dump(index_dir)?;
        self.bases.write().push(base.clone());
        *slot = None;
        Ok(Some(base))
    }

    pub fn add_base(&self, base: PostingBase, len_sum: u64, len_count: u32) -> PostingBase {
        self.bases.write().push(base.clone());
        self.column_len_sum.fetch_add(len_sum, Ordering::SeqCst);
        self.column_len_count.fetch_add(len_count, Ordering::SeqCst);
        base
    }

    /// Snapshot for reader construction: the posting bases plus the
    /// in-memory indexer when it holds documents. Lock order is the
    /// indexer slot first, matching the dump path.
    pub fn fulltext_snapshot(&self) -> (Vec<PostingBase>, Option<Arc<MemoryIndexer>>) {
        let indexer = self
            .memory_indexer
            .read()
            .clone()
            .filter(|m| m.doc_count() > 0);
        let bases = self.bases.read().clone();
        (bases, indexer)
    }

    pub fn column_len_info(&self) -> (u64, u32) {
        (
            self.column_len_sum.load(Ordering::Acquire),
            self.column_len_count.load(Ordering::Acquire),
        )
    }
}

/// Table-level index entry, versioned in the table's index chain map.
#[derive(Debug)]
pub struct TableIndexEntry {
    pub version: EntryVersion,
    pub def: IndexDef,
    pub dir_tail: String,
    pub dir: PathBuf,
    index_by_segment: RwLock<BTreeMap<SegmentId, Arc<SegmentIndexEntry>>>,
    // bumped on every committed full-text-relevant change
    fulltext_segment_update_ts: RwLock<Ts>,
}

impl TableIndexEntry {
    pub fn new(
        table_dir: &Path,
        def: IndexDef,
        dir_tail: String,
        txn_id: TxnId,
        begin_ts: Ts,
    ) -> Self {
        TableIndexEntry {
            version: EntryVersion::new(txn_id, begin_ts),
            dir: StorageLayout::index_dir(table_dir, &dir_tail),
            def,
            dir_tail,
            index_by_segment: RwLock::new(BTreeMap::new()),
            fulltext_segment_update_ts: RwLock::new(0),
        }
    }

    pub fn new_dropped(def_name: &str, txn_id: TxnId, begin_ts: Ts) -> Self {
        TableIndexEntry {
            version: EntryVersion::new_dropped(txn_id, begin_ts),
            def: IndexDef::fulltext(def_name, "", "standard"),
            dir_tail: String::new(),
            dir: PathBuf::new(),
            index_by_segment: RwLock::new(BTreeMap::new()),
            fulltext_segment_update_ts: RwLock::new(0),
        }
    }

    pub fn new_replay(
        table_dir: &Path,
        def: IndexDef,
        dir_tail: String,
        txn_id: TxnId,
        commit_ts: Ts,
        deleted: bool,
    ) -> Self {
        TableIndexEntry {
            version: EntryVersion::new_replay(txn_id, commit_ts, deleted),
            dir: StorageLayout::index_dir(table_dir, &dir_tail),
            def,
            dir_tail,
            index_by_segment: RwLock::new(BTreeMap::new()),
            fulltext_segment_update_ts: RwLock::new(0),
        }
    }

    pub fn segment_index(&self, segment_id: SegmentId) -> Arc<SegmentIndexEntry> {
        let mut map = self.index_by_segment.write();
        map.entry(segment_id)
            .or_insert_with(|| Arc::new(SegmentIndexEntry::new(segment_id)))
            .clone()
    }

    pub fn install_segment_index(&self, entry: Arc<SegmentIndexEntry>) {
        self.index_by_segment
            .write()
            .insert(entry.segment_id, entry);
    }

    pub fn remove_segment_index(&self, segment_id: SegmentId) {
        self.index_by_segment.write().remove(&segment_id);
    }

    /// Ascending-id snapshot of the per-segment index map.
    pub fn index_by_segment_snapshot(&self) -> BTreeMap<SegmentId, Arc<SegmentIndexEntry>> {
        self.index_by_segment.read().clone()
    }

    pub fn fulltext_segment_update_ts(&self) -> Ts {
        *self.fulltext_segment_update_ts.read()
    }

    pub fn update_ts_cell(&self) -> &RwLock<Ts> {
        &self.fulltext_segment_update_ts
    }
}

impl Versioned for TableIndexEntry {
    fn version(&self) -> &EntryVersion {
        &self.version
    }
}
