use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::catalog::entry::{EntryVersion, Versioned};
use crate::core::error::{fatal, Result};
use crate::core::types::{BlockId, ColumnId, SegmentId, Ts, TxnId, Value, UNCOMMITTED};
use crate::storage::buffer::BufferManager;
use crate::storage::layout::StorageLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentStatus {
    Unsealed,
    Sealed,
    Compacting,
    Deprecated,
}

/// Outline checkpoint of one block column: chunks written so far and the
/// file offset past the last chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineInfo {
    pub next_index: u32,
    pub last_offset: u64,
}

/// Wire/serialized shape of a block, carried by Import and Compact commands
/// and by catalog deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub block_id: BlockId,
    pub row_count: u32,
    pub row_capacity: u32,
    pub outline_infos: Vec<OutlineInfo>,
}

/// Wire/serialized shape of a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub row_count: u64,
    pub actual_row_count: u64,
    pub row_capacity: u64,
    pub column_count: u32,
    pub blocks: Vec<BlockInfo>,
}

/// Variable-length column data of one block, outlined to `col<id>` files.
/// The entry holds offsets only; bytes go through the buffer manager.
#[derive(Debug)]
pub struct BlockColumnEntry {
    pub column_id: ColumnId,
    pub file: PathBuf,
    outline: RwLock<OutlineInfo>,
}

impl BlockColumnEntry {
    pub fn new(block_dir: &Path, column_id: ColumnId) -> Self {
        BlockColumnEntry {
            column_id,
            file: StorageLayout::column_file(block_dir, column_id),
            outline: RwLock::new(OutlineInfo::default()),
        }
    }

    pub fn new_replay(block_dir: &Path, column_id: ColumnId, outline: OutlineInfo) -> Self {
        BlockColumnEntry {
            column_id,
            file: StorageLayout::column_file(block_dir, column_id),
            outline: RwLock::new(outline),
        }
    }

    pub fn outline(&self) -> OutlineInfo {
        *self.outline.read()
    }

    pub fn set_outline(&self, outline: OutlineInfo) {
        *self.outline.write() = outline;
    }

    /// Write one chunk of values at the current outline offset.
    pub fn write_chunk(&self, buffer: &BufferManager, values: &[Value]) -> Result<()> {
        let body = bincode::serialize(values)?;
        let mut bytes = Vec::with_capacity(4 + body.len());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        let mut outline = self.outline.write();
        buffer.write_at(&self.file, outline.last_offset, &bytes)?;
        outline.next_index += 1;
        outline.last_offset += bytes.len() as u64;
        Ok(())
    }

    /// Materialize every chunk up to the outline checkpoint.
    pub fn read_all(&self, buffer: &BufferManager) -> Result<Vec<Value>> {
        let outline = self.outline();
        if outline.last_offset == 0 {
            return Ok(Vec::new());
        }
        let pin = buffer.pin(&self.file, 0, outline.last_offset as usize)?;
        let bytes: &[u8] = &pin;

        let mut values = Vec::new();
        let mut pos = 0usize;
        while pos + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let chunk: Vec<Value> = bincode::deserialize(&bytes[pos..pos + len])?;
            values.extend(chunk);
            pos += len;
        }
        Ok(values)
    }
}

/// Fixed-capacity row container inside a segment.
#[derive(Debug)]
pub struct BlockEntry {
    pub block_id: BlockId,
    pub version: EntryVersion,
    pub row_capacity: u32,
    pub dir: PathBuf,
    row_count: AtomicU64,
    checkpoint_ts: AtomicU64,
    checkpoint_row_count: AtomicU64,
    pub columns: Vec<Arc<BlockColumnEntry>>,
}

impl BlockEntry {
    pub fn new(
        segment_dir: &Path,
        block_id: BlockId,
        row_capacity: u32,
        column_count: usize,
        txn_id: TxnId,
        begin_ts: Ts,
    ) -> Self {
        let dir = StorageLayout::block_dir(segment_dir, block_id);
        let columns = (0..column_count as ColumnId)
            .map(|column_id| Arc::new(BlockColumnEntry::new(&dir, column_id)))
            .collect();
        BlockEntry {
            block_id,
            version: EntryVersion::new(txn_id, begin_ts),
            row_capacity,
            dir,
            row_count: AtomicU64::new(0),
            checkpoint_ts: AtomicU64::new(UNCOMMITTED),
            checkpoint_row_count: AtomicU64::new(0),
            columns,
        }
    }

    /// Reconstruct a block from recorded offsets; no data rewrite.
    pub fn new_replay(
        segment_dir: &Path,
        info: &BlockInfo,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Self {
        let dir = StorageLayout::block_dir(segment_dir, info.block_id);
        let columns = info
            .outline_infos
            .iter()
            .enumerate()
            .map(|(column_id, outline)| {
                Arc::new(BlockColumnEntry::new_replay(
                    &dir,
                    column_id as ColumnId,
                    *outline,
                ))
            })
            .collect();
        BlockEntry {
            block_id: info.block_id,
            version: EntryVersion::new_replay(txn_id, commit_ts, false),
            row_capacity: info.row_capacity,
            dir,
            row_count: AtomicU64::new(info.row_count as u64),
            checkpoint_ts: AtomicU64::new(commit_ts),
            checkpoint_row_count: AtomicU64::new(info.row_count as u64),
            columns,
        }
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    pub fn checkpoint_ts(&self) -> Ts {
        self.checkpoint_ts.load(Ordering::Acquire)
    }

    pub fn checkpoint_row_count(&self) -> u64 {
        self.checkpoint_row_count.load(Ordering::Acquire)
    }

    /// Write one column-major batch into this block's column files.
    pub fn write_rows(&self, buffer: &BufferManager, columns: &[&[Value]]) -> Result<u64> {
        debug_assert_eq!(columns.len(), self.columns.len());
        let rows = columns.first().map(|c| c.len()).unwrap_or(0) as u64;
        for (entry, values) in self.columns.iter().zip(columns.iter()) {
            entry.write_chunk(buffer, values)?;
        }
        self.row_count.fetch_add(rows, Ordering::SeqCst);
        Ok(rows)
    }

    /// Stamp commit state after the WAL entry is durable.
    pub fn commit(&self, commit_ts: Ts) {
        self.version.set_commit_ts(commit_ts);
        self.checkpoint_ts.store(commit_ts, Ordering::Release);
        self.checkpoint_row_count
            .store(self.row_count(), Ordering::Release);
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            block_id: self.block_id,
            row_count: self.row_count() as u32,
            row_capacity: self.row_capacity,
            outline_infos: self.columns.iter().map(|c| c.outline()).collect(),
        }
    }

    /// Bring this block up to the recorded state of `info`.
    pub fn apply_info(&self, info: &BlockInfo, commit_ts: Ts) {
        self.row_count.store(info.row_count as u64, Ordering::Release);
        self.checkpoint_ts.store(commit_ts, Ordering::Release);
        self.checkpoint_row_count
            .store(info.row_count as u64, Ordering::Release);
        for (column, outline) in self.columns.iter().zip(info.outline_infos.iter()) {
            column.set_outline(*outline);
        }
    }
}

impl Versioned for BlockEntry {
    fn version(&self) -> &EntryVersion {
        &self.version
    }
}

/// Row container owning an ordered list of blocks.
#[derive(Debug)]
pub struct SegmentEntry {
    pub segment_id: SegmentId,
    pub version: EntryVersion,
    pub row_capacity: u64,
    pub column_count: usize,
    pub dir: PathBuf,
    status: RwLock<SegmentStatus>,
    row_count: AtomicU64,
    actual_row_count: AtomicU64,
    min_row_ts: AtomicU64,
    max_row_ts: AtomicU64,
    blocks: RwLock<Vec<Arc<BlockEntry>>>,
    // segment_offset -> commit_ts of the deleting transaction
    delete_map: RwLock<HashMap<u32, Ts>>,
}

impl SegmentEntry {
    pub fn new(
        table_dir: &Path,
        segment_id: SegmentId,
        row_capacity: u64,
        column_count: usize,
        txn_id: TxnId,
        begin_ts: Ts,
    ) -> Self {
        SegmentEntry {
            segment_id,
            version: EntryVersion::new(txn_id, begin_ts),
            row_capacity,
            column_count,
            dir: StorageLayout::segment_dir(table_dir, segment_id),
            status: RwLock::new(SegmentStatus::Unsealed),
            row_count: AtomicU64::new(0),
            actual_row_count: AtomicU64::new(0),
            min_row_ts: AtomicU64::new(UNCOMMITTED),
            max_row_ts: AtomicU64::new(0),
            blocks: RwLock::new(Vec::new()),
            delete_map: RwLock::new(HashMap::new()),
        }
    }

    /// Reconstruct a sealed segment from an Import or Compact command; all
    /// timestamps take the replayed commit timestamp.
    pub fn new_replay(
        table_dir: &Path,
        info: &SegmentInfo,
        txn_id: TxnId,
        commit_ts: Ts,
    ) -> Self {
        let dir = StorageLayout::segment_dir(table_dir, info.segment_id);
        let blocks = info
            .blocks
            .iter()
            .map(|b| Arc::new(BlockEntry::new_replay(&dir, b, txn_id, commit_ts)))
            .collect();
        SegmentEntry {
            segment_id: info.segment_id,
            version: EntryVersion::new_replay(txn_id, commit_ts, false),
            row_capacity: info.row_capacity,
            column_count: info.column_count as usize,
            dir,
            status: RwLock::new(SegmentStatus::Sealed),
            row_count: AtomicU64::new(info.row_count),
            actual_row_count: AtomicU64::new(info.actual_row_count),
            min_row_ts: AtomicU64::new(commit_ts),
            max_row_ts: AtomicU64::new(commit_ts),
            blocks: RwLock::new(blocks),
            delete_map: RwLock::new(HashMap::new()),
        }
    }

    pub fn status(&self) -> SegmentStatus {
        *self.status.read()
    }

    pub fn row_count(&self) -> u64 {
        self.row_count.load(Ordering::Acquire)
    }

    pub fn actual_row_count(&self) -> u64 {
        self.actual_row_count.load(Ordering::Acquire)
    }

    pub fn min_row_ts(&self) -> Ts {
        self.min_row_ts.load(Ordering::Acquire)
    }

    pub fn max_row_ts(&self) -> Ts {
        self.max_row_ts.load(Ordering::Acquire)
    }

    pub fn blocks(&self) -> Vec<Arc<BlockEntry>> {
        self.blocks.read().clone()
    }

    pub fn add_block(&self, block: Arc<BlockEntry>) {
        self.blocks.write().push(block);
    }

    /// Rows this segment can still take before sealing.
    pub fn remaining_capacity(&self) -> u64 {
        let used: u64 = self.blocks.read().iter().map(|b| b.row_count()).sum();
        self.row_capacity.saturating_sub(used)
    }

    pub fn next_block_id(&self) -> BlockId {
        self.blocks.read().len() as BlockId
    }

    pub fn seal(&self) {
        let mut status = self.status.write();
        if *status == SegmentStatus::Unsealed {
            *status = SegmentStatus::Sealed;
        }
    }

    /// Only sealed segments may enter compaction.
    pub fn try_set_compacting(&self) -> bool {
        let mut status = self.status.write();
        if *status == SegmentStatus::Sealed {
            *status = SegmentStatus::Compacting;
            true
        } else {
            false
        }
    }

    pub fn set_deprecated(&self, deprecate_ts: Ts) {
        let mut status = self.status.write();
        if *status != SegmentStatus::Compacting {
            fatal(&format!(
                "segment {} deprecated while {:?}, expected Compacting",
                self.segment_id, *status
            ));
        }
        *status = SegmentStatus::Deprecated;
        self.version.set_deprecate_ts(deprecate_ts);
    }

    pub fn rollback_compacting(&self) {
        let mut status = self.status.write();
        if *status == SegmentStatus::Compacting {
            *status = SegmentStatus::Sealed;
        }
    }

    /// Revert a seal applied during a prepare that later failed.
    pub fn rollback_seal(&self) {
        let mut status = self.status.write();
        if *status == SegmentStatus::Sealed {
            *status = SegmentStatus::Unsealed;
        }
    }

    /// Account rows materialized into blocks but not yet committed.
    pub fn add_rows_built(&self, rows: u64) {
        self.row_count.fetch_add(rows, Ordering::SeqCst);
        self.actual_row_count.fetch_add(rows, Ordering::SeqCst);
    }

    /// Stamp commit timestamps after the WAL entry is durable.
    pub fn commit_stamp(&self, commit_ts: Ts) {
        if !self.version.is_committed() {
            self.version.set_commit_ts(commit_ts);
        }
        let _ = self.min_row_ts.fetch_min(commit_ts, Ordering::SeqCst);
        let _ = self.max_row_ts.fetch_max(commit_ts, Ordering::SeqCst);
    }

    /// Remove blocks staged by a rolled-back transaction.
    pub fn remove_uncommitted_blocks(&self, txn_id: TxnId) {
        self.blocks
            .write()
            .retain(|b| b.version.is_committed() || b.version.txn_id != txn_id);
    }

    /// Every value of one column in block order, deletes included. Used by
    /// index builders, which index rows positionally.
    pub fn read_column_all(
        &self,
        column_id: ColumnId,
        buffer: &BufferManager,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for block in self.blocks.read().iter() {
            let column = &block.columns[column_id as usize];
            let block_values = column.read_all(buffer)?;
            values.extend(block_values.into_iter().take(block.row_count() as usize));
        }
        Ok(values)
    }

    /// Record deletes committed at `commit_ts`. Offsets already deleted are
    /// left at their earlier timestamp (replay no-op).
    pub fn delete_rows(&self, offsets: &[u32], commit_ts: Ts) {
        let mut map = self.delete_map.write();
        let mut newly = 0u64;
        for off in offsets {
            if map.get(off).is_none() {
                map.insert(*off, commit_ts);
                newly += 1;
            }
        }
        drop(map);
        self.actual_row_count.fetch_sub(newly, Ordering::SeqCst);
    }

    pub fn delete_map_snapshot(&self) -> HashMap<u32, Ts> {
        self.delete_map.read().clone()
    }

    pub fn is_row_deleted(&self, offset: u32, snap_ts: Ts) -> bool {
        self.delete_map
            .read()
            .get(&offset)
            .map(|ts| *ts <= snap_ts)
            .unwrap_or(false)
    }

    /// Visible row count at a snapshot: committed blocks minus deletes that
    /// committed at or before the snapshot.
    pub fn visible_row_count(&self, snap_ts: Ts, viewer: TxnId) -> u64 {
        if !self.version.visible(snap_ts, viewer) {
            return 0;
        }
        let from_blocks: u64 = self
            .blocks
            .read()
            .iter()
            .filter(|b| b.version.visible(snap_ts, viewer))
            .map(|b| b.row_count())
            .sum();
        let deleted = self
            .delete_map
            .read()
            .values()
            .filter(|ts| **ts <= snap_ts)
            .count() as u64;
        from_blocks.saturating_sub(deleted)
    }

    /// Materialize one column at a snapshot, yielding surviving rows with
    /// their segment offsets.
    pub fn scan_column(
        &self,
        column_id: ColumnId,
        snap_ts: Ts,
        viewer: TxnId,
        buffer: &BufferManager,
    ) -> Result<Vec<(u32, Value)>> {
        let mut rows = Vec::new();
        if !self.version.visible(snap_ts, viewer) {
            return Ok(rows);
        }
        let mut offset = 0u32;
        for block in self.blocks.read().iter() {
            if !block.version.visible(snap_ts, viewer) {
                continue;
            }
            let column = &block.columns[column_id as usize];
            let values = column.read_all(buffer)?;
            for value in values.into_iter().take(block.row_count() as usize) {
                if !self.is_row_deleted(offset, snap_ts) {
                    rows.push((offset, value));
                }
                offset += 1;
            }
        }
        Ok(rows)
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            segment_id: self.segment_id,
            row_count: self.row_count(),
            actual_row_count: self.actual_row_count(),
            row_capacity: self.row_capacity,
            column_count: self.column_count as u32,
            blocks: self.blocks.read().iter().map(|b| b.info()).collect(),
        }
    }

    /// Upsert from a recorded segment state: extend/refresh blocks, set the
    /// counters, keep the delete map accumulated so far.
    pub fn apply_info(&self, info: &SegmentInfo, txn_id: TxnId, commit_ts: Ts) {
        {
            let mut blocks = self.blocks.write();
            for block_info in &info.blocks {
                match blocks.iter().find(|b| b.block_id == block_info.block_id) {
                    Some(block) => block.apply_info(block_info, commit_ts),
                    None => blocks.push(Arc::new(BlockEntry::new_replay(
                        &self.dir, block_info, txn_id, commit_ts,
                    ))),
                }
            }
            blocks.sort_by_key(|b| b.block_id);
        }
        self.row_count.store(info.row_count, Ordering::Release);
        self.actual_row_count
            .store(info.actual_row_count, Ordering::Release);
        if !self.version.is_committed() {
            self.version.set_commit_ts(commit_ts);
        }
        let _ = self.min_row_ts.fetch_min(commit_ts, Ordering::SeqCst);
        let _ = self.max_row_ts.fetch_max(commit_ts, Ordering::SeqCst);
    }

    pub fn set_status_replay(&self, status: SegmentStatus, deprecate_ts: Option<Ts>) {
        *self.status.write() = status;
        if let Some(ts) = deprecate_ts {
            self.version.set_deprecate_ts(ts);
        }
    }

    /// Rebuild a segment from a full-snapshot record, timestamps included.
    #[allow(clippy::too_many_arguments)]
    pub fn new_from_snapshot(
        table_dir: &Path,
        info: &SegmentInfo,
        txn_id: TxnId,
        commit_ts: Ts,
        deprecate_ts: Ts,
        status: SegmentStatus,
        min_row_ts: Ts,
        max_row_ts: Ts,
        delete_map: HashMap<u32, Ts>,
    ) -> Self {
        let seg = SegmentEntry::new_replay(table_dir, info, txn_id, commit_ts);
        seg.version.set_deprecate_ts(deprecate_ts);
        *seg.status.write() = status;
        seg.min_row_ts.store(min_row_ts, Ordering::Release);
        seg.max_row_ts.store(max_row_ts, Ordering::Release);
        *seg.delete_map.write() = delete_map;
        seg
    }
}

impl Versioned for SegmentEntry {
    fn version(&self) -> &EntryVersion {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> SegmentEntry {
        SegmentEntry::new(Path::new("/tmp/t"), 0, 1024, 2, 1, 1)
    }

    #[test]
    fn compacting_requires_sealed() {
        let seg = segment();
        assert!(!seg.try_set_compacting()); // unsealed
        seg.seal();
        assert!(seg.try_set_compacting());
        assert_eq!(seg.status(), SegmentStatus::Compacting);
        // second attempt no longer sealed
        assert!(!seg.try_set_compacting());
    }

    #[test]
    fn deletes_are_snapshot_gated() {
        let seg = segment();
        let block = Arc::new(BlockEntry::new(&seg.dir, 0, 1024, 2, 1, 1));
        block.row_count.store(10, Ordering::SeqCst);
        block.commit(5);
        seg.add_block(block);
        seg.add_rows_built(10);
        seg.commit_stamp(5);

        seg.delete_rows(&[3, 4], 8);
        assert_eq!(seg.visible_row_count(7, 99), 10);
        assert_eq!(seg.visible_row_count(8, 99), 8);
    }

    #[test]
    fn replay_reconstruction_round_trips_info() {
        let info = SegmentInfo {
            segment_id: 3,
            row_count: 100,
            actual_row_count: 100,
            row_capacity: 8192,
            column_count: 2,
            blocks: vec![BlockInfo {
                block_id: 0,
                row_count: 100,
                row_capacity: 8192,
                outline_infos: vec![
                    OutlineInfo { next_index: 1, last_offset: 420 },
                    OutlineInfo { next_index: 1, last_offset: 99 },
                ],
            }],
        };
        let seg = SegmentEntry::new_replay(Path::new("/tmp/t"), &info, 9, 77);
        assert_eq!(seg.status(), SegmentStatus::Sealed);
        assert_eq!(seg.min_row_ts(), 77);
        assert_eq!(seg.version.commit_ts(), 77);
        assert_eq!(seg.info(), info);
    }
}
