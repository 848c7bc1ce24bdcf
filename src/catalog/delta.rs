use serde::{Deserialize, Serialize};
use crate::catalog::index::{IndexDef, PostingBase};
use crate::catalog::segment::{SegmentInfo, SegmentStatus};
use crate::core::types::{RowId, SegmentId, TableDef, Ts, TxnId};

/// Entry-level catalog mutations, the serializable twin of what a committed
/// transaction did to the shared catalog. Delta checkpoints persist these;
/// recovery replays them over the last full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeltaOp {
    AddDatabase {
        db_name: String,
        dir_tail: String,
        deleted: bool,
    },
    AddTable {
        db_name: String,
        def: TableDef,
        dir_tail: String,
        deleted: bool,
    },
    /// Upsert of one segment's physical state as of the op's commit.
    SetSegment {
        db_name: String,
        table_name: String,
        info: SegmentInfo,
        status: SegmentStatus,
        deprecate_ts: Option<Ts>,
    },
    DeleteRows {
        db_name: String,
        table_name: String,
        row_ids: Vec<RowId>,
    },
    AddIndex {
        db_name: String,
        table_name: String,
        def: IndexDef,
        dir_tail: String,
        deleted: bool,
    },
    SetSegmentIndex {
        db_name: String,
        table_name: String,
        index_name: String,
        segment_id: SegmentId,
        bases: Vec<PostingBase>,
        column_len_sum: u64,
        column_len_count: u32,
        update_ts: Ts,
    },
}

/// Delta ops of one committed transaction, in application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDeltaEntry {
    pub txn_id: TxnId,
    pub commit_ts: Ts,
    pub ops: Vec<DeltaOp>,
}
