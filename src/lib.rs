pub mod core;
pub mod storage;
pub mod analysis;
pub mod catalog;
pub mod index;
pub mod scoring;
pub mod txn;
pub mod wal;

pub use crate::core::config::{Config, FlushOption};
pub use crate::core::engine::Engine;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{
    ColumnDef, DataBlock, DataType, RowId, SegmentId, TableDef, Ts, TxnId, Value, UNCOMMITTED,
};
pub use crate::catalog::entry::ConflictType;
pub use crate::catalog::index::IndexDef;
