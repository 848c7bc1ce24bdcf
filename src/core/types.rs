use std::collections::HashMap;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transaction timestamp. Commit timestamps are allocated from a monotonic
/// counter; `UNCOMMITTED` marks entries whose transaction has not committed.
pub type Ts = u64;

pub const UNCOMMITTED: Ts = u64::MAX;

pub type TxnId = u64;

pub type SegmentId = u32;
pub type BlockId = u32;
pub type ColumnId = u32;

pub const INVALID_SEGMENT_ID: SegmentId = u32::MAX;

pub const DEFAULT_BLOCK_CAPACITY: usize = 8192;          // rows per block
pub const DEFAULT_BLOCKS_PER_SEGMENT: usize = 64;        // blocks per segment
pub const DEFAULT_SEGMENT_CAPACITY: usize = DEFAULT_BLOCK_CAPACITY * DEFAULT_BLOCKS_PER_SEGMENT;

/// Global row address: segment plus offset inside the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    pub segment_id: SegmentId,
    pub segment_offset: u32,
}

impl RowId {
    pub fn new(segment_id: SegmentId, segment_offset: u32) -> Self {
        RowId { segment_id, segment_offset }
    }

    pub fn as_u64(&self) -> u64 {
        ((self.segment_id as u64) << 32) | self.segment_offset as u64
    }

    pub fn from_u64(v: u64) -> Self {
        RowId {
            segment_id: (v >> 32) as u32,
            segment_offset: v as u32,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.segment_offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Varchar,
    BigInt,
    Double,
    Bool,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Varchar(String),
    BigInt(i64),
    Double(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Varchar(_) => DataType::Varchar,
            Value::BigInt(_) => DataType::BigInt,
            Value::Double(_) => DataType::Double,
            Value::Bool(_) => DataType::Bool,
            Value::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constraint {
    PrimaryKey,
    Unique,
    NotNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    pub dtype: DataType,
    pub constraints: Vec<Constraint>,
}

impl ColumnDef {
    pub fn new(id: ColumnId, name: &str, dtype: DataType) -> Self {
        ColumnDef {
            id,
            name: name.to_string(),
            dtype,
            constraints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        TableDef { name: name.to_string(), columns }
    }

    pub fn column_id_by_name(&self, name: &str) -> Option<ColumnId> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.id)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Column-major batch of rows, the unit carried by append operations and
/// `Append` WAL commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBlock {
    pub row_count: usize,
    pub columns: Vec<Vec<Value>>,
}

impl DataBlock {
    pub fn new(column_count: usize) -> Self {
        DataBlock {
            row_count: 0,
            columns: vec![Vec::new(); column_count],
        }
    }

    pub fn push_row(&mut self, row: &[Value]) {
        debug_assert_eq!(row.len(), self.columns.len());
        for (col, v) in self.columns.iter_mut().zip(row.iter()) {
            col.push(v.clone());
        }
        self.row_count += 1;
    }

    pub fn column(&self, idx: usize) -> &[Value] {
        &self.columns[idx]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Map of column name to field value, convenience shape for loaders and tests.
pub type RowFields = HashMap<String, Value>;
