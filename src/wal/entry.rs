use crc32fast::Hasher;
use crate::catalog::index::IndexDef;
use crate::catalog::segment::{BlockInfo, OutlineInfo, SegmentInfo};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DataBlock, RowId, SegmentId, TableDef, Ts, TxnId};

/// Logical commands a WAL entry can carry, one per mutating operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WalCmd {
    CreateDatabase {
        db_name: String,
        db_dir_tail: String,
    },
    DropDatabase {
        db_name: String,
    },
    CreateTable {
        db_name: String,
        table_dir_tail: String,
        def: TableDef,
    },
    DropTable {
        db_name: String,
        table_name: String,
    },
    CreateIndex {
        db_name: String,
        table_name: String,
        index_dir_tail: String,
        def: IndexDef,
    },
    DropIndex {
        db_name: String,
        table_name: String,
        index_name: String,
    },
    Import {
        db_name: String,
        table_name: String,
        segment_info: SegmentInfo,
    },
    Append {
        db_name: String,
        table_name: String,
        block: DataBlock,
    },
    Delete {
        db_name: String,
        table_name: String,
        row_ids: Vec<RowId>,
    },
    Compact {
        db_name: String,
        table_name: String,
        new_segment_infos: Vec<SegmentInfo>,
        deprecated_segment_ids: Vec<SegmentId>,
    },
    Checkpoint {
        max_commit_ts: Ts,
        is_full: bool,
        catalog_path: String,
    },
}

const CMD_CREATE_DATABASE: u8 = 1;
const CMD_DROP_DATABASE: u8 = 2;
const CMD_CREATE_TABLE: u8 = 3;
const CMD_DROP_TABLE: u8 = 4;
const CMD_CREATE_INDEX: u8 = 5;
const CMD_DROP_INDEX: u8 = 6;
const CMD_IMPORT: u8 = 7;
const CMD_APPEND: u8 = 8;
const CMD_DELETE: u8 = 9;
const CMD_COMPACT: u8 = 10;
const CMD_CHECKPOINT: u8 = 11;

/// One WAL record: every command of one committed transaction.
///
/// On-disk framing, little endian:
///   u32 total_size | u64 txn_id | u64 commit_ts | u32 cmd_count |
///   cmd* | u32 checksum
#[derive(Debug, Clone, PartialEq)]
pub struct WalEntry {
    pub txn_id: TxnId,
    pub commit_ts: Ts,
    pub cmds: Vec<WalCmd>,
}

impl WalEntry {
    pub fn new(txn_id: TxnId, commit_ts: Ts, cmds: Vec<WalCmd>) -> Self {
        WalEntry { txn_id, commit_ts, cmds }
    }

    pub fn checkpoint_cmd(&self) -> Option<&WalCmd> {
        self.cmds
            .iter()
            .find(|cmd| matches!(cmd, WalCmd::Checkpoint { .. }))
    }

    /// Predicted serialized size; the flush thread verifies the actual
    /// length matches before the bytes reach the log.
    pub fn size_in_bytes(&self) -> usize {
        // size + txn_id + commit_ts + cmd_count + cmds + checksum
        4 + 8 + 8 + 4 + self.cmds.iter().map(cmd_size).sum::<usize>() + 4
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let expected = self.size_in_bytes();
        let mut buf = Vec::with_capacity(expected);
        write_u32(&mut buf, expected as u32);
        write_u64(&mut buf, self.txn_id);
        write_u64(&mut buf, self.commit_ts);
        write_u32(&mut buf, self.cmds.len() as u32);
        for cmd in &self.cmds {
            write_cmd(&mut buf, cmd)?;
        }

        let mut hasher = Hasher::new();
        hasher.update(&buf);
        write_u32(&mut buf, hasher.finalize());

        if buf.len() != expected {
            return Err(Error::new(
                ErrorKind::Internal,
                format!(
                    "WalEntry estimated size {} differs from actual {}",
                    expected,
                    buf.len()
                ),
            ));
        }
        Ok(buf)
    }

    /// Parse one entry from the head of `bytes`. Returns the entry and the
    /// bytes consumed. `Ok(None)` means a clean truncation (torn tail).
    pub fn parse(bytes: &[u8]) -> Result<Option<(WalEntry, usize)>> {
        if bytes.len() < 4 {
            return Ok(None);
        }
        let total_size = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
        if total_size < 28 {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("WalEntry size {} below minimum framing", total_size),
            ));
        }
        if bytes.len() < total_size {
            return Ok(None);
        }
        let entry_bytes = &bytes[..total_size];

        let stored_checksum =
            u32::from_le_bytes(entry_bytes[total_size - 4..].try_into().unwrap());
        let mut hasher = Hasher::new();
        hasher.update(&entry_bytes[..total_size - 4]);
        if hasher.finalize() != stored_checksum {
            return Err(Error::new(
                ErrorKind::Parse,
                "WalEntry checksum mismatch".to_string(),
            ));
        }

        let mut cursor = Cursor::new(&entry_bytes[4..total_size - 4]);
        let txn_id = cursor.read_u64()?;
        let commit_ts = cursor.read_u64()?;
        let cmd_count = cursor.read_u32()? as usize;
        let mut cmds = Vec::with_capacity(cmd_count);
        for _ in 0..cmd_count {
            cmds.push(read_cmd(&mut cursor)?);
        }

        Ok(Some((WalEntry { txn_id, commit_ts, cmds }, total_size)))
    }
}

// ---------------------------------------------------------------------------
// codec helpers
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::new(
                ErrorKind::Parse,
                "WalEntry truncated inside command payload".to_string(),
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::new(ErrorKind::Parse, "invalid utf8 in WAL string".to_string()))
    }

    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }
}

fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn string_size(s: &str) -> usize {
    4 + s.len()
}

fn table_def_size(def: &TableDef) -> usize {
    string_size(&def.name)
        + 4
        + def
            .columns
            .iter()
            .map(|c| 4 + string_size(&c.name) + 1 + 1 + c.constraints.len())
            .sum::<usize>()
}

fn write_table_def(buf: &mut Vec<u8>, def: &TableDef) {
    write_string(buf, &def.name);
    write_u32(buf, def.columns.len() as u32);
    for column in &def.columns {
        write_u32(buf, column.id);
        write_string(buf, &column.name);
        write_u8(buf, data_type_tag(column.dtype));
        write_u8(buf, column.constraints.len() as u8);
        for constraint in &column.constraints {
            write_u8(buf, constraint_tag(*constraint));
        }
    }
}

fn read_table_def(cursor: &mut Cursor) -> Result<TableDef> {
    use crate::core::types::ColumnDef;
    let name = cursor.read_string()?;
    let column_count = cursor.read_u32()? as usize;
    let mut columns = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        let id = cursor.read_u32()?;
        let column_name = cursor.read_string()?;
        let dtype = data_type_from_tag(cursor.read_u8()?)?;
        let constraint_count = cursor.read_u8()? as usize;
        let mut constraints = Vec::with_capacity(constraint_count);
        for _ in 0..constraint_count {
            constraints.push(constraint_from_tag(cursor.read_u8()?)?);
        }
        columns.push(ColumnDef { id, name: column_name, dtype, constraints });
    }
    Ok(TableDef { name, columns })
}

fn index_def_size(def: &IndexDef) -> usize {
    string_size(&def.name) + 1 + string_size(&def.column_name) + string_size(def.analyzer())
}

fn write_index_def(buf: &mut Vec<u8>, def: &IndexDef) {
    write_string(buf, &def.name);
    write_u8(buf, 1); // fulltext
    write_string(buf, &def.column_name);
    write_string(buf, def.analyzer());
}

fn read_index_def(cursor: &mut Cursor) -> Result<IndexDef> {
    let name = cursor.read_string()?;
    let kind = cursor.read_u8()?;
    if kind != 1 {
        return Err(Error::new(
            ErrorKind::Parse,
            format!("unknown index kind tag {}", kind),
        ));
    }
    let column_name = cursor.read_string()?;
    let analyzer = cursor.read_string()?;
    Ok(IndexDef::fulltext(&name, &column_name, &analyzer))
}

fn segment_info_size(info: &SegmentInfo) -> usize {
    4 + 8
        + 8
        + 8
        + 4
        + 4
        + info
            .blocks
            .iter()
            .map(|b| 4 + 4 + 4 + 4 + b.outline_infos.len() * (4 + 8))
            .sum::<usize>()
}

fn write_segment_info(buf: &mut Vec<u8>, info: &SegmentInfo) {
    write_u32(buf, info.segment_id);
    write_u64(buf, info.row_count);
    write_u64(buf, info.actual_row_count);
    write_u64(buf, info.row_capacity);
    write_u32(buf, info.column_count);
    write_u32(buf, info.blocks.len() as u32);
    for block in &info.blocks {
        write_u32(buf, block.block_id);
        write_u32(buf, block.row_count);
        write_u32(buf, block.row_capacity);
        write_u32(buf, block.outline_infos.len() as u32);
        for outline in &block.outline_infos {
            write_u32(buf, outline.next_index);
            write_u64(buf, outline.last_offset);
        }
    }
}

fn read_segment_info(cursor: &mut Cursor) -> Result<SegmentInfo> {
    let segment_id = cursor.read_u32()?;
    let row_count = cursor.read_u64()?;
    let actual_row_count = cursor.read_u64()?;
    let row_capacity = cursor.read_u64()?;
    let column_count = cursor.read_u32()?;
    let block_count = cursor.read_u32()? as usize;
    let mut blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        let block_id = cursor.read_u32()?;
        let block_row_count = cursor.read_u32()?;
        let row_capacity = cursor.read_u32()?;
        let outline_count = cursor.read_u32()? as usize;
        let mut outline_infos = Vec::with_capacity(outline_count);
        for _ in 0..outline_count {
            let next_index = cursor.read_u32()?;
            let last_offset = cursor.read_u64()?;
            outline_infos.push(OutlineInfo { next_index, last_offset });
        }
        blocks.push(BlockInfo {
            block_id,
            row_count: block_row_count,
            row_capacity,
            outline_infos,
        });
    }
    Ok(SegmentInfo {
        segment_id,
        row_count,
        actual_row_count,
        row_capacity,
        column_count,
        blocks,
    })
}

fn data_type_tag(dtype: crate::core::types::DataType) -> u8 {
    use crate::core::types::DataType::*;
    match dtype {
        Varchar => 1,
        BigInt => 2,
        Double => 3,
        Bool => 4,
        Timestamp => 5,
    }
}

fn data_type_from_tag(tag: u8) -> Result<crate::core::types::DataType> {
    use crate::core::types::DataType::*;
    Ok(match tag {
        1 => Varchar,
        2 => BigInt,
        3 => Double,
        4 => Bool,
        5 => Timestamp,
        _ => {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("unknown data type tag {}", tag),
            ))
        }
    })
}

fn constraint_tag(c: crate::core::types::Constraint) -> u8 {
    use crate::core::types::Constraint::*;
    match c {
        PrimaryKey => 1,
        Unique => 2,
        NotNull => 3,
    }
}

fn constraint_from_tag(tag: u8) -> Result<crate::core::types::Constraint> {
    use crate::core::types::Constraint::*;
    Ok(match tag {
        1 => PrimaryKey,
        2 => Unique,
        3 => NotNull,
        _ => {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("unknown constraint tag {}", tag),
            ))
        }
    })
}

fn block_payload(block: &DataBlock) -> Result<Vec<u8>> {
    Ok(bincode::serialize(block)?)
}

fn cmd_size(cmd: &WalCmd) -> usize {
    1 + match cmd {
        WalCmd::CreateDatabase { db_name, db_dir_tail } => {
            string_size(db_name) + string_size(db_dir_tail)
        }
        WalCmd::DropDatabase { db_name } => string_size(db_name),
        WalCmd::CreateTable { db_name, table_dir_tail, def } => {
            string_size(db_name) + string_size(table_dir_tail) + table_def_size(def)
        }
        WalCmd::DropTable { db_name, table_name } => {
            string_size(db_name) + string_size(table_name)
        }
        WalCmd::CreateIndex { db_name, table_name, index_dir_tail, def } => {
            string_size(db_name)
                + string_size(table_name)
                + string_size(index_dir_tail)
                + index_def_size(def)
        }
        WalCmd::DropIndex { db_name, table_name, index_name } => {
            string_size(db_name) + string_size(table_name) + string_size(index_name)
        }
        WalCmd::Import { db_name, table_name, segment_info } => {
            string_size(db_name) + string_size(table_name) + segment_info_size(segment_info)
        }
        WalCmd::Append { db_name, table_name, block } => {
            // payload re-serialized in write_cmd; lengths agree because
            // bincode encoding of an unchanged value is deterministic
            string_size(db_name)
                + string_size(table_name)
                + 4
                + bincode::serialized_size(block).unwrap_or(0) as usize
        }
        WalCmd::Delete { db_name, table_name, row_ids } => {
            string_size(db_name) + string_size(table_name) + 4 + row_ids.len() * 8
        }
        WalCmd::Compact { db_name, table_name, new_segment_infos, deprecated_segment_ids } => {
            string_size(db_name)
                + string_size(table_name)
                + 4
                + new_segment_infos.iter().map(segment_info_size).sum::<usize>()
                + 4
                + deprecated_segment_ids.len() * 4
        }
        WalCmd::Checkpoint { catalog_path, .. } => 8 + 1 + string_size(catalog_path),
    }
}

fn write_cmd(buf: &mut Vec<u8>, cmd: &WalCmd) -> Result<()> {
    match cmd {
        WalCmd::CreateDatabase { db_name, db_dir_tail } => {
            write_u8(buf, CMD_CREATE_DATABASE);
            write_string(buf, db_name);
            write_string(buf, db_dir_tail);
        }
        WalCmd::DropDatabase { db_name } => {
            write_u8(buf, CMD_DROP_DATABASE);
            write_string(buf, db_name);
        }
        WalCmd::CreateTable { db_name, table_dir_tail, def } => {
            write_u8(buf, CMD_CREATE_TABLE);
            write_string(buf, db_name);
            write_string(buf, table_dir_tail);
            write_table_def(buf, def);
        }
        WalCmd::DropTable { db_name, table_name } => {
            write_u8(buf, CMD_DROP_TABLE);
            write_string(buf, db_name);
            write_string(buf, table_name);
        }
        WalCmd::CreateIndex { db_name, table_name, index_dir_tail, def } => {
            write_u8(buf, CMD_CREATE_INDEX);
            write_string(buf, db_name);
            write_string(buf, table_name);
            write_string(buf, index_dir_tail);
            write_index_def(buf, def);
        }
        WalCmd::DropIndex { db_name, table_name, index_name } => {
            write_u8(buf, CMD_DROP_INDEX);
            write_string(buf, db_name);
            write_string(buf, table_name);
            write_string(buf, index_name);
        }
        WalCmd::Import { db_name, table_name, segment_info } => {
            write_u8(buf, CMD_IMPORT);
            write_string(buf, db_name);
            write_string(buf, table_name);
            write_segment_info(buf, segment_info);
        }
        WalCmd::Append { db_name, table_name, block } => {
            write_u8(buf, CMD_APPEND);
            write_string(buf, db_name);
            write_string(buf, table_name);
            let payload = block_payload(block)?;
            write_u32(buf, payload.len() as u32);
            buf.extend_from_slice(&payload);
        }
        WalCmd::Delete { db_name, table_name, row_ids } => {
            write_u8(buf, CMD_DELETE);
            write_string(buf, db_name);
            write_string(buf, table_name);
            write_u32(buf, row_ids.len() as u32);
            for row_id in row_ids {
                write_u64(buf, row_id.as_u64());
            }
        }
        WalCmd::Compact { db_name, table_name, new_segment_infos, deprecated_segment_ids } => {
            write_u8(buf, CMD_COMPACT);
            write_string(buf, db_name);
            write_string(buf, table_name);
            write_u32(buf, new_segment_infos.len() as u32);
            for info in new_segment_infos {
                write_segment_info(buf, info);
            }
            write_u32(buf, deprecated_segment_ids.len() as u32);
            for segment_id in deprecated_segment_ids {
                write_u32(buf, *segment_id);
            }
        }
        WalCmd::Checkpoint { max_commit_ts, is_full, catalog_path } => {
            write_u8(buf, CMD_CHECKPOINT);
            write_u64(buf, *max_commit_ts);
            write_u8(buf, *is_full as u8);
            write_string(buf, catalog_path);
        }
    }
    Ok(())
}

fn read_cmd(cursor: &mut Cursor) -> Result<WalCmd> {
    let tag = cursor.read_u8()?;
    Ok(match tag {
        CMD_CREATE_DATABASE => WalCmd::CreateDatabase {
            db_name: cursor.read_string()?,
            db_dir_tail: cursor.read_string()?,
        },
        CMD_DROP_DATABASE => WalCmd::DropDatabase {
            db_name: cursor.read_string()?,
        },
        CMD_CREATE_TABLE => WalCmd::CreateTable {
            db_name: cursor.read_string()?,
            table_dir_tail: cursor.read_string()?,
            def: read_table_def(cursor)?,
        },
        CMD_DROP_TABLE => WalCmd::DropTable {
            db_name: cursor.read_string()?,
            table_name: cursor.read_string()?,
        },
        CMD_CREATE_INDEX => WalCmd::CreateIndex {
            db_name: cursor.read_string()?,
            table_name: cursor.read_string()?,
            index_dir_tail: cursor.read_string()?,
            def: read_index_def(cursor)?,
        },
        CMD_DROP_INDEX => WalCmd::DropIndex {
            db_name: cursor.read_string()?,
            table_name: cursor.read_string()?,
            index_name: cursor.read_string()?,
        },
        CMD_IMPORT => WalCmd::Import {
            db_name: cursor.read_string()?,
            table_name: cursor.read_string()?,
            segment_info: read_segment_info(cursor)?,
        },
        CMD_APPEND => {
            let db_name = cursor.read_string()?;
            let table_name = cursor.read_string()?;
            let payload = cursor.read_bytes()?;
            WalCmd::Append {
                db_name,
                table_name,
                block: bincode::deserialize(payload)?,
            }
        }
        CMD_DELETE => {
            let db_name = cursor.read_string()?;
            let table_name = cursor.read_string()?;
            let count = cursor.read_u32()? as usize;
            let mut row_ids = Vec::with_capacity(count);
            for _ in 0..count {
                row_ids.push(RowId::from_u64(cursor.read_u64()?));
            }
            WalCmd::Delete { db_name, table_name, row_ids }
        }
        CMD_COMPACT => {
            let db_name = cursor.read_string()?;
            let table_name = cursor.read_string()?;
            let new_count = cursor.read_u32()? as usize;
            let mut new_segment_infos = Vec::with_capacity(new_count);
            for _ in 0..new_count {
                new_segment_infos.push(read_segment_info(cursor)?);
            }
            let dep_count = cursor.read_u32()? as usize;
            let mut deprecated_segment_ids = Vec::with_capacity(dep_count);
            for _ in 0..dep_count {
                deprecated_segment_ids.push(cursor.read_u32()?);
            }
            WalCmd::Compact {
                db_name,
                table_name,
                new_segment_infos,
                deprecated_segment_ids,
            }
        }
        CMD_CHECKPOINT => WalCmd::Checkpoint {
            max_commit_ts: cursor.read_u64()?,
            is_full: cursor.read_u8()? != 0,
            catalog_path: cursor.read_string()?,
        },
        _ => {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("unknown WAL command type {}", tag),
            ))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ColumnDef, DataType, Value};

    fn sample_entry() -> WalEntry {
        let def = TableDef::new(
            "t1",
            vec![
                ColumnDef::new(0, "id", DataType::Varchar),
                ColumnDef::new(1, "text", DataType::Varchar),
            ],
        );
        let mut block = DataBlock::new(2);
        block.push_row(&[
            Value::Varchar("r1".to_string()),
            Value::Varchar("hello world".to_string()),
        ]);

        WalEntry::new(
            42,
            100,
            vec![
                WalCmd::CreateDatabase {
                    db_name: "d1".to_string(),
                    db_dir_tail: "d1".to_string(),
                },
                WalCmd::CreateTable {
                    db_name: "d1".to_string(),
                    table_dir_tail: "t1".to_string(),
                    def,
                },
                WalCmd::Append {
                    db_name: "d1".to_string(),
                    table_name: "t1".to_string(),
                    block,
                },
                WalCmd::Delete {
                    db_name: "d1".to_string(),
                    table_name: "t1".to_string(),
                    row_ids: vec![RowId::new(0, 3), RowId::new(1, 7)],
                },
                WalCmd::Compact {
                    db_name: "d1".to_string(),
                    table_name: "t1".to_string(),
                    new_segment_infos: vec![SegmentInfo {
                        segment_id: 2,
                        row_count: 10,
                        actual_row_count: 9,
                        row_capacity: 8192,
                        column_count: 2,
                        blocks: vec![BlockInfo {
                            block_id: 0,
                            row_count: 10,
                            row_capacity: 8192,
                            outline_infos: vec![OutlineInfo { next_index: 1, last_offset: 64 }],
                        }],
                    }],
                    deprecated_segment_ids: vec![0, 1],
                },
                WalCmd::Checkpoint {
                    max_commit_ts: 99,
                    is_full: true,
                    catalog_path: "catalog/FULL.99.json".to_string(),
                },
            ],
        )
    }

    #[test]
    fn serialize_parse_round_trip() {
        let entry = sample_entry();
        let bytes = entry.serialize().unwrap();
        assert_eq!(bytes.len(), entry.size_in_bytes());

        let (parsed, consumed) = WalEntry::parse(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, entry);
    }

    #[test]
    fn truncated_entry_parses_as_none() {
        let bytes = sample_entry().serialize().unwrap();
        assert!(WalEntry::parse(&bytes[..bytes.len() - 1]).unwrap().is_none());
        assert!(WalEntry::parse(&bytes[..2]).unwrap().is_none());
    }

    #[test]
    fn corrupt_entry_fails_checksum() {
        let mut bytes = sample_entry().serialize().unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        assert!(WalEntry::parse(&bytes).is_err());
    }

    #[test]
    fn entries_concatenate_in_a_log() {
        let a = sample_entry();
        let b = WalEntry::new(43, 101, vec![WalCmd::DropDatabase { db_name: "d1".to_string() }]);
        let mut log = a.serialize().unwrap();
        log.extend_from_slice(&b.serialize().unwrap());

        let (first, n) = WalEntry::parse(&log).unwrap().unwrap();
        let (second, m) = WalEntry::parse(&log[n..]).unwrap().unwrap();
        assert_eq!(first.txn_id, 42);
        assert_eq!(second.txn_id, 43);
        assert_eq!(n + m, log.len());
    }
}
