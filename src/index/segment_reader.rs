use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use fst::Map;
use memmap2::Mmap;
use crate::catalog::index::PostingBase;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RowId;
use crate::index::memory_indexer::MemoryIndexer;
use crate::index::posting::{PostingList, SegmentPosting};
use crate::storage::buffer::SessionPool;

/// One source of postings for a term inside a column index.
pub trait IndexSegmentReader: Send + Sync {
    fn segment_posting(&self, term: &str, pool: &SessionPool) -> Result<Option<SegmentPosting>>;
}

/// Reader over one flushed posting base: an fst term dictionary plus a
/// memory-mapped posting file.
pub struct DiskSegmentReader {
    pub base_row_id: RowId,
    dict: Map<Mmap>,
    postings: Mmap,
    doc_lengths: Arc<Vec<u32>>,
}

impl DiskSegmentReader {
    pub fn open(index_dir: &Path, base: &PostingBase) -> Result<Self> {
        let dic_file = File::open(index_dir.join(format!("{}.dic", base.base_name)))?;
        let pos_file = File::open(index_dir.join(format!("{}.pos", base.base_name)))?;
        let len_path = index_dir.join(format!("{}.len", base.base_name));

        let dic_mmap = unsafe { Mmap::map(&dic_file)? };
        let postings = unsafe { Mmap::map(&pos_file)? };
        let dict = Map::new(dic_mmap)?;

        let doc_lengths: Vec<u32> = bincode::deserialize(&std::fs::read(len_path)?)?;

        Ok(DiskSegmentReader {
            base_row_id: base.base_row_id,
            dict,
            postings,
            doc_lengths: Arc::new(doc_lengths),
        })
    }
}

impl IndexSegmentReader for DiskSegmentReader {
    fn segment_posting(&self, term: &str, pool: &SessionPool) -> Result<Option<SegmentPosting>> {
        let offset = match self.dict.get(term.as_bytes()) {
            Some(offset) => offset as usize,
            None => return Ok(None),
        };

        let bytes: &[u8] = &self.postings;
        if offset + 4 > bytes.len() {
            return Err(Error::new(
                ErrorKind::Parse,
                format!("posting offset {} out of range", offset),
            ));
        }
        let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        let body = &bytes[offset + 4..offset + 4 + len];

        pool.charge(len)?;
        let list: PostingList = bincode::deserialize(body)?;

        Ok(Some(SegmentPosting {
            base_row_id: self.base_row_id,
            postings: Arc::new(list),
            column_lengths: self.doc_lengths.clone(),
        }))
    }
}

/// Reader over the in-memory indexer of a segment still accepting rows.
pub struct InMemSegmentReader {
    indexer: Arc<MemoryIndexer>,
}

impl InMemSegmentReader {
    pub fn new(indexer: Arc<MemoryIndexer>) -> Self {
        InMemSegmentReader { indexer }
    }
}

impl IndexSegmentReader for InMemSegmentReader {
    fn segment_posting(&self, term: &str, pool: &SessionPool) -> Result<Option<SegmentPosting>> {
        match self.indexer.segment_posting(term) {
            Some(sp) => {
                pool.charge(sp.postings.len() * std::mem::size_of::<u32>() * 3)?;
                Ok(Some(sp))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyzer::Analyzer;
    use tempfile::TempDir;

    #[test]
    fn disk_reader_round_trips_dumped_postings() {
        let dir = TempDir::new().unwrap();
        let indexer = MemoryIndexer::new("ft_0".to_string(), RowId::new(2, 0));
        let analyzer = Analyzer::standard();
        indexer.insert(
            &[
                "harmful chemical anarchy".to_string(),
                "quiet garden".to_string(),
                "harmful harmful harmful".to_string(),
            ],
            &analyzer,
        );

        let (base, len_sum, len_count) = indexer.dump(dir.path()).unwrap();
        assert_eq!(len_count, 3);
        assert_eq!(len_sum, 8);

        let reader = DiskSegmentReader::open(dir.path(), &base).unwrap();
        let pool = SessionPool::new(1 << 20);

        let sp = reader.segment_posting("harmful", &pool).unwrap().unwrap();
        assert_eq!(sp.postings.doc_freq(), 2);
        assert_eq!(sp.postings.postings[1].term_freq, 3);
        assert_eq!(sp.base_row_id, RowId::new(2, 0));
        assert_eq!(sp.column_lengths.len(), 3);

        assert!(reader.segment_posting("garden", &pool).unwrap().is_some());
        assert!(reader.segment_posting("absent", &pool).unwrap().is_none());
        assert!(pool.current_usage() > 0);
    }
}
