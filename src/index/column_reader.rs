use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use crate::catalog::index::SegmentIndexEntry;
use crate::core::error::{fatal, Result};
use crate::core::types::SegmentId;
use crate::index::posting::{PostingIterator, SegmentPosting};
use crate::index::segment_reader::{DiskSegmentReader, IndexSegmentReader, InMemSegmentReader};
use crate::index::term_doc_iterator::BlockMaxTermDocIterator;
use crate::scoring::scorer::TermStats;
use crate::storage::buffer::SessionPool;

/// Snapshot of every segment reader of one indexed column.
///
/// Construction walks segments in ascending id order; each on-disk posting
/// base contributes a `DiskSegmentReader` and a non-empty in-memory indexer
/// contributes an `InMemSegmentReader` behind them.
pub struct ColumnIndexReader {
    pub index_dir: PathBuf,
    segment_readers: Vec<Box<dyn IndexSegmentReader>>,
    index_by_segment: BTreeMap<SegmentId, Arc<SegmentIndexEntry>>,
}

impl std::fmt::Debug for ColumnIndexReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnIndexReader")
            .field("index_dir", &self.index_dir)
            .field("segment_readers", &self.segment_readers.len())
            .field("index_by_segment", &self.index_by_segment)
            .finish()
    }
}

impl ColumnIndexReader {
    pub fn open(
        index_dir: PathBuf,
        index_by_segment: BTreeMap<SegmentId, Arc<SegmentIndexEntry>>,
    ) -> Result<Self> {
        let mut segment_readers: Vec<Box<dyn IndexSegmentReader>> = Vec::new();
        for segment_index in index_by_segment.values() {
            let (bases, memory_indexer) = segment_index.fulltext_snapshot();
            for base in &bases {
                segment_readers.push(Box::new(DiskSegmentReader::open(&index_dir, base)?));
            }
            if let Some(indexer) = memory_indexer {
                segment_readers.push(Box::new(InMemSegmentReader::new(indexer)));
            }
        }
        Ok(ColumnIndexReader {
            index_dir,
            segment_readers,
            index_by_segment,
        })
    }

    fn collect_postings(&self, term: &str, pool: &SessionPool) -> Result<Vec<SegmentPosting>> {
        let mut seg_postings = Vec::new();
        for reader in &self.segment_readers {
            if let Some(sp) = reader.segment_posting(term, pool)? {
                seg_postings.push(sp);
            }
        }
        Ok(seg_postings)
    }

    /// Merged posting iterator for a term, or None when no segment holds it.
    pub fn lookup(&self, term: &str, pool: &SessionPool) -> Result<Option<PostingIterator>> {
        let seg_postings = self.collect_postings(term, pool)?;
        if seg_postings.is_empty() {
            return Ok(None);
        }
        Ok(Some(PostingIterator::new(seg_postings)))
    }

    /// Ranked iterator for a term with a pre-multiplied weight.
    pub fn lookup_block_max(
        &self,
        term: &str,
        pool: &SessionPool,
        weight: f32,
    ) -> Result<Option<BlockMaxTermDocIterator>> {
        let seg_postings = self.collect_postings(term, pool)?;
        if seg_postings.is_empty() {
            return Ok(None);
        }

        let iter = PostingIterator::new(seg_postings);
        let stats = TermStats {
            doc_freq: iter.doc_freq(),
            total_docs: self.total_docs(),
            avg_column_length: self.avg_column_length(),
        };
        let mut result = BlockMaxTermDocIterator::new(iter, stats);
        result.multiply_weight(weight);
        Ok(Some(result))
    }

    fn total_docs(&self) -> u32 {
        self.index_by_segment
            .values()
            .map(|s| s.column_len_info().1)
            .sum()
    }

    /// Average indexed column length across all segments. Zero indexed
    /// documents is a configuration error the caller must not reach.
    pub fn avg_column_length(&self) -> f32 {
        let mut column_len_sum = 0u64;
        let mut column_len_count = 0u32;
        for segment_index in self.index_by_segment.values() {
            let (sum, count) = segment_index.column_len_info();
            column_len_sum += sum;
            column_len_count += count;
        }
        if column_len_count == 0 {
            fatal("avg_column_length over zero indexed documents");
        }
        column_len_sum as f32 / column_len_count as f32
    }
}
