use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use crate::analysis::analyzer::Analyzer;
use crate::catalog::index::PostingBase;
use crate::core::error::Result;
use crate::core::types::RowId;
use crate::index::posting::{Posting, PostingList, SegmentPosting};

/// In-memory inverted index accumulating recently appended rows of one
/// segment until they are flushed to an on-disk posting base.
#[derive(Debug)]
pub struct MemoryIndexer {
    pub base_name: String,
    pub base_row_id: RowId,
    postings: RwLock<BTreeMap<String, PostingList>>,
    column_lengths: RwLock<Vec<u32>>,
    doc_count: AtomicU32,
    total_length: AtomicU64,
}

impl MemoryIndexer {
    pub fn new(base_name: String, base_row_id: RowId) -> Self {
        MemoryIndexer {
            base_name,
            base_row_id,
            postings: RwLock::new(BTreeMap::new()),
            column_lengths: RwLock::new(Vec::new()),
            doc_count: AtomicU32::new(0),
            total_length: AtomicU64::new(0),
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count.load(Ordering::Acquire)
    }

    pub fn total_length(&self) -> u64 {
        self.total_length.load(Ordering::Acquire)
    }

    /// Analyze and index a batch of rows, in row order.
    pub fn insert(&self, rows: &[String], analyzer: &Analyzer) {
        let mut postings = self.postings.write();
        let mut lengths = self.column_lengths.write();
        for text in rows {
            let row_offset = self.doc_count.fetch_add(1, Ordering::SeqCst);
            let tokens = analyzer.analyze(text);
            lengths.push(tokens.len() as u32);
            self.total_length
                .fetch_add(tokens.len() as u64, Ordering::SeqCst);

            let mut term_positions: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
            for token in &tokens {
                term_positions
                    .entry(token.text.as_str())
                    .or_default()
                    .push(token.position);
            }
            for (term, positions) in term_positions {
                postings.entry(term.to_string()).or_default().add_posting(Posting {
                    row_offset,
                    term_freq: positions.len() as u32,
                    positions,
                });
            }
        }
    }

    pub fn segment_posting(&self, term: &str) -> Option<SegmentPosting> {
        let postings = self.postings.read();
        let list = postings.get(term)?;
        Some(SegmentPosting {
            base_row_id: self.base_row_id,
            postings: Arc::new(list.clone()),
            column_lengths: Arc::new(self.column_lengths.read().clone()),
        })
    }

    /// Flush to an on-disk posting base under `index_dir`:
    ///   <base>.dic  fst map: term -> offset into <base>.pos
    ///   <base>.pos  u32 length + bincode posting list per term
    ///   <base>.len  bincode per-row column lengths
    /// Returns the base descriptor plus the length statistics it carries.
    pub fn dump(&self, index_dir: &Path) -> Result<(PostingBase, u64, u32)> {
        fs::create_dir_all(index_dir)?;

        let postings = self.postings.read();
        let mut pos_bytes: Vec<u8> = Vec::new();
        let mut builder = fst::MapBuilder::memory();

        for (term, list) in postings.iter() {
            let offset = pos_bytes.len() as u64;
            let body = bincode::serialize(list)?;
            pos_bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
            pos_bytes.extend_from_slice(&body);
            builder.insert(term.as_bytes(), offset)?;
        }

        let dic_bytes = builder.into_inner()?;
        fs::write(index_dir.join(format!("{}.dic", self.base_name)), dic_bytes)?;
        fs::write(index_dir.join(format!("{}.pos", self.base_name)), pos_bytes)?;

        let lengths = self.column_lengths.read();
        fs::write(
            index_dir.join(format!("{}.len", self.base_name)),
            bincode::serialize(&*lengths)?,
        )?;

        Ok((
            PostingBase {
                base_name: self.base_name.clone(),
                base_row_id: self.base_row_id,
            },
            self.total_length(),
            self.doc_count(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_accumulates_postings_and_lengths() {
        let indexer = MemoryIndexer::new("m0".to_string(), RowId::new(0, 0));
        let analyzer = Analyzer::standard();
        indexer.insert(
            &["the quick brown fox".to_string(), "quick quick".to_string()],
            &analyzer,
        );

        assert_eq!(indexer.doc_count(), 2);
        assert_eq!(indexer.total_length(), 6);

        let sp = indexer.segment_posting("quick").unwrap();
        assert_eq!(sp.postings.doc_freq(), 2);
        assert_eq!(sp.postings.postings[1].term_freq, 2);
        assert!(indexer.segment_posting("missing").is_none());
    }
}
