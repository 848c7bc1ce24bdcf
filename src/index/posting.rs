use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::core::types::RowId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub row_offset: u32,      // Row offset relative to the posting base
    pub term_freq: u32,       // Term frequency in the row
    pub positions: Vec<u32>,  // Token positions for phrase queries
}

/// Posting list for a term inside one posting base.
/// Note: sorted by row_offset for efficient merging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingList {
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList { postings: Vec::new() }
    }

    pub fn add_posting(&mut self, posting: Posting) {
        match self
            .postings
            .binary_search_by_key(&posting.row_offset, |p| p.row_offset)
        {
            Ok(pos) => {
                // Update existing posting
                self.postings[pos] = posting;
            }
            Err(pos) => {
                self.postings.insert(pos, posting);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn doc_freq(&self) -> u32 {
        self.postings.len() as u32
    }

    pub fn total_freq(&self) -> u64 {
        self.postings.iter().map(|p| p.term_freq as u64).sum()
    }
}

/// Postings of one term inside one segment reader, addressed from the
/// reader's base row id, plus the per-row column lengths of that base.
#[derive(Clone)]
pub struct SegmentPosting {
    pub base_row_id: RowId,
    pub postings: Arc<PostingList>,
    pub column_lengths: Arc<Vec<u32>>,
}

impl SegmentPosting {
    pub fn row_id(&self, posting: &Posting) -> RowId {
        RowId::new(
            self.base_row_id.segment_id,
            self.base_row_id.segment_offset + posting.row_offset,
        )
    }
}

/// Cursor over the merged postings of one term across all segment readers.
///
/// Posting bases never overlap and readers are collected in ascending base
/// order, so the merged stream is the concatenation of the per-base lists.
pub struct PostingIterator {
    seg_postings: Vec<SegmentPosting>,
    seg_idx: usize,
    posting_idx: usize,
}

impl PostingIterator {
    pub fn new(mut seg_postings: Vec<SegmentPosting>) -> Self {
        seg_postings.sort_by_key(|sp| sp.base_row_id);
        let mut iter = PostingIterator {
            seg_postings,
            seg_idx: 0,
            posting_idx: 0,
        };
        iter.settle();
        iter
    }

    /// Move past empty posting bases until the cursor rests on a posting.
    fn settle(&mut self) {
        while let Some(sp) = self.seg_postings.get(self.seg_idx) {
            if self.posting_idx < sp.postings.postings.len() {
                return;
            }
            self.seg_idx += 1;
            self.posting_idx = 0;
        }
    }

    pub fn doc_freq(&self) -> u32 {
        self.seg_postings.iter().map(|sp| sp.postings.doc_freq()).sum()
    }

    fn current_posting(&self) -> Option<(&SegmentPosting, &Posting)> {
        let sp = self.seg_postings.get(self.seg_idx)?;
        let posting = sp.postings.postings.get(self.posting_idx)?;
        Some((sp, posting))
    }

    /// Row id under the cursor, or None once exhausted.
    pub fn doc(&self) -> Option<RowId> {
        self.current_posting().map(|(sp, p)| sp.row_id(p))
    }

    pub fn term_freq(&self) -> Option<u32> {
        self.current_posting().map(|(_, p)| p.term_freq)
    }

    pub fn positions(&self) -> Option<&[u32]> {
        self.current_posting().map(|(_, p)| p.positions.as_slice())
    }

    /// Column length of the row under the cursor, for BM25 normalization.
    pub fn column_length(&self) -> Option<u32> {
        self.current_posting()
            .map(|(sp, p)| sp.column_lengths.get(p.row_offset as usize).copied().unwrap_or(1))
    }

    pub fn next(&mut self) -> Option<RowId> {
        if self.seg_idx >= self.seg_postings.len() {
            return None;
        }
        self.posting_idx += 1;
        self.settle();
        self.doc()
    }

    /// Advance to the first document with row id >= target.
    pub fn seek(&mut self, target: RowId) -> Option<RowId> {
        while let Some(doc) = self.doc() {
            if doc >= target {
                return Some(doc);
            }
            self.next()?;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg_posting(segment_id: u32, base: u32, offsets: &[u32]) -> SegmentPosting {
        let mut list = PostingList::new();
        for off in offsets {
            list.add_posting(Posting {
                row_offset: *off,
                term_freq: 1,
                positions: vec![0],
            });
        }
        let max = offsets.iter().max().copied().unwrap_or(0) as usize;
        SegmentPosting {
            base_row_id: RowId::new(segment_id, base),
            postings: Arc::new(list),
            column_lengths: Arc::new(vec![4; max + 1]),
        }
    }

    #[test]
    fn merged_iteration_is_global_row_order() {
        let mut iter = PostingIterator::new(vec![
            seg_posting(1, 0, &[5, 9]),
            seg_posting(0, 0, &[1, 3]),
        ]);

        let mut seen = vec![iter.doc().unwrap()];
        while let Some(doc) = iter.next() {
            seen.push(doc);
        }
        assert_eq!(
            seen,
            vec![
                RowId::new(0, 1),
                RowId::new(0, 3),
                RowId::new(1, 5),
                RowId::new(1, 9),
            ]
        );
    }

    #[test]
    fn seek_lands_on_first_at_or_after_target() {
        let mut iter = PostingIterator::new(vec![
            seg_posting(0, 0, &[1, 3]),
            seg_posting(0, 100, &[7]),
        ]);

        assert_eq!(iter.seek(RowId::new(0, 2)), Some(RowId::new(0, 3)));
        assert_eq!(iter.seek(RowId::new(0, 50)), Some(RowId::new(0, 107)));
        assert_eq!(iter.seek(RowId::new(0, 200)), None);
    }

    #[test]
    fn add_posting_keeps_row_order_and_replaces() {
        let mut list = PostingList::new();
        list.add_posting(Posting { row_offset: 8, term_freq: 1, positions: vec![] });
        list.add_posting(Posting { row_offset: 2, term_freq: 1, positions: vec![] });
        list.add_posting(Posting { row_offset: 8, term_freq: 3, positions: vec![] });

        assert_eq!(list.len(), 2);
        assert_eq!(list.postings[0].row_offset, 2);
        assert_eq!(list.postings[1].term_freq, 3);
    }
}
