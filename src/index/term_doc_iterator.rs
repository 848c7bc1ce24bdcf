use crate::core::types::RowId;
use crate::index::posting::PostingIterator;
use crate::scoring::scorer::{Bm25Scorer, TermStats};

/// Term-document iterator carrying a pre-multiplied scoring weight, used by
/// ranked (BM25) retrieval.
pub struct BlockMaxTermDocIterator {
    iter: PostingIterator,
    weight: f32,
    scorer: Bm25Scorer,
    stats: TermStats,
}

impl BlockMaxTermDocIterator {
    pub fn new(iter: PostingIterator, stats: TermStats) -> Self {
        BlockMaxTermDocIterator {
            iter,
            weight: 1.0,
            scorer: Bm25Scorer::default(),
            stats,
        }
    }

    pub fn multiply_weight(&mut self, weight: f32) {
        self.weight *= weight;
    }

    pub fn doc(&self) -> Option<RowId> {
        self.iter.doc()
    }

    /// BM25 contribution of the row under the cursor.
    pub fn score(&self) -> Option<f32> {
        let term_freq = self.iter.term_freq()?;
        let column_length = self.iter.column_length()?;
        Some(self.weight * self.scorer.score(term_freq, column_length, &self.stats))
    }

    pub fn next(&mut self) -> Option<RowId> {
        self.iter.next()
    }

    pub fn seek(&mut self, target: RowId) -> Option<RowId> {
        self.iter.seek(target)
    }
}
