/// Collection-level statistics needed to score one term.
#[derive(Debug, Clone, Copy)]
pub struct TermStats {
    pub doc_freq: u32,       // documents containing the term
    pub total_docs: u32,     // documents in the indexed column
    pub avg_column_length: f32,
}

impl TermStats {
    /// Robertson-Sparck-Jones idf with the +1 floor keeping it positive.
    pub fn idf(&self) -> f32 {
        let n = self.total_docs as f32;
        let df = self.doc_freq as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}

/// BM25 Scorer
#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    pub k1: f32, // Term frequency saturation (default: 1.2)
    pub b: f32,  // Length normalization strength (default: 0.75)
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Bm25Scorer { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Scorer {
    pub fn score(&self, term_freq: u32, column_length: u32, stats: &TermStats) -> f32 {
        let tf = term_freq as f32;
        let len = column_length as f32;
        let avg_len = stats.avg_column_length;

        let numerator = stats.idf() * tf * (self.k1 + 1.0);
        let denominator = tf + self.k1 * (1.0 - self.b + self.b * (len / avg_len));

        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idf_decreases_with_doc_freq() {
        let rare = TermStats { doc_freq: 1, total_docs: 1000, avg_column_length: 10.0 };
        let common = TermStats { doc_freq: 900, total_docs: 1000, avg_column_length: 10.0 };
        assert!(rare.idf() > common.idf());
    }

    #[test]
    fn bm25_prefers_higher_tf_and_shorter_docs() {
        let scorer = Bm25Scorer::default();
        let stats = TermStats { doc_freq: 10, total_docs: 1000, avg_column_length: 20.0 };

        assert!(scorer.score(3, 20, &stats) > scorer.score(1, 20, &stats));
        assert!(scorer.score(2, 10, &stats) > scorer.score(2, 40, &stats));
    }
}
