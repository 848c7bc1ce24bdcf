use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use crate::catalog::table::TableEntry;
use crate::core::error::Result;
use crate::core::types::{ColumnId, RowId, Ts, TxnId, UNCOMMITTED};
use crate::index::column_reader::ColumnIndexReader;
use crate::storage::buffer::SessionPool;

/// Transaction-consistent view over a table's full-text indexes: one column
/// reader per indexed column plus the column-name to analyzer map. Shares
/// cached maps by handle; the session pool is private to the query.
pub struct IndexReader {
    pub column_readers: Arc<HashMap<ColumnId, Arc<ColumnIndexReader>>>,
    pub column2analyzer: Arc<HashMap<String, String>>,
    pub session_pool: Arc<SessionPool>,
}

impl IndexReader {
    pub fn column_reader(&self, column_id: ColumnId) -> Option<Arc<ColumnIndexReader>> {
        self.column_readers.get(&column_id).cloned()
    }

    /// Ranked disjunctive match over already-analyzed terms: per-row BM25
    /// sum, top `topn` rows ordered by score descending, row id ascending.
    pub fn search(
        &self,
        column_id: ColumnId,
        terms: &[String],
        topn: usize,
    ) -> Result<Vec<(RowId, f32)>> {
        let mut scores: HashMap<RowId, f32> = HashMap::new();
        if let Some(reader) = self.column_reader(column_id) {
            for term in terms {
                let Some(mut iter) = reader.lookup_block_max(term, &self.session_pool, 1.0)?
                else {
                    continue;
                };
                while let Some(doc) = iter.doc() {
                    if let Some(score) = iter.score() {
                        *scores.entry(doc).or_insert(0.0) += score;
                    }
                    if iter.next().is_none() {
                        break;
                    }
                }
            }
        }

        let mut hits: Vec<(RowId, f32)> = scores.into_iter().collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(topn);
        Ok(hits)
    }
}

#[derive(Debug)]
struct CacheState {
    cache_ts: Ts,
    first_known_update_ts: Ts,
    last_known_update_ts: Ts,
    cache_column_ts: HashMap<ColumnId, Ts>,
    cache_column_readers: Arc<HashMap<ColumnId, Arc<ColumnIndexReader>>>,
    column2analyzer: Arc<HashMap<String, String>>,
}

/// Per-table cache of column index readers keyed by the snapshot they
/// reflect, invalidated lazily through a known-update window.
#[derive(Debug)]
pub struct TableIndexReaderCache {
    state: Mutex<CacheState>,
    session_memory_limit: usize,
}

impl TableIndexReaderCache {
    pub fn new(session_memory_limit: usize) -> Self {
        TableIndexReaderCache {
            state: Mutex::new(CacheState {
                cache_ts: 0,
                first_known_update_ts: UNCOMMITTED,
                last_known_update_ts: 0,
                cache_column_ts: HashMap::new(),
                cache_column_readers: Arc::new(HashMap::new()),
                column2analyzer: Arc::new(HashMap::new()),
            }),
            session_memory_limit,
        }
    }

    /// Record a committed full-text-relevant change at `ts`, widening the
    /// update window and bumping the index's segment-update timestamp.
    /// Commit timestamps arrive in commit order, so `ts` never regresses.
    pub fn update_known_update_ts(&self, ts: Ts, segment_update_ts: &RwLock<Ts>) {
        let mut state = self.state.lock();
        let mut cell = segment_update_ts.write();
        assert!(ts >= *cell, "update ts regressed: {} < {}", ts, *cell);
        *cell = ts;
        state.first_known_update_ts = state.first_known_update_ts.min(ts);
        state.last_known_update_ts = state.last_known_update_ts.max(ts);
    }

    /// Checkpoint variant: the caller's timestamp may race a concurrent
    /// commit that already advanced the cell, so clamp instead of assert.
    pub fn refresh_update_window(&self, ts: Ts, segment_update_ts: &RwLock<Ts>) {
        let mut state = self.state.lock();
        let mut cell = segment_update_ts.write();
        *cell = (*cell).max(ts);
        state.first_known_update_ts = state.first_known_update_ts.min(ts);
        state.last_known_update_ts = state.last_known_update_ts.max(*cell);
    }

    /// Build (or reuse) an `IndexReader` for the given snapshot.
    pub fn get_index_reader(
        &self,
        txn_id: TxnId,
        begin_ts: Ts,
        table: &TableEntry,
    ) -> Result<IndexReader> {
        let session_pool = Arc::new(SessionPool::new(self.session_memory_limit));
        let mut state = self.state.lock();

        if begin_ts >= state.cache_ts && begin_ts < state.first_known_update_ts {
            // no need to build, use cache
            return Ok(IndexReader {
                column_readers: state.cache_column_readers.clone(),
                column2analyzer: state.column2analyzer.clone(),
                session_pool,
            });
        }

        let mut fresh_column_ts: HashMap<ColumnId, Ts> = HashMap::new();
        let mut fresh_readers: HashMap<ColumnId, Arc<ColumnIndexReader>> = HashMap::new();
        let mut fresh_analyzers: HashMap<String, String> = HashMap::new();

        for (index_name, chain) in table.index_meta_snapshot() {
            let index_entry = match chain.get(begin_ts, txn_id, &index_name) {
                Ok(entry) => entry,
                Err(_) => continue, // dropped or not yet visible
            };
            if !index_entry.def.is_fulltext() {
                continue;
            }
            let column_name = index_entry.def.column_name.clone();
            let Some(column_id) = table.def.column_id_by_name(&column_name) else {
                continue;
            };
            let ts = index_entry.fulltext_segment_update_ts();
            let target = fresh_column_ts.entry(column_id).or_insert(0);
            if *target >= ts && fresh_readers.contains_key(&column_id) {
                continue;
            }
            *target = ts;
            fresh_analyzers.insert(column_name, index_entry.def.analyzer().to_string());

            let reusable = state
                .cache_column_ts
                .get(&column_id)
                .map(|cached| *cached == ts)
                .unwrap_or(false);
            if reusable {
                if let Some(reader) = state.cache_column_readers.get(&column_id) {
                    fresh_readers.insert(column_id, reader.clone());
                    continue;
                }
            }
            let reader = ColumnIndexReader::open(
                index_entry.dir.clone(),
                index_entry.index_by_segment_snapshot(),
            )?;
            fresh_readers.insert(column_id, Arc::new(reader));
        }

        let column_readers = Arc::new(fresh_readers);
        let column2analyzer = Arc::new(fresh_analyzers);

        if begin_ts >= state.last_known_update_ts {
            // this snapshot covers every known update: adopt as the cache
            state.cache_ts = state.last_known_update_ts;
            state.first_known_update_ts = UNCOMMITTED;
            state.last_known_update_ts = 0;
            state.cache_column_ts = fresh_column_ts;
            state.cache_column_readers = column_readers.clone();
            state.column2analyzer = column2analyzer.clone();
        }

        Ok(IndexReader {
            column_readers,
            column2analyzer,
            session_pool,
        })
    }
}
