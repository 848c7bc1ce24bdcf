use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::catalog::entry::{ConflictType, EntryVersion, Versioned};
use crate::catalog::meta::EntryChain;
use crate::catalog::table::TableEntry;
use crate::core::error::Result;
use crate::core::types::{Ts, TxnId};

/// Versioned database entry owning table version chains.
pub struct DatabaseEntry {
    pub version: EntryVersion,
    pub name: String,
    pub dir_tail: String,
    pub dir: PathBuf,
    tables: RwLock<HashMap<String, Arc<EntryChain<TableEntry>>>>,
}

impl DatabaseEntry {
    pub fn new(name: &str, dir_tail: String, dir: PathBuf, txn_id: TxnId, begin_ts: Ts) -> Self {
        DatabaseEntry {
            version: EntryVersion::new(txn_id, begin_ts),
            name: name.to_string(),
            dir_tail,
            dir,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn new_dropped(name: &str, txn_id: TxnId, begin_ts: Ts) -> Self {
        DatabaseEntry {
            version: EntryVersion::new_dropped(txn_id, begin_ts),
            name: name.to_string(),
            dir_tail: String::new(),
            dir: PathBuf::new(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn new_replay(
        name: &str,
        dir_tail: String,
        dir: PathBuf,
        txn_id: TxnId,
        commit_ts: Ts,
        deleted: bool,
    ) -> Self {
        DatabaseEntry {
            version: EntryVersion::new_replay(txn_id, commit_ts, deleted),
            name: name.to_string(),
            dir_tail,
            dir,
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn table_chain(&self, name: &str) -> Arc<EntryChain<TableEntry>> {
        let mut tables = self.tables.write();
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(EntryChain::new()))
            .clone()
    }

    pub fn stage_table(
        &self,
        entry: Arc<TableEntry>,
        snap_ts: Ts,
        viewer: TxnId,
        conflict: ConflictType,
    ) -> Result<Option<Arc<TableEntry>>> {
        let name = entry.def.name.clone();
        self.table_chain(&name)
            .try_add(entry, snap_ts, viewer, conflict, &name)
    }

    pub fn get_table(&self, name: &str, snap_ts: Ts, viewer: TxnId) -> Result<Arc<TableEntry>> {
        self.table_chain(name).get(snap_ts, viewer, name)
    }

    pub fn table_chains_snapshot(&self) -> Vec<(String, Arc<EntryChain<TableEntry>>)> {
        self.tables
            .read()
            .iter()
            .map(|(name, chain)| (name.clone(), chain.clone()))
            .collect()
    }

    pub fn remove_uncommitted_tables(&self, txn_id: TxnId) {
        for chain in self.tables.read().values() {
            chain.remove_uncommitted(txn_id);
        }
    }
}

impl Versioned for DatabaseEntry {
    fn version(&self) -> &EntryVersion {
        &self.version
    }
}
