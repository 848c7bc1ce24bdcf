use std::sync::Arc;
use parking_lot::RwLock;
use crate::catalog::entry::{ConflictType, Versioned};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Ts, TxnId};

/// Per-name version chain, newest first.
///
/// Lookup at a snapshot scans until the first visible version. A visible
/// drop marker means the name does not exist at that snapshot.
#[derive(Debug)]
pub struct EntryChain<T> {
    versions: RwLock<Vec<Arc<T>>>,
}

impl<T: Versioned> EntryChain<T> {
    pub fn new() -> Self {
        EntryChain {
            versions: RwLock::new(Vec::new()),
        }
    }

    pub fn first_visible(&self, snap_ts: Ts, viewer: TxnId) -> Option<Arc<T>> {
        let versions = self.versions.read();
        versions
            .iter()
            .find(|v| v.version().visible(snap_ts, viewer))
            .cloned()
    }

    /// Resolve the name at a snapshot, treating drop markers as absence.
    pub fn get(&self, snap_ts: Ts, viewer: TxnId, name: &str) -> Result<Arc<T>> {
        match self.first_visible(snap_ts, viewer) {
            Some(entry) if !entry.version().deleted => Ok(entry),
            _ => Err(Error::not_found(name)),
        }
    }

    /// Stage a new version created by an active transaction.
    ///
    /// Fails with a conflict when another transaction holds an uncommitted
    /// head, or with a duplicate/missing error depending on whether the new
    /// version is a create or a drop marker.
    pub fn try_add(
        &self,
        entry: Arc<T>,
        snap_ts: Ts,
        viewer: TxnId,
        conflict: ConflictType,
        name: &str,
    ) -> Result<Option<Arc<T>>> {
        let mut versions = self.versions.write();

        if let Some(head) = versions.first() {
            let head_version = head.version();
            if !head_version.is_committed() && head_version.txn_id != viewer {
                return Err(Error::new(
                    ErrorKind::TxnConflict,
                    format!("{} is being modified by txn {}", name, head_version.txn_id),
                ));
            }
        }

        let existing = versions
            .iter()
            .find(|v| v.version().visible(snap_ts, viewer))
            .map(|v| !v.version().deleted)
            .unwrap_or(false);

        if entry.version().deleted {
            // drop
            if !existing {
                return match conflict {
                    ConflictType::Ignore => Ok(None),
                    ConflictType::Error => Err(Error::not_found(name)),
                };
            }
        } else {
            // create
            if existing {
                return match conflict {
                    ConflictType::Ignore => Ok(None),
                    ConflictType::Error => Err(Error::duplicate(name)),
                };
            }
        }

        versions.insert(0, entry.clone());
        Ok(Some(entry))
    }

    /// Insert a version with a known commit timestamp during replay.
    /// Idempotent: an existing version with the same `(txn_id, commit_ts)`
    /// and the same create/drop polarity is reused instead of inserted
    /// again. A transaction that created and dropped one name carries two
    /// versions at one timestamp, the drop marker in front.
    pub fn add_replay(&self, entry: Arc<T>, txn_id: TxnId, commit_ts: Ts) -> Arc<T> {
        let mut versions = self.versions.write();
        if let Some(found) = versions.iter().find(|v| {
            v.version().txn_id == txn_id
                && v.version().commit_ts() == commit_ts
                && v.version().deleted == entry.version().deleted
        }) {
            return found.clone();
        }
        // keep the chain ordered by commit_ts descending, newest insert
        // first among equal timestamps
        let pos = versions
            .iter()
            .position(|v| v.version().commit_ts() <= commit_ts)
            .unwrap_or(versions.len());
        versions.insert(pos, entry.clone());
        entry
    }

    /// Remove versions staged by a rolled-back transaction.
    pub fn remove_uncommitted(&self, txn_id: TxnId) {
        let mut versions = self.versions.write();
        versions.retain(|v| v.version().is_committed() || v.version().txn_id != txn_id);
    }

    /// Latest committed version at or before `max_commit_ts`, drop markers
    /// included. The chain is newest-first, so the first committed hit is
    /// the latest one. Used by catalog snapshots.
    pub fn committed_at(&self, max_commit_ts: Ts) -> Option<Arc<T>> {
        let versions = self.versions.read();
        versions
            .iter()
            .find(|v| v.version().is_committed() && v.version().commit_ts() <= max_commit_ts)
            .cloned()
    }
}

impl<T: Versioned> Default for EntryChain<T> {
    fn default() -> Self {
        EntryChain::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry::EntryVersion;

    #[derive(Debug)]
    struct Dummy {
        version: EntryVersion,
        tag: u32,
    }

    impl Versioned for Dummy {
        fn version(&self) -> &EntryVersion {
            &self.version
        }
    }

    fn committed(txn_id: TxnId, commit_ts: Ts, tag: u32) -> Arc<Dummy> {
        Arc::new(Dummy {
            version: EntryVersion::new_replay(txn_id, commit_ts, false),
            tag,
        })
    }

    #[test]
    fn duplicate_create_errors_and_ignore_is_noop() {
        let chain: EntryChain<Dummy> = EntryChain::new();
        chain.add_replay(committed(1, 5, 1), 1, 5);

        let staged = Arc::new(Dummy { version: EntryVersion::new(2, 10), tag: 2 });
        let err = chain
            .try_add(staged.clone(), 10, 2, ConflictType::Error, "d")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateEntry);

        let ignored = chain
            .try_add(staged, 10, 2, ConflictType::Ignore, "d")
            .unwrap();
        assert!(ignored.is_none());
    }

    #[test]
    fn replay_add_is_idempotent() {
        let chain: EntryChain<Dummy> = EntryChain::new();
        let first = chain.add_replay(committed(1, 5, 1), 1, 5);
        let second = chain.add_replay(committed(1, 5, 2), 1, 5);
        // the original version is reused, not replaced
        assert_eq!(first.tag, second.tag);
    }

    #[test]
    fn drop_marker_hides_name() {
        let chain: EntryChain<Dummy> = EntryChain::new();
        chain.add_replay(committed(1, 5, 1), 1, 5);
        let dropped = Arc::new(Dummy {
            version: EntryVersion::new_replay(2, 9, true),
            tag: 2,
        });
        chain.add_replay(dropped, 2, 9);

        assert!(chain.get(8, 99, "d").is_ok());
        assert!(chain.get(9, 99, "d").is_err());
    }

    #[test]
    fn uncommitted_head_conflicts_with_other_txn() {
        let chain: EntryChain<Dummy> = EntryChain::new();
        let staged = Arc::new(Dummy { version: EntryVersion::new(3, 10), tag: 1 });
        chain
            .try_add(staged, 10, 3, ConflictType::Error, "d")
            .unwrap();

        let other = Arc::new(Dummy { version: EntryVersion::new(4, 11), tag: 2 });
        let err = chain
            .try_add(other, 11, 4, ConflictType::Error, "d")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TxnConflict);
    }
}
