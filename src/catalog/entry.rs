use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use crate::core::types::{Ts, TxnId, UNCOMMITTED};

/// Behavior when a DDL operation hits a duplicate or missing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    Error,
    Ignore,
}

/// Version stamp shared by every catalog entry.
///
/// `commit_ts` and `deprecate_ts` start at `UNCOMMITTED` and are stamped
/// once, after the owning transaction's WAL entry is durable.
#[derive(Debug)]
pub struct EntryVersion {
    pub txn_id: TxnId,
    pub begin_ts: Ts,
    commit_ts: AtomicU64,
    deprecate_ts: AtomicU64,
    pub deleted: bool, // drop marker version
}

impl EntryVersion {
    pub fn new(txn_id: TxnId, begin_ts: Ts) -> Self {
        EntryVersion {
            txn_id,
            begin_ts,
            commit_ts: AtomicU64::new(UNCOMMITTED),
            deprecate_ts: AtomicU64::new(UNCOMMITTED),
            deleted: false,
        }
    }

    pub fn new_dropped(txn_id: TxnId, begin_ts: Ts) -> Self {
        EntryVersion {
            deleted: true,
            ..EntryVersion::new(txn_id, begin_ts)
        }
    }

    /// Replayed versions carry a known commit timestamp from the log.
    pub fn new_replay(txn_id: TxnId, commit_ts: Ts, deleted: bool) -> Self {
        EntryVersion {
            txn_id,
            begin_ts: 0, // replay performs no reads
            commit_ts: AtomicU64::new(commit_ts),
            deprecate_ts: AtomicU64::new(UNCOMMITTED),
            deleted,
        }
    }

    pub fn commit_ts(&self) -> Ts {
        self.commit_ts.load(Ordering::Acquire)
    }

    pub fn set_commit_ts(&self, ts: Ts) {
        self.commit_ts.store(ts, Ordering::Release);
    }

    pub fn deprecate_ts(&self) -> Ts {
        self.deprecate_ts.load(Ordering::Acquire)
    }

    pub fn set_deprecate_ts(&self, ts: Ts) {
        self.deprecate_ts.store(ts, Ordering::Release);
    }

    pub fn is_committed(&self) -> bool {
        self.commit_ts() != UNCOMMITTED
    }

    /// Visibility of this version to a reader.
    ///
    /// A committed version is visible when it committed at or before the
    /// snapshot and was not deprecated at or before it. An uncommitted
    /// version is visible only to its own transaction.
    pub fn visible(&self, snap_ts: Ts, viewer: TxnId) -> bool {
        let commit_ts = self.commit_ts();
        if commit_ts != UNCOMMITTED {
            let deprecate_ts = self.deprecate_ts();
            commit_ts <= snap_ts && (deprecate_ts == UNCOMMITTED || deprecate_ts > snap_ts)
        } else {
            self.txn_id == viewer
        }
    }
}

/// Implemented by every entry kind stored in a version chain.
pub trait Versioned {
    fn version(&self) -> &EntryVersion;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_visible_only_to_owner() {
        let v = EntryVersion::new(7, 10);
        assert!(v.visible(100, 7));
        assert!(!v.visible(100, 8));
    }

    #[test]
    fn committed_visible_from_commit_ts() {
        let v = EntryVersion::new(7, 10);
        v.set_commit_ts(20);
        assert!(!v.visible(19, 99));
        assert!(v.visible(20, 99));
        assert!(v.visible(21, 99));
    }

    #[test]
    fn deprecated_invisible_from_deprecate_ts() {
        let v = EntryVersion::new(7, 10);
        v.set_commit_ts(20);
        v.set_deprecate_ts(30);
        assert!(v.visible(29, 99));
        assert!(!v.visible(30, 99));
        assert!(!v.visible(31, 99));
    }
}
