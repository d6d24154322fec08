//! Weight broadcast versions.
//!
//! Every `set_weights` call issues a fresh version before staging, and an
//! aborted broadcast never gives its version back. Collect requests carry
//! the last committed version, which lets a worker refuse to act on weights
//! from any other broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Issued and committed broadcast versions. Version 0 means "none yet".
#[derive(Debug, Default)]
pub struct BroadcastVersions {
    issued: AtomicU64,
    committed: AtomicU64,
}

impl BroadcastVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next version. Versions are strictly increasing from 1.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record that `version` was committed on every worker.
    ///
    /// Committing an older version than the current one is ignored.
    pub fn mark_committed(&self, version: u64) {
        self.committed.fetch_max(version, Ordering::SeqCst);
    }

    /// Highest version issued so far.
    pub fn last_issued(&self) -> Option<u64> {
        match self.issued.load(Ordering::SeqCst) {
            0 => None,
            v => Some(v),
        }
    }

    /// Highest version committed so far.
    pub fn last_committed(&self) -> Option<u64> {
        match self.committed.load(Ordering::SeqCst) {
            0 => None,
            v => Some(v),
        }
    }
}

pub type SharedBroadcastVersions = Arc<BroadcastVersions>;

pub fn broadcast_versions() -> SharedBroadcastVersions {
    Arc::new(BroadcastVersions::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_is_strictly_increasing() {
        let versions = BroadcastVersions::new();
        assert_eq!(versions.last_issued(), None);
        assert_eq!(versions.issue(), 1);
        assert_eq!(versions.issue(), 2);
        assert_eq!(versions.last_issued(), Some(2));
    }

    #[test]
    fn test_aborted_version_is_not_reused() {
        let versions = BroadcastVersions::new();
        let first = versions.issue();
        versions.mark_committed(first);
        // Second broadcast aborts: nothing committed, but the number is spent.
        let _aborted = versions.issue();
        assert_eq!(versions.last_committed(), Some(1));
        assert_eq!(versions.issue(), 3);
    }

    #[test]
    fn test_commit_never_moves_backwards() {
        let versions = broadcast_versions();
        let shared = Arc::clone(&versions);
        versions.mark_committed(4);
        shared.mark_committed(2);
        assert_eq!(versions.last_committed(), Some(4));
    }
}
