//! Per-file delivery status.
//!
//! The ledger is the source of truth for which paths have been seen and how
//! each one ended. It lives for the lifetime of the process and is owned by
//! the scheduler; nothing else mutates it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Delivery status of a discovered path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered, not yet resolved
    Pending,
    /// Delivered and acknowledged
    Success,
    /// Failed terminally
    Failure,
}

impl FileStatus {
    /// Returns whether the path has been resolved.
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Ledger record for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Current status
    pub status: FileStatus,
    /// Retries consumed in the current cycle
    pub retries: u32,
    /// Attempts started, kept after resolution for reporting
    pub attempts: u32,
}

impl LedgerEntry {
    fn pending() -> Self {
        Self {
            status: FileStatus::Pending,
            retries: 0,
            attempts: 0,
        }
    }
}

/// Summary counts over the whole ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    /// Paths ever discovered
    pub total: usize,
    /// Paths delivered
    pub succeeded: usize,
    /// Paths failed terminally
    pub failed: usize,
    /// Paths not yet resolved
    pub pending: usize,
}

/// Map of path to delivery status and retry count.
#[derive(Debug, Default)]
pub struct TransferLedger {
    entries: HashMap<PathBuf, LedgerEntry>,
}

impl TransferLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered path.
    ///
    /// Returns `true` if the path was not known and is now `Pending`, `false`
    /// if it was already in the ledger (in any status).
    pub fn record_discovered(&mut self, path: &Path) -> bool {
        if self.entries.contains_key(path) {
            return false;
        }
        self.entries.insert(path.to_path_buf(), LedgerEntry::pending());
        true
    }

    /// Record that an attempt was started for a path.
    pub fn record_attempt(&mut self, path: &Path) {
        if let Some(entry) = self.entries.get_mut(path) {
            entry.attempts += 1;
        }
    }

    /// Record a terminal outcome and clear the retry count.
    ///
    /// Unknown paths are inserted so every resolved path has exactly one entry.
    pub fn record_outcome(&mut self, path: &Path, status: FileStatus) {
        debug_assert!(status.is_resolved(), "outcome must be Success or Failure");
        let entry = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(LedgerEntry::pending);
        entry.status = status;
        entry.retries = 0;
    }

    /// Increment the retry count for a path and return the new value.
    pub fn increment_retry(&mut self, path: &Path) -> u32 {
        let entry = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(LedgerEntry::pending);
        entry.retries += 1;
        entry.retries
    }

    /// Retries consumed by a path (0 if unknown).
    #[must_use]
    pub fn retry_count(&self, path: &Path) -> u32 {
        self.entries.get(path).map_or(0, |e| e.retries)
    }

    /// Current status of a path.
    #[must_use]
    pub fn status(&self, path: &Path) -> Option<FileStatus> {
        self.entries.get(path).map(|e| e.status)
    }

    /// Full record for a path.
    #[must_use]
    pub fn entry(&self, path: &Path) -> Option<&LedgerEntry> {
        self.entries.get(path)
    }

    /// Number of known paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no path has been discovered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count paths by status.
    #[must_use]
    pub fn counts(&self) -> LedgerCounts {
        let mut counts = LedgerCounts {
            total: self.entries.len(),
            ..LedgerCounts::default()
        };
        for entry in self.entries.values() {
            match entry.status {
                FileStatus::Pending => counts.pending += 1,
                FileStatus::Success => counts.succeeded += 1,
                FileStatus::Failure => counts.failed += 1,
            }
        }
        counts
    }

    /// Iterate over all entries, sorted by path.
    pub fn entries(&self) -> Vec<(&PathBuf, &LedgerEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}
