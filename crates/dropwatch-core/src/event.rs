//! Events emitted by the transfer subsystem for UI updates.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;
use crate::ledger::LedgerCounts;

/// Events emitted while files are discovered and delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransferEvent {
    /// A path was seen for the first time and queued
    Discovered {
        /// File path
        path: PathBuf,
    },
    /// An attempt opened the file and is connecting
    Started {
        /// File path
        path: PathBuf,
        /// File size in bytes
        size: u64,
    },
    /// Body progress changed
    Progress {
        /// File path
        path: PathBuf,
        /// Whole percent sent (0-100)
        percent: u8,
    },
    /// Throughput over the last sample window
    Speed {
        /// File path
        path: PathBuf,
        /// MiB per second
        mib_per_sec: f64,
    },
    /// The endpoint acknowledged the file
    Succeeded {
        /// File path
        path: PathBuf,
        /// Bytes of body sent
        bytes: u64,
        /// Wall time of the attempt in milliseconds
        elapsed_ms: u64,
    },
    /// A retryable failure; the path will be re-queued after the delay
    RetryScheduled {
        /// File path
        path: PathBuf,
        /// Retry number (1-based)
        retry: u32,
        /// Delay before re-queueing in milliseconds
        delay_ms: u64,
        /// Why the attempt failed
        reason: String,
    },
    /// The path failed terminally
    Failed {
        /// File path
        path: PathBuf,
        /// Failure classification
        kind: FailureKind,
        /// Human-readable reason
        reason: String,
    },
    /// Ledger statistics after a change
    Stats {
        /// Paths ever discovered
        total: usize,
        /// Paths delivered
        succeeded: usize,
        /// Paths failed terminally
        failed: usize,
        /// Paths not yet resolved
        pending: usize,
    },
}

impl TransferEvent {
    /// Build a `Stats` event from ledger counts.
    pub fn stats(counts: LedgerCounts) -> Self {
        Self::Stats {
            total: counts.total,
            succeeded: counts.succeeded,
            failed: counts.failed,
            pending: counts.pending,
        }
    }

    /// Path this event concerns, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Discovered { path }
            | Self::Started { path, .. }
            | Self::Progress { path, .. }
            | Self::Speed { path, .. }
            | Self::Succeeded { path, .. }
            | Self::RetryScheduled { path, .. }
            | Self::Failed { path, .. } => Some(path),
            Self::Stats { .. } => None,
        }
    }
}
