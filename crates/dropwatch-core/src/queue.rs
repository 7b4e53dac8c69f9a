//! FIFO of paths awaiting a send attempt.
//!
//! The queue does no deduplication. The scheduler only enqueues a path on
//! first discovery or after a retryable failure, so a path is never queued
//! twice at once.

use std::collections::VecDeque;
use std::path::PathBuf;

/// Ordered paths waiting for the next free send slot.
#[derive(Debug, Default)]
pub struct TransferQueue {
    paths: VecDeque<PathBuf>,
}

impl TransferQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path to the back.
    pub fn enqueue(&mut self, path: PathBuf) {
        self.paths.push_back(path);
    }

    /// Take the path at the front.
    pub fn dequeue(&mut self) -> Option<PathBuf> {
        self.paths.pop_front()
    }

    /// Number of queued paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Drop every queued path and return them in queue order.
    pub fn drain(&mut self) -> Vec<PathBuf> {
        self.paths.drain(..).collect()
    }
}
