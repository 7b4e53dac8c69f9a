//! Serialized transfer scheduling and retry policy.
//!
//! The scheduler owns the ledger and the queue and runs at most one
//! [`FileSender`] at a time. It is driven by a single `select!` loop over
//! discovered paths, the active attempt, elapsed retry delays and a
//! shutdown token, so all state changes happen one event at a time.
//!
//! ## Retry policy
//!
//! | Failure kind | Action |
//! |--------------|--------|
//! | `Open`, `Refused` | retry after `retry_delay`, at most `max_retries` times |
//! | anything else | mark the path failed |
//!
//! A retried path re-enters the queue only once its delay has elapsed, behind
//! everything discovered in the meantime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig, TransferConfig};
use crate::error::FailureKind;
use crate::event::TransferEvent;
use crate::ledger::{FileStatus, TransferLedger};
use crate::queue::TransferQueue;
use crate::sender::{AttemptOutcome, Connector, FileSender};

struct ActiveAttempt {
    path: PathBuf,
    future: BoxFuture<'static, AttemptOutcome>,
}

/// Runs one delivery attempt at a time and applies the retry policy.
pub struct TransferScheduler<C: Connector> {
    connector: Arc<C>,
    transfer: TransferConfig,
    retry: RetryConfig,
    ledger: TransferLedger,
    queue: TransferQueue,
    active: Option<ActiveAttempt>,
    retries: FuturesUnordered<BoxFuture<'static, PathBuf>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl<C: Connector> TransferScheduler<C> {
    /// Create a scheduler.
    pub fn new(
        connector: Arc<C>,
        transfer: TransferConfig,
        retry: RetryConfig,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            connector,
            transfer,
            retry,
            ledger: TransferLedger::new(),
            queue: TransferQueue::new(),
            active: None,
            retries: FuturesUnordered::new(),
            events,
        }
    }

    /// Create a scheduler from the transfer and retry sections of a config.
    pub fn from_config(
        connector: Arc<C>,
        config: &Config,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self::new(
            connector,
            config.transfer.clone(),
            config.retry.clone(),
            events,
        )
    }

    /// The ledger as it stands.
    #[must_use]
    pub fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    /// Paths waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Path of the attempt in flight, if any.
    #[must_use]
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Retry delays not yet elapsed.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Returns whether nothing is in flight, queued or waiting on a retry.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.active.is_none() && self.queue.is_empty() && self.retries.is_empty()
    }

    /// Handle a discovered path.
    ///
    /// Paths already in the ledger are ignored, whatever their status.
    pub fn on_new_path(&mut self, path: PathBuf) {
        if !self.ledger.record_discovered(&path) {
            tracing::debug!("Ignoring known path {}", path.display());
            return;
        }

        tracing::info!("Queued {}", path.display());
        self.emit(TransferEvent::Discovered { path: path.clone() });
        self.queue.enqueue(path);
        self.emit_stats();
        self.start_next();
    }

    /// Start the next queued attempt if nothing is in flight.
    pub fn start_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(path) = self.queue.dequeue() else {
            return;
        };

        self.ledger.record_attempt(&path);
        let sender = FileSender::new(
            path.clone(),
            Arc::clone(&self.connector),
            self.transfer.clone(),
            self.events.clone(),
        );
        self.active = Some(ActiveAttempt {
            path,
            future: Box::pin(sender.run()),
        });
    }

    /// Apply the outcome of a finished attempt.
    pub fn on_attempt_resolved(&mut self, path: PathBuf, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Success { bytes, elapsed } => {
                self.ledger.record_outcome(&path, FileStatus::Success);
                self.emit(TransferEvent::Succeeded {
                    path,
                    bytes,
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
                self.emit_stats();
                self.start_next();
            }
            AttemptOutcome::Failure { kind, reason }
                if kind.is_retryable()
                    && self.ledger.retry_count(&path) < self.retry.max_retries =>
            {
                let retry = self.ledger.increment_retry(&path);
                let delay = self.retry.retry_delay;
                tracing::warn!(
                    "{} failed ({}), retry {}/{} in {}ms",
                    path.display(),
                    reason,
                    retry,
                    self.retry.max_retries,
                    delay.as_millis()
                );
                self.emit(TransferEvent::RetryScheduled {
                    path: path.clone(),
                    retry,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason,
                });
                self.emit_stats();
                self.retries.push(Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    path
                }));
            }
            AttemptOutcome::Failure { kind, reason } => {
                self.fail(path, kind, reason);
                self.start_next();
            }
        }
    }

    /// Re-queue a path whose retry delay has elapsed.
    pub fn on_retry_elapsed(&mut self, path: PathBuf) {
        tracing::debug!("Retry delay elapsed for {}", path.display());
        self.queue.enqueue(path);
        self.start_next();
    }

    /// Abandon the attempt in flight, recording it as a lost connection.
    ///
    /// Queued paths and retry delays are left alone; they stay `Pending`.
    pub fn abort_active(&mut self) {
        if let Some(attempt) = self.active.take() {
            drop(attempt.future);
            self.fail(
                attempt.path,
                FailureKind::ConnectionLost,
                "transfer interrupted by shutdown".to_string(),
            );
        }
    }

    /// Run until discovery closes and all work drains, or until shutdown.
    ///
    /// Returns the final ledger.
    pub async fn run(
        mut self,
        mut paths: mpsc::Receiver<PathBuf>,
        shutdown: CancellationToken,
    ) -> TransferLedger {
        let mut discovery_open = true;

        loop {
            if !discovery_open && self.is_drained() {
                break;
            }

            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping scheduler");
                    self.abort_active();
                    for path in self.queue.drain() {
                        tracing::debug!("Left pending: {}", path.display());
                    }
                    break;
                }
                outcome = poll_active(&mut self.active), if self.active.is_some() => {
                    if let Some(attempt) = self.active.take() {
                        self.on_attempt_resolved(attempt.path, outcome);
                    }
                }
                Some(path) = self.retries.next(), if !self.retries.is_empty() => {
                    self.on_retry_elapsed(path);
                }
                path = paths.recv(), if discovery_open => {
                    match path {
                        Some(path) => self.on_new_path(path),
                        None => {
                            tracing::debug!("Discovery closed");
                            discovery_open = false;
                        }
                    }
                }
            }
        }

        let counts = self.ledger.counts();
        tracing::info!(
            "Scheduler stopped: {} delivered, {} failed, {} pending",
            counts.succeeded,
            counts.failed,
            counts.pending
        );
        self.ledger
    }

    fn fail(&mut self, path: PathBuf, kind: FailureKind, reason: String) {
        tracing::warn!("{} failed ({}): {}", path.display(), kind, reason);
        self.ledger.record_outcome(&path, FileStatus::Failure);
        self.emit(TransferEvent::Failed { path, kind, reason });
        self.emit_stats();
    }

    fn emit_stats(&self) {
        self.emit(TransferEvent::stats(self.ledger.counts()));
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

async fn poll_active(active: &mut Option<ActiveAttempt>) -> AttemptOutcome {
    match active {
        Some(attempt) => (&mut attempt.future).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    struct NeverConnector;

    impl Connector for NeverConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> Result<DuplexStream> {
            Err(Error::Internal("not used".to_string()))
        }

        fn endpoint(&self) -> String {
            "never".to_string()
        }
    }

    fn scheduler(
        max_retries: u32,
    ) -> (
        TransferScheduler<NeverConnector>,
        mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let retry = RetryConfig {
            max_retries,
            retry_delay: Duration::from_millis(2000),
        };
        (
            TransferScheduler::new(
                Arc::new(NeverConnector),
                TransferConfig::default(),
                retry,
                tx,
            ),
            rx,
        )
    }

    fn refused() -> AttemptOutcome {
        AttemptOutcome::Failure {
            kind: FailureKind::Refused,
            reason: "refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_only_one_attempt_active() {
        let (mut scheduler, _rx) = scheduler(5);

        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("b"));

        assert_eq!(scheduler.active_path(), Some(Path::new("a")));
        assert_eq!(scheduler.queued(), 1);
    }

    #[tokio::test]
    async fn test_rediscovery_is_ignored() {
        let (mut scheduler, mut rx) = scheduler(5);

        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("a"));

        assert_eq!(scheduler.ledger().len(), 1);
        assert_eq!(scheduler.queued(), 0);

        let discovered = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, TransferEvent::Discovered { .. }))
            .count();
        assert_eq!(discovered, 1);
    }

    #[tokio::test]
    async fn test_success_starts_next() {
        let (mut scheduler, _rx) = scheduler(5);
        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("b"));

        scheduler.active.take();
        scheduler.on_attempt_resolved(
            PathBuf::from("a"),
            AttemptOutcome::Success {
                bytes: 5,
                elapsed: Duration::from_millis(3),
            },
        );

        assert_eq!(
            scheduler.ledger().status(Path::new("a")),
            Some(FileStatus::Success)
        );
        assert_eq!(scheduler.active_path(), Some(Path::new("b")));
    }

    #[tokio::test]
    async fn test_retryable_failure_waits_for_delay() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("b"));

        scheduler.active.take();
        scheduler.on_attempt_resolved(PathBuf::from("a"), refused());

        assert!(scheduler.active_path().is_none());
        assert_eq!(scheduler.pending_retries(), 1);
        assert_eq!(scheduler.ledger().retry_count(Path::new("a")), 1);
        assert_eq!(
            scheduler.ledger().status(Path::new("a")),
            Some(FileStatus::Pending)
        );
        assert!(!scheduler.is_drained());

        let retry = std::iter::from_fn(|| rx.try_recv().ok())
            .find(|e| matches!(e, TransferEvent::RetryScheduled { .. }));
        assert_eq!(
            retry,
            Some(TransferEvent::RetryScheduled {
                path: PathBuf::from("a"),
                retry: 1,
                delay_ms: 2000,
                reason: "refused".to_string(),
            })
        );

        scheduler.on_retry_elapsed(PathBuf::from("a"));
        assert_eq!(scheduler.active_path(), Some(Path::new("b")));
        assert_eq!(scheduler.queued(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (mut scheduler, _rx) = scheduler(2);
        let path = PathBuf::from("a");
        scheduler.on_new_path(path.clone());

        for _ in 0..2 {
            scheduler.active.take();
            scheduler.on_attempt_resolved(path.clone(), refused());
            scheduler.on_retry_elapsed(path.clone());
        }
        scheduler.active.take();
        scheduler.on_attempt_resolved(path.clone(), refused());

        assert_eq!(
            scheduler.ledger().status(&path),
            Some(FileStatus::Failure)
        );
        assert_eq!(scheduler.ledger().retry_count(&path), 0);
        assert_eq!(scheduler.ledger().entry(&path).unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_is_not_retried() {
        let (mut scheduler, _rx) = scheduler(5);
        scheduler.on_new_path(PathBuf::from("a"));

        scheduler.active.take();
        scheduler.on_attempt_resolved(
            PathBuf::from("a"),
            AttemptOutcome::Failure {
                kind: FailureKind::Timeout,
                reason: "no response".to_string(),
            },
        );

        assert_eq!(scheduler.pending_retries(), 0);
        assert_eq!(
            scheduler.ledger().status(Path::new("a")),
            Some(FileStatus::Failure)
        );
        assert!(scheduler.is_drained());
    }

    #[tokio::test]
    async fn test_abort_active_records_connection_lost() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("b"));

        scheduler.abort_active();

        assert_eq!(
            scheduler.ledger().status(Path::new("a")),
            Some(FileStatus::Failure)
        );
        assert_eq!(
            scheduler.ledger().status(Path::new("b")),
            Some(FileStatus::Pending)
        );

        let failed = std::iter::from_fn(|| rx.try_recv().ok())
            .find_map(|e| match e {
                TransferEvent::Failed { kind, .. } => Some(kind),
                _ => None,
            });
        assert_eq!(failed, Some(FailureKind::ConnectionLost));
    }

    #[tokio::test]
    async fn test_shutdown_leaves_queued_paths_pending() {
        let (mut scheduler, _rx) = scheduler(5);
        scheduler.on_new_path(PathBuf::from("a"));
        scheduler.on_new_path(PathBuf::from("b"));
        scheduler.on_new_path(PathBuf::from("c"));

        let (_paths_tx, paths_rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();

        let ledger = scheduler.run(paths_rx, token).await;
        let counts = ledger.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.pending, 2);
        assert_eq!(ledger.status(Path::new("a")), Some(FileStatus::Failure));
    }
}
