//! Watcher and scheduler wiring.
//!
//! A [`WatchSession`] scans the configured directory, starts watching it and
//! feeds every candidate path to a [`TransferScheduler`] running on its own
//! task. Events are handed to a caller-supplied callback until the shutdown
//! future completes. [`deliver_files`] runs the same scheduler over a fixed
//! list of paths and returns once they are all resolved.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::TransferEvent;
use crate::ledger::TransferLedger;
use crate::scheduler::TransferScheduler;
use crate::sender::{Connector, TcpConnector};
use crate::watcher::DirectoryWatcher;

/// Capacity of the discovery channel between watcher and scheduler.
const DISCOVERY_CHANNEL_CAPACITY: usize = 100;

/// A running watch-and-deliver session.
pub struct WatchSession<C: Connector = TcpConnector> {
    config: Config,
    directory: PathBuf,
    connector: Arc<C>,
}

impl std::fmt::Debug for WatchSession<TcpConnector> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("directory", &self.directory)
            .field("endpoint", &self.config.endpoint.address())
            .finish_non_exhaustive()
    }
}

impl WatchSession<TcpConnector> {
    /// Create a session that delivers over TCP to the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or names no
    /// directory to watch.
    pub fn new(config: Config) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(&config.endpoint));
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> WatchSession<C> {
    /// Create a session with a custom connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or names no
    /// directory to watch.
    pub fn with_connector(config: Config, connector: Arc<C>) -> Result<Self> {
        config.validate()?;
        let directory = config
            .watch
            .directory
            .clone()
            .ok_or_else(|| Error::InvalidConfig {
                key: "watch.directory".to_string(),
                reason: "no directory to watch".to_string(),
            })?;

        Ok(Self {
            config,
            directory,
            connector,
        })
    }

    /// Directory this session watches.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Watch and deliver until `shutdown` completes.
    ///
    /// Returns the final ledger. Files still queued or waiting on a retry when
    /// shutdown arrives stay `Pending`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be watched or scanned, or if
    /// the scheduler task panics.
    pub async fn run<F, S>(self, mut event_callback: F, shutdown: S) -> Result<TransferLedger>
    where
        F: FnMut(TransferEvent),
        S: Future,
    {
        let mut watcher = DirectoryWatcher::new(&self.directory, &self.config.watch)?;
        watcher.start()?;

        let initial = if self.config.watch.scan_on_start {
            watcher.scan()?
        } else {
            Vec::new()
        };
        tracing::info!(
            "Initial scan of {} found {} files",
            watcher.directory().display(),
            initial.len()
        );

        let token = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (paths_tx, paths_rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);

        let scheduler = TransferScheduler::from_config(self.connector, &self.config, events_tx);
        let scheduler_handle = tokio::spawn(scheduler.run(paths_rx, token.clone()));

        let forward_token = token.clone();
        let forwarder = tokio::spawn(async move {
            for path in initial {
                if paths_tx.send(path).await.is_err() {
                    return;
                }
            }
            loop {
                tokio::select! {
                    () = forward_token.cancelled() => break,
                    path = watcher.next_path() => {
                        let Some(path) = path else { break };
                        if paths_tx.send(path).await.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = watcher.stop() {
                tracing::debug!("Failed to stop watcher: {}", e);
            }
        });

        let ledger = pump_events(
            scheduler_handle,
            events_rx,
            token.clone(),
            shutdown,
            &mut event_callback,
        )
        .await;

        token.cancel();
        if let Err(e) = forwarder.await {
            tracing::warn!("Watcher task failed: {}", e);
        }

        ledger
    }
}

/// Deliver a fixed list of files and return once every one is resolved.
///
/// Duplicate paths are sent once. If `shutdown` completes first, the file in
/// flight is recorded as failed and the rest stay `Pending`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the scheduler task
/// panics.
pub async fn deliver_files<C, F, S>(
    config: &Config,
    connector: Arc<C>,
    paths: Vec<PathBuf>,
    mut event_callback: F,
    shutdown: S,
) -> Result<TransferLedger>
where
    C: Connector,
    F: FnMut(TransferEvent),
    S: Future,
{
    config.validate()?;

    let token = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (paths_tx, paths_rx) = mpsc::channel(paths.len().max(1));

    for path in paths {
        paths_tx
            .send(path)
            .await
            .map_err(|_| Error::Internal("discovery channel closed".to_string()))?;
    }
    drop(paths_tx);

    let scheduler = TransferScheduler::from_config(connector, config, events_tx);
    let handle = tokio::spawn(scheduler.run(paths_rx, token.clone()));

    pump_events(handle, events_rx, token, shutdown, &mut event_callback).await
}

async fn pump_events<F, S>(
    mut scheduler: JoinHandle<TransferLedger>,
    mut events: mpsc::UnboundedReceiver<TransferEvent>,
    token: CancellationToken,
    shutdown: S,
    event_callback: &mut F,
) -> Result<TransferLedger>
where
    F: FnMut(TransferEvent),
    S: Future,
{
    tokio::pin!(shutdown);
    let mut stopping = false;

    let ledger = loop {
        tokio::select! {
            Some(event) = events.recv() => event_callback(event),
            _ = &mut shutdown, if !stopping => {
                tracing::info!("Stopping");
                stopping = true;
                token.cancel();
            }
            result = &mut scheduler => {
                break result.map_err(|e| Error::Internal(format!("scheduler task failed: {e}")))?;
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        event_callback(event);
    }

    Ok(ledger)
}
