//! Common test utilities for `Dropwatch` integration tests.
//!
//! Provides temp files, an in-process receiving endpoint and a scripted
//! connector that answers each connection according to a list of steps.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use dropwatch_core::config::Config;
use dropwatch_core::event::TransferEvent;
use dropwatch_core::protocol::{read_header, write_response, Response};
use dropwatch_core::sender::Connector;
use dropwatch_core::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpListener;

/// Create a temporary directory for test files.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Default config with 1 KiB chunks.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.transfer.chunk_size = 1024;
    config
}

/// A file as seen by the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Basename from the header
    pub name: String,
    /// Body bytes
    pub body: Vec<u8>,
}

/// Read one header and body from a stream.
pub async fn receive_file<S>(stream: &mut S) -> ReceivedFile
where
    S: AsyncRead + Unpin,
{
    let header = read_header(stream).await.expect("read header");
    let mut body = vec![0u8; usize::try_from(header.file_size).unwrap()];
    stream.read_exact(&mut body).await.expect("read body");
    ReceivedFile {
        name: header.name_lossy(),
        body,
    }
}

/// Spawn a TCP endpoint on loopback that accepts `count` connections,
/// answering each with `response`.
pub async fn spawn_tcp_receiver(
    count: usize,
    response: Response,
) -> (u16, tokio::task::JoinHandle<Vec<ReceivedFile>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        for _ in 0..count {
            let (mut stream, _) = listener.accept().await.expect("accept");
            received.push(receive_file(&mut stream).await);
            write_response(&mut stream, response).await.expect("respond");
        }
        received
    });

    (port, handle)
}

/// What the scripted endpoint does with one connection.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Refuse the connection
    Refuse,
    /// Receive the file and answer
    Respond(Response),
    /// Receive the file and answer with arbitrary bytes
    Reply(&'static [u8]),
    /// Receive the file and close without answering
    Close,
    /// Receive the file and never answer
    Silent,
}

/// Shared state recorded by a [`ScriptedConnector`].
#[derive(Debug, Default)]
pub struct ScriptLog {
    /// Connect calls, including refused ones
    pub connects: AtomicUsize,
    /// Connections currently open on the client side
    pub open: AtomicUsize,
    /// Most connections open at once
    pub max_open: AtomicUsize,
    /// Files fully received, in arrival order
    pub received: Mutex<Vec<ReceivedFile>>,
}

impl ScriptLog {
    /// Names of received files in arrival order.
    pub fn received_names(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Connector backed by in-memory streams, driven by a list of steps.
///
/// Once the script runs out every connection is answered with `SUCCESS`.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    /// What happened so far
    pub log: Arc<ScriptLog>,
}

impl ScriptedConnector {
    /// Create a connector that plays `steps` in order.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            log: Arc::default(),
        })
    }

    /// Create a connector that accepts every connection.
    pub fn accepting() -> Arc<Self> {
        Self::new(Vec::<Step>::new())
    }

    /// Create a connector that refuses `times` then accepts.
    pub fn refusing(times: usize) -> Arc<Self> {
        Self::new(std::iter::repeat(Step::Refuse).take(times))
    }
}

impl Connector for ScriptedConnector {
    type Stream = TrackedStream;

    fn connect(&self) -> impl Future<Output = Result<TrackedStream>> + Send {
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Respond(Response::Success));
        let log = Arc::clone(&self.log);

        async move {
            log.connects.fetch_add(1, Ordering::SeqCst);
            if let Step::Refuse = step {
                return Err(Error::ConnectionRefused("scripted".to_string()));
            }

            let (client, mut server) = tokio::io::duplex(8 * 1024);
            let server_log = Arc::clone(&log);
            tokio::spawn(async move {
                let file = receive_file(&mut server).await;
                server_log.received.lock().unwrap().push(file);
                match step {
                    Step::Respond(response) => {
                        let _ = write_response(&mut server, response).await;
                    }
                    Step::Reply(bytes) => {
                        let _ = server.write_all(bytes).await;
                    }
                    Step::Silent => {
                        let mut rest = Vec::new();
                        let _ = server.read_to_end(&mut rest).await;
                    }
                    Step::Close | Step::Refuse => {}
                }
            });

            let open = log.open.fetch_add(1, Ordering::SeqCst) + 1;
            log.max_open.fetch_max(open, Ordering::SeqCst);
            Ok(TrackedStream { inner: client, log })
        }
    }

    fn endpoint(&self) -> String {
        "scripted".to_string()
    }
}

/// Client side of a scripted connection; counts itself as open until dropped.
pub struct TrackedStream {
    inner: DuplexStream,
    log: Arc<ScriptLog>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.log.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Collects events from a session callback.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TransferEvent>>>,
}

impl EventLog {
    /// Callback that appends to this log.
    pub fn recorder(&self) -> impl FnMut(TransferEvent) {
        let events = Arc::clone(&self.events);
        move |event| events.lock().unwrap().push(event)
    }

    /// Snapshot of recorded events.
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of `RetryScheduled` events.
    pub fn retries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TransferEvent::RetryScheduled { .. }))
            .count()
    }
}
