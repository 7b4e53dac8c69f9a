//! Single-attempt file delivery.
//!
//! A [`FileSender`] owns one file handle and one connection for the length
//! of a single attempt. It walks `Idle → Connecting → SendingBody →
//! AwaitingAck → Terminal` and returns an [`AttemptOutcome`]; `run` consumes
//! the sender, so every attempt gets a fresh instance.
//!
//! Connections come from a [`Connector`]. The production connector is
//! [`TcpConnector`]; tests plug in in-memory streams.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::config::{EndpointConfig, TransferConfig};
use crate::error::{Error, FailureKind, Result};
use crate::event::TransferEvent;
use crate::protocol::{self, FrameHeader, Response};

const BYTES_PER_MIB: f64 = 1_048_576.0;

/// Source of connections to the receiving endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Stream type produced by a successful connect
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a new connection.
    ///
    /// A refused connection must be reported as `Error::ConnectionRefused`;
    /// every other failure is treated as fatal for the attempt.
    fn connect(&self) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Endpoint description for logs.
    fn endpoint(&self) -> String;
}

/// Connects to the endpoint over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for an endpoint.
    #[must_use]
    pub fn new(endpoint: &EndpointConfig) -> Self {
        Self {
            address: endpoint.address(),
            connect_timeout: endpoint.connect_timeout,
        }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<TcpStream> {
        tracing::debug!("Connecting to {}", self.address);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                return Err(Error::ConnectionRefused(self.address.clone()));
            }
            Ok(Err(e)) => {
                return Err(Error::ConnectFailed {
                    endpoint: self.address.clone(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::ConnectFailed {
                    endpoint: self.address.clone(),
                    reason: format!("timed out after {:?}", self.connect_timeout),
                });
            }
        };

        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::warn!("Failed to enable TCP keep-alive: {}", e);
        }

        Ok(stream)
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}

/// Helper to configure TCP keepalive on a socket.
fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    use socket2::{SockRef, TcpKeepalive};

    let socket_ref = SockRef::from(stream);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Phase of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Not started
    Idle,
    /// File open, connection being established
    Connecting,
    /// Header sent, body streaming
    SendingBody,
    /// Body sent, waiting for the endpoint's answer
    AwaitingAck,
    /// Finished; file and connection released
    Terminal,
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Endpoint answered `SUCCESS`
    Success {
        /// Body bytes sent
        bytes: u64,
        /// Time from open to acknowledgement
        elapsed: Duration,
    },
    /// Attempt failed
    Failure {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable reason
        reason: String,
    },
}

impl AttemptOutcome {
    /// Returns whether the attempt succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Build a failure outcome from an error.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::Failure {
            kind: error.failure_kind(),
            reason: error.to_string(),
        }
    }
}

/// State machine for one delivery attempt of one file.
pub struct FileSender<C: Connector> {
    path: PathBuf,
    connector: Arc<C>,
    settings: TransferConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
    state: SenderState,
}

impl<C: Connector> FileSender<C> {
    /// Create a sender for one attempt.
    pub fn new(
        path: PathBuf,
        connector: Arc<C>,
        settings: TransferConfig,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            path,
            connector,
            settings,
            events,
            state: SenderState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Run the attempt to completion.
    pub async fn run(mut self) -> AttemptOutcome {
        let started = Instant::now();

        let outcome = match self.transfer().await {
            Ok(bytes) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    "Delivered {} ({} bytes in {:.2}s)",
                    self.path.display(),
                    bytes,
                    elapsed.as_secs_f64()
                );
                AttemptOutcome::Success { bytes, elapsed }
            }
            Err(e) => {
                tracing::debug!(
                    "Attempt for {} failed in state {:?}: {}",
                    self.path.display(),
                    self.state,
                    e
                );
                AttemptOutcome::from_error(&e)
            }
        };

        self.transition(SenderState::Terminal);
        outcome
    }

    async fn transfer(&mut self) -> Result<u64> {
        let file = File::open(&self.path).await.map_err(|source| Error::FileOpen {
            path: self.path.clone(),
            source,
        })?;
        let size = file.metadata().await?.len();
        let header = FrameHeader::for_path(&self.path, size)?;
        let encoded = header.encode()?;

        self.emit(TransferEvent::Started {
            path: self.path.clone(),
            size,
        });

        self.transition(SenderState::Connecting);
        let mut stream = self.connector.connect().await?;

        tracing::info!(
            "Sending {} ({} bytes) to {}",
            header.name_lossy(),
            size,
            self.connector.endpoint()
        );

        stream.write_all(&encoded).await.map_err(connection_lost)?;

        self.transition(SenderState::SendingBody);
        let sent = self.send_body(file, &mut stream, size).await?;

        self.transition(SenderState::AwaitingAck);
        let response =
            protocol::read_response_with_timeout(&mut stream, self.settings.response_timeout)
                .await?;

        if let Err(e) = stream.shutdown().await {
            tracing::debug!("Shutdown after response failed: {}", e);
        }

        match response {
            Response::Success => Ok(sent),
            Response::Failure => Err(Error::TransferRejected),
        }
    }

    async fn send_body<S>(&self, mut file: File, stream: &mut S, size: u64) -> Result<u64>
    where
        S: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; self.settings.chunk_size.max(1)];
        let mut sent: u64 = 0;
        let mut last_percent = None;
        let mut window_start = Instant::now();
        let mut window_bytes: u64 = 0;

        while sent < size {
            let remaining = size - sent;
            let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));

            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(Error::FileTruncated {
                    path: self.path.clone(),
                    sent,
                    expected: size,
                });
            }

            stream.write_all(&buf[..n]).await.map_err(connection_lost)?;
            sent += n as u64;
            window_bytes += n as u64;

            let percent = progress_percent(sent, size);
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                self.emit(TransferEvent::Progress {
                    path: self.path.clone(),
                    percent,
                });
            }

            let window = window_start.elapsed();
            if window >= self.settings.speed_sample_interval && !window.is_zero() {
                self.emit(TransferEvent::Speed {
                    path: self.path.clone(),
                    mib_per_sec: mib_per_sec(window_bytes, window),
                });
                window_start = Instant::now();
                window_bytes = 0;
            }
        }

        stream.flush().await.map_err(connection_lost)?;
        drop(file);

        if last_percent != Some(100) {
            self.emit(TransferEvent::Progress {
                path: self.path.clone(),
                percent: 100,
            });
        }

        Ok(sent)
    }

    fn transition(&mut self, next: SenderState) {
        tracing::debug!(
            "{}: {:?} -> {:?}",
            self.path.display(),
            self.state,
            next
        );
        self.state = next;
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

fn connection_lost(e: std::io::Error) -> Error {
    Error::ConnectionLost(e.to_string())
}

/// Whole percent of `sent` over `size`, capped at 100.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn progress_percent(sent: u64, size: u64) -> u8 {
    if size == 0 {
        return 100;
    }
    ((u128::from(sent) * 100) / u128::from(size)).min(100) as u8
}

/// Throughput in MiB/s for `bytes` sent over `window`.
#[must_use]
pub fn mib_per_sec(bytes: u64, window: Duration) -> f64 {
    let secs = window.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / BYTES_PER_MIB
}
