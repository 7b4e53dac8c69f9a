//! Error types for Dropwatch.
//!
//! This module provides a unified error type for all Dropwatch operations,
//! with specific error variants for different failure modes, and the
//! [`FailureKind`] taxonomy the scheduler uses to decide whether a failed
//! attempt is retried.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialized `Result` type for Dropwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Dropwatch.
#[derive(Error, Debug)]
pub enum Error {
    /// File could not be opened for reading
    #[error("cannot open '{path}': {source}")]
    FileOpen {
        /// File that failed to open
        path: PathBuf,
        /// Underlying I/O error
        source: io::Error,
    },

    /// Endpoint refused the connection
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    /// Any other connect-time failure
    #[error("cannot connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// Endpoint address
        endpoint: String,
        /// Reason for the failure
        reason: String,
    },

    /// Connection closed or broken before a response arrived
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response within the wait window
    #[error("no response from endpoint after {0:?}")]
    Timeout(Duration),

    /// Endpoint answered `FAILURE`
    #[error("endpoint rejected the file")]
    TransferRejected,

    /// Endpoint answered something other than `SUCCESS` or `FAILURE`
    #[error("unknown response from endpoint: {0:?}")]
    UnknownResponse(String),

    /// Header could not be encoded or decoded
    #[error("invalid protocol frame: {0}")]
    ProtocolError(String),

    /// File ended before its recorded size was sent
    #[error("file '{path}' shrank during transfer: sent {sent} of {expected} bytes")]
    FileTruncated {
        /// File being sent
        path: PathBuf,
        /// Bytes sent before EOF
        sent: u64,
        /// Size recorded when the file was opened
        expected: u64,
    },

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// File system watcher error
    #[error("file watcher error: {0}")]
    WatcherError(String),

    /// Directory not found
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Invalid path
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// File could not be opened for reading
    Open,
    /// Endpoint refused the connection
    Refused,
    /// Non-transient failure (connect error, local I/O, bad header)
    Fatal,
    /// No response within the wait window
    Timeout,
    /// Connection lost before a response arrived
    ConnectionLost,
    /// Endpoint rejected the file or answered with garbage
    Protocol,
}

impl FailureKind {
    /// Returns whether the scheduler may re-attempt a path that failed this way.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Open | Self::Refused)
    }

    /// Short lowercase label, used in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Refused => "refused",
            Self::Fatal => "fatal",
            Self::Timeout => "timeout",
            Self::ConnectionLost => "connection_lost",
            Self::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error as the failure of a transfer attempt.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::FileOpen { .. } => FailureKind::Open,
            Self::ConnectionRefused(_) => FailureKind::Refused,
            Self::ConnectionLost(_) => FailureKind::ConnectionLost,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::TransferRejected | Self::UnknownResponse(_) => FailureKind::Protocol,
            _ => FailureKind::Fatal,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.failure_kind().is_retryable()
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ConnectionRefused(_) => {
                Some("Check that the receiving endpoint is running and listening on that port.")
            }
            Self::DirectoryNotFound(_) => Some("Create the directory or pass an existing one."),
            Self::InvalidConfig { .. } | Self::ConfigError(_) => {
                Some("Run 'dropwatch config path' to locate the configuration file.")
            }
            _ => None,
        }
    }
}
