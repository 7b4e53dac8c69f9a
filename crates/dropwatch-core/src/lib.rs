//! # Dropwatch Core Library
//!
//! `dropwatch-core` watches a local directory and delivers every file that
//! appears in it to a single remote endpoint, one file at a time, over a plain
//! TCP stream.
//!
//! ## Features
//!
//! - **Ordered delivery**: files are sent in the order they are discovered
//! - **Bounded retries**: transient failures are retried with a fixed backoff
//! - **Streaming**: file bodies are sent in chunks, never buffered whole
//! - **Progress reporting**: per-file progress, throughput and outcome events
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`event`] - Events reported to the caller
//! - [`ledger`] - Per-file delivery status and retry counts
//! - [`protocol`] - Header framing and response parsing
//! - [`queue`] - FIFO of paths awaiting a send attempt
//! - [`scheduler`] - Serialized transfer scheduling and retry policy
//! - [`sender`] - Per-attempt transfer state machine
//! - [`session`] - Watcher + scheduler wiring
//! - [`watcher`] - Directory scanning and change notification
//!
//! ## Example
//!
//! ```rust,ignore
//! use dropwatch_core::{config::Config, session::WatchSession};
//!
//! let config = Config::load()?;
//! let session = WatchSession::new(config)?;
//! let ledger = session
//!     .run(|event| println!("{event:?}"), tokio::signal::ctrl_c())
//!     .await?;
//! println!("{} delivered", ledger.counts().succeeded);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod sender;
pub mod session;
pub mod watcher;

pub use error::{Error, FailureKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default endpoint host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default endpoint port
pub const DEFAULT_PORT: u16 = 65432;

/// Default chunk size for file bodies (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before a retried path is re-enqueued (ms)
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;

/// Default wait for the endpoint's response after the body is sent (s)
pub const DEFAULT_RESPONSE_TIMEOUT_SECS: u64 = 10;

/// Default connect timeout (s)
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default interval between throughput samples (ms)
pub const DEFAULT_SPEED_SAMPLE_MS: u64 = 500;
