//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dropwatch_core::config::{parse_duration, Config};

pub mod config;
pub mod send;
pub mod watch;

/// Load configuration.
///
/// An explicit `--config` path must parse. Without one, the default location
/// is used and a missing or unreadable file falls back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load().unwrap_or_default()),
    }
}

/// Dropwatch - deliver new files from a directory to a remote endpoint
#[derive(Parser)]
#[command(name = "dropwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Detailed logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Watch a directory and deliver every file that appears in it
    Watch(watch::WatchArgs),

    /// Deliver the given files once and exit
    Send(send::SendArgs),

    /// Inspect or reset the configuration file
    Config(config::ConfigArgs),
}

/// Endpoint, transfer and retry overrides shared by `watch` and `send`.
#[derive(Args, Debug, Default)]
pub struct EndpointArgs {
    /// Endpoint host name or IP address
    #[arg(long)]
    pub host: Option<String>,

    /// Endpoint TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Retries after the first attempt for refused or unreadable files
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Delay before a retry (e.g., 500ms, 2s)
    #[arg(long)]
    pub retry_delay: Option<String>,

    /// Bytes per body chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Wait for the endpoint's response (e.g., 10s, 1m)
    #[arg(long)]
    pub timeout: Option<String>,

    /// Configuration file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl EndpointArgs {
    /// Load the configuration and apply these overrides to it.
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = load_config(self.config.as_deref())?;
        self.apply(&mut config)?;
        Ok(config)
    }

    /// Apply command-line overrides to a configuration.
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(host) = &self.host {
            config.endpoint.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.endpoint.port = port;
        }
        if let Some(max_retries) = self.max_retries {
            config.retry.max_retries = max_retries;
        }
        if let Some(delay) = &self.retry_delay {
            config.retry.retry_delay =
                parse_duration(delay).with_context(|| format!("Invalid --retry-delay '{delay}'"))?;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.transfer.chunk_size = chunk_size;
        }
        if let Some(timeout) = &self.timeout {
            config.transfer.response_timeout =
                parse_duration(timeout).with_context(|| format!("Invalid --timeout '{timeout}'"))?;
        }
        Ok(())
    }
}

/// Output style shared by `watch` and `send`.
#[derive(Args, Debug, Default, Clone, Copy)]
pub struct OutputArgs {
    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output events as JSON lines
    #[arg(long)]
    pub json: bool,
}
