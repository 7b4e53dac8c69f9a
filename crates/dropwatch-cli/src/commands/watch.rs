//! Watch command handler.

use std::path::PathBuf;

use dropwatch_core::session::WatchSession;

use super::{EndpointArgs, OutputArgs};
use crate::ui::{print_header, print_summary, EventPrinter};

/// Arguments for the watch command
#[derive(clap::Parser)]
pub struct WatchArgs {
    /// Directory to watch (defaults to `watch.directory` from the config)
    pub directory: Option<PathBuf>,

    /// Patterns to exclude (can be specified multiple times)
    #[arg(short = 'x', long = "exclude", action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,

    /// Skip files already in the directory when watching starts
    #[arg(long)]
    pub no_scan: bool,

    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Run the watch command
pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let mut config = args.endpoint.resolve()?;

    if let Some(directory) = &args.directory {
        let directory = directory.canonicalize().map_err(|e| {
            anyhow::anyhow!("Cannot access directory '{}': {}", directory.display(), e)
        })?;
        if !directory.is_dir() {
            anyhow::bail!("Not a directory: {}", directory.display());
        }
        config.watch.directory = Some(directory);
    }
    config.watch.exclude_patterns.extend(args.exclude.iter().cloned());
    if args.no_scan {
        config.watch.scan_on_start = false;
    }

    let session = WatchSession::new(config.clone())?;

    let OutputArgs { quiet, json } = args.output;
    if !quiet && !json {
        print_header(&[
            format!("Watching:  {}", session.directory().display()),
            format!("Endpoint:  {}", config.endpoint.address()),
            "Press Ctrl+C to stop".to_string(),
        ]);
    }

    let mut printer = EventPrinter::new(quiet, json);
    let ledger = session
        .run(move |event| printer.print(&event), tokio::signal::ctrl_c())
        .await?;

    print_summary(&ledger, quiet, json);
    Ok(())
}
