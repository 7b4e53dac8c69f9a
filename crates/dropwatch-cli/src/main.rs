//! Dropwatch CLI - deliver new files from a directory to a remote endpoint
//!
//! Dropwatch watches a directory and sends every file that appears in it,
//! one at a time, to a receiving endpoint over TCP.
//!
//! ## Quick Start
//!
//! ```bash
//! # Watch a directory and deliver to the default endpoint (127.0.0.1:65432)
//! dropwatch watch ./outgoing
//!
//! # Deliver a couple of files once
//! dropwatch send report.csv photo.jpg --host 10.0.0.5 --port 9000
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Watch(args) => commands::watch::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
        Command::Config(args) => commands::config::run(&args),
    };

    if let Err(err) = result {
        ui::print_error(&err);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "info,dropwatch=debug,dropwatch_core=debug"
    } else {
        "warn,dropwatch=info,dropwatch_core=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}
