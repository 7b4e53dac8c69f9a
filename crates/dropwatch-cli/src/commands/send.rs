//! Send command handler.

use std::path::PathBuf;
use std::sync::Arc;

use dropwatch_core::sender::TcpConnector;
use dropwatch_core::session::deliver_files;

use super::{EndpointArgs, OutputArgs};
use crate::ui::{print_header, print_summary, EventPrinter};

/// Arguments for the send command
#[derive(clap::Parser)]
pub struct SendArgs {
    /// Files to deliver
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Run the send command
pub async fn run(args: SendArgs) -> anyhow::Result<()> {
    let config = args.endpoint.resolve()?;
    config.validate()?;

    let files = resolve_files(&args.files)?;

    let OutputArgs { quiet, json } = args.output;
    if !quiet && !json {
        print_header(&[
            format!("Sending {} file(s)", files.len()),
            format!("Endpoint:  {}", config.endpoint.address()),
        ]);
    }

    let connector = Arc::new(TcpConnector::new(&config.endpoint));
    let mut printer = EventPrinter::new(quiet, json);
    let ledger = deliver_files(
        &config,
        connector,
        files,
        move |event| printer.print(&event),
        tokio::signal::ctrl_c(),
    )
    .await?;

    print_summary(&ledger, quiet, json);

    let counts = ledger.counts();
    if counts.failed > 0 || counts.pending > 0 {
        anyhow::bail!(
            "{} of {} file(s) were not delivered",
            counts.failed + counts.pending,
            counts.total
        );
    }
    Ok(())
}

fn resolve_files(files: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|file| {
            let path = file
                .canonicalize()
                .map_err(|e| anyhow::anyhow!("Cannot access '{}': {}", file.display(), e))?;
            if !path.is_file() {
                anyhow::bail!("Not a regular file: {}", file.display());
            }
            Ok(path)
        })
        .collect()
}
