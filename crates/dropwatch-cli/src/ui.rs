//! UI utilities for Dropwatch CLI.

use std::io::Write;
use std::path::Path;

use dropwatch_core::event::TransferEvent;
use dropwatch_core::ledger::{FileStatus, TransferLedger};

/// Print the banner shown before a session starts.
pub fn print_header(lines: &[String]) {
    println!("\nDropwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("─────────────────────────────────────");
    println!();
    for line in lines {
        println!("  {}", line);
    }
    println!();
}

/// Print an error and, for known failures, a hint on how to fix it.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("Error: {err:#}");

    if let Some(suggestion) = suggestion_for(err) {
        eprintln!();
        eprintln!("Suggestion:");
        for line in suggestion.lines() {
            eprintln!("  {line}");
        }
    }
}

fn suggestion_for(err: &anyhow::Error) -> Option<&'static str> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<dropwatch_core::Error>())
        .and_then(dropwatch_core::Error::suggestion)
}

/// Renders transfer events for one session.
///
/// Keeps the last progress and throughput of the file being sent so both
/// share a single, redrawn status line.
#[derive(Debug, Default)]
pub struct EventPrinter {
    quiet: bool,
    json: bool,
    percent: u8,
    speed: Option<f64>,
}

impl EventPrinter {
    /// Create a printer for the chosen output style.
    #[must_use]
    pub fn new(quiet: bool, json: bool) -> Self {
        Self {
            quiet,
            json,
            ..Self::default()
        }
    }

    /// Print a transfer event.
    pub fn print(&mut self, event: &TransferEvent) {
        if self.json {
            if let Ok(json_str) = serde_json::to_string(event) {
                println!("{}", json_str);
            }
            return;
        }

        if self.quiet {
            if let TransferEvent::Failed { path, reason, .. } = event {
                eprintln!("✗ {}: {}", file_name(path), reason);
            }
            return;
        }

        match event {
            TransferEvent::Started { .. } => {
                self.percent = 0;
                self.speed = None;
            }
            TransferEvent::Progress { percent, .. } => self.percent = *percent,
            TransferEvent::Speed { mib_per_sec, .. } => self.speed = Some(*mib_per_sec),
            _ => {}
        }
        print_event_line(event, self.percent, self.speed);
    }
}

fn print_event_line(event: &TransferEvent, percent: u8, speed: Option<f64>) {
    match event {
        TransferEvent::Discovered { path } => {
            println!("  + Queued: {}", file_name(path));
        }
        TransferEvent::Started { path, size } => {
            println!("  → Sending: {} ({})", file_name(path), format_size(*size));
        }
        TransferEvent::Progress { .. } | TransferEvent::Speed { .. } => {
            print!("\r{}", progress_line(percent, speed));
            let _ = std::io::stdout().flush();
        }
        TransferEvent::Succeeded {
            path,
            bytes,
            elapsed_ms,
        } => {
            println!(
                "\r  ✓ Delivered: {} ({} in {})",
                file_name(path),
                format_size(*bytes),
                format_elapsed(*elapsed_ms)
            );
        }
        TransferEvent::RetryScheduled {
            path,
            retry,
            delay_ms,
            reason,
        } => {
            println!(
                "\r  ↻ Retry {} for {} in {}: {}",
                retry,
                file_name(path),
                format_elapsed(*delay_ms),
                reason
            );
        }
        TransferEvent::Failed { path, kind, reason } => {
            eprintln!("\r  ✗ Failed: {} [{}] {}", file_name(path), kind, reason);
        }
        TransferEvent::Stats { .. } => {}
    }
}

/// Status line for the file being sent, e.g. `     42%  3.25 MiB/s`.
pub fn progress_line(percent: u8, speed: Option<f64>) -> String {
    match speed {
        Some(speed) => format!("    {percent:>3}%  {speed:.2} MiB/s"),
        None => format!("    {percent:>3}%"),
    }
}

/// Print the final ledger summary.
pub fn print_summary(ledger: &TransferLedger, quiet: bool, json: bool) {
    let counts = ledger.counts();

    if json {
        if let Ok(json_str) = serde_json::to_string(&counts) {
            println!("{}", json_str);
        }
        return;
    }
    if quiet {
        return;
    }

    println!();
    println!("  Session ended. Stats:");
    println!("    Discovered: {}", counts.total);
    println!("    Delivered:  {}", counts.succeeded);
    println!("    Failed:     {}", counts.failed);
    if counts.pending > 0 {
        println!("    Pending:    {}", counts.pending);
    }

    let failed: Vec<_> = ledger
        .entries()
        .into_iter()
        .filter(|(_, entry)| entry.status == FileStatus::Failure)
        .collect();
    if !failed.is_empty() {
        println!();
        println!("  Failed files:");
        for (path, entry) in failed {
            println!(
                "    {} ({} attempt{})",
                path.display(),
                entry.attempts,
                if entry.attempts == 1 { "" } else { "s" }
            );
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// Format a byte count for humans.
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format a millisecond duration as `850ms`, `2.0s` or `1m 05s`.
#[allow(clippy::cast_precision_loss)]
pub fn format_elapsed(millis: u64) -> String {
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let secs = millis / 1000;
        format!("{}m {:02}s", secs / 60, secs % 60)
    }
}
