//! One module per CLI subcommand (spec.md section 6).

pub mod check_duplicates;
pub mod compare;
pub mod config_cmd;
pub mod delete;
pub mod load;
pub mod output;
pub mod report;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use ingestpipe_db::{ConnectOptions, WarehouseClient};
use ingestpipe_pipeline::EventSink;
use ingestpipe_protocol::{ProgressEvent, WarehouseConfig};

/// Parses a `YYYY-MM` CLI argument into the first-of-month date the rest of
/// the system anchors its calendar math on.
pub fn parse_month(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d")
        .with_context(|| format!("'{raw}' is not a valid month (expected YYYY-MM)"))
}

/// Opens a warehouse pool tagged with a fresh run id (SPEC_FULL.md section
/// B.4, query tagging).
pub async fn connect(warehouse: &WarehouseConfig) -> Result<WarehouseClient> {
    let run_id = uuid::Uuid::new_v4().to_string();
    WarehouseClient::connect(ConnectOptions::from_config(warehouse, run_id))
        .await
        .context("failed to connect to warehouse")
}

/// An [`EventSink`] backed by the structured `events.jsonl` file
/// (`ingestpipe_logging::EventLogWriter`), used by every subcommand that
/// drives a [`ProgressTracker`](ingestpipe_pipeline::ProgressTracker).
struct LoggingEventSink(ingestpipe_logging::EventLogWriter);

impl EventSink for LoggingEventSink {
    fn write_event(&mut self, event: &ProgressEvent) {
        if let Err(err) = self.0.write_event(event) {
            tracing::warn!(error = %err, "failed to write progress event");
        }
    }
}

pub fn event_sink(log_dir: &Path) -> Result<Box<dyn EventSink>> {
    let writer = ingestpipe_logging::EventLogWriter::open(log_dir)
        .context("failed to open structured events file")?;
    Ok(Box::new(LoggingEventSink(writer)))
}

/// Picks a display mode for the Progress Tracker: rich multi-bar TUI on an
/// interactive terminal, one-line-per-transition otherwise. `--quiet`
/// silences the display surface but the structured events file still gets
/// every event.
pub fn display_mode(quiet: bool) -> ingestpipe_pipeline::DisplayMode {
    use ingestpipe_pipeline::DisplayMode;
    if quiet {
        DisplayMode::Silent
    } else if atty_stdout() {
        DisplayMode::Rich
    } else {
        DisplayMode::Plain
    }
}

fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

/// Maps the handful of statuses every subcommand's exit code depends on:
/// all-clean is `0`, anything that completed but found a problem is `1`,
/// cooperative cancellation is `130` (spec.md section 6).
pub const EXIT_OK: i32 = 0;
pub const EXIT_PROBLEM: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;
