//! `load` (spec.md section 6): resolves every configured file for one month
//! and runs it through the Job Orchestrator.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use ingestpipe_db::StageManager;
use ingestpipe_pipeline::{
    default_max_workers, resolve_file_spec, Orchestrator, PipelineSettings, ProgressTracker,
    ResolveError,
};
use ingestpipe_protocol::{CancellationToken, Config, ErrorKind, LoadResult, LoadStatus};
use tracing::warn;

use super::{connect, display_mode, event_sink, parse_month, EXIT_CANCELLED, EXIT_OK, EXIT_PROBLEM};

const STALE_STAGE_MAX_AGE_HOURS: u64 = 24;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    config: &Config,
    base_path: &Path,
    month: &str,
    skip_qc: bool,
    validate_in_snowflake: bool,
    max_workers: Option<usize>,
    log_dir: &Path,
    quiet: bool,
) -> Result<ExitCode> {
    let month = parse_month(month)?;
    let client = connect(&config.warehouse).await?;

    let stage = StageManager::create(&client, "ingestpipe")
        .await
        .context("failed to create stage namespace")?;
    if let Err(err) = StageManager::prune_stale(
        &client,
        std::time::Duration::from_secs(STALE_STAGE_MAX_AGE_HOURS * 3600),
    )
    .await
    {
        warn!(error = %err, "failed to prune stale stage namespaces at startup");
    }

    let (resolved, mut results) = resolve_all(config, base_path, month);

    let (tracker, progress) = ProgressTracker::new(display_mode(quiet), event_sink(log_dir)?);
    let tracker_task = tokio::spawn(tracker.run());

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let settings = PipelineSettings {
        skip_qc,
        validation_gate_success: validate_in_snowflake,
        ..PipelineSettings::default()
    };
    let workers = max_workers.unwrap_or_else(default_max_workers);
    let orchestrator = Orchestrator::new(&client, &stage, workers, settings);
    let outcome = orchestrator.run(resolved, cancel.clone(), progress).await;

    tracker_task.await.context("progress tracker task panicked")?;

    results.extend(outcome.results);
    report_summary(&results);

    if cancel.is_cancelled() {
        return Ok(ExitCode::from(EXIT_CANCELLED as u8));
    }
    if results.iter().any(|r| r.status == LoadStatus::Failed) {
        return Ok(ExitCode::from(EXIT_PROBLEM as u8));
    }
    Ok(ExitCode::from(EXIT_OK as u8))
}

/// Resolves every configured file spec against `month`. A pattern with no
/// placeholder is a configuration error and aborts the whole run before any
/// file is scheduled; a file simply absent on disk only fails that one file
/// (spec.md section 7: `InputNotFound` "marks that file Failed; other files
/// proceed").
fn resolve_all(
    config: &Config,
    base_path: &Path,
    month: chrono::NaiveDate,
) -> (Vec<ingestpipe_protocol::ResolvedFile>, Vec<LoadResult>) {
    let mut resolved = Vec::new();
    let mut early_failures = Vec::new();

    for spec in &config.files {
        match resolve_file_spec(base_path, spec, month) {
            Ok(file) => resolved.push(file),
            Err(ResolveError::NoPlaceholder(pattern)) => {
                warn!(pattern = %pattern, "file pattern has no placeholder, configuration is broken");
                early_failures.push(failure(base_path, spec, ErrorKind::ConfigurationError, pattern));
            }
            Err(err) => {
                warn!(table = %spec.table_name, error = %err, "failed to resolve file");
                early_failures.push(failure(base_path, spec, ErrorKind::InputNotFound, err.to_string()));
            }
        }
    }

    (resolved, early_failures)
}

fn failure(
    base_path: &Path,
    spec: &ingestpipe_protocol::FileSpec,
    kind: ErrorKind,
    message: String,
) -> LoadResult {
    LoadResult {
        file: base_path.join(&spec.file_pattern),
        status: LoadStatus::Failed,
        rows_loaded: 0,
        bytes_sent: 0,
        phase_durations: Vec::new(),
        error: Some((kind, message)),
        validation: None,
    }
}

fn report_summary(results: &[LoadResult]) {
    let processed = results
        .iter()
        .filter(|r| matches!(r.status, LoadStatus::Success | LoadStatus::SucceededWithWarnings))
        .count();
    let failed = results.iter().filter(|r| r.status == LoadStatus::Failed).count();
    let skipped = results.iter().filter(|r| r.status == LoadStatus::Skipped).count();
    let rows_loaded: u64 = results.iter().map(|r| r.rows_loaded).sum();
    println!("{processed} processed, {failed} failed, {skipped} skipped, {rows_loaded} rows loaded");
    for result in results.iter().filter(|r| r.status == LoadStatus::Failed) {
        if let Some((kind, message)) = &result.error {
            println!("  FAILED {}: {kind}: {message}", result.file.display());
        }
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });
}
