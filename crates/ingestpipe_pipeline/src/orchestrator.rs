//! Job Orchestrator (spec.md section 4.8): runs N pipelines concurrently,
//! bounded by a configured worker count, and aggregates their results.
//!
//! Concurrency is driven by [`futures::stream::StreamExt::buffer_unordered`]
//! rather than `tokio::spawn` — every pipeline borrows the run's
//! [`WarehouseClient`] and [`StageManager`] by reference, and spawning would
//! require those borrows to be `'static`. Polling the futures concurrently
//! on the calling task needs no such bound and gives the same FIFO-admission,
//! bounded-fan-out behavior spec.md asks for.

use std::time::Instant;

use futures::stream::{self, StreamExt};
use ingestpipe_db::{StageManager, WarehouseClient};
use ingestpipe_protocol::{CancellationToken, JobSummary, LoadResult, LoadStatus, ProgressEvent, ResolvedFile};

use crate::controller::{PipelineController, PipelineSettings};
use crate::progress::ProgressHandle;

pub const DEFAULT_MAX_WORKERS: usize = 8;

/// `min(CPU count, 8)`, matching spec.md section 4.8's default.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(DEFAULT_MAX_WORKERS))
        .unwrap_or(DEFAULT_MAX_WORKERS)
}

pub struct Orchestrator<'a> {
    client: &'a WarehouseClient,
    stage: &'a StageManager<'a>,
    max_workers: usize,
    settings: PipelineSettings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a WarehouseClient,
        stage: &'a StageManager<'a>,
        max_workers: usize,
        settings: PipelineSettings,
    ) -> Self {
        Self { client, stage, max_workers: max_workers.max(1), settings }
    }

    /// Runs every file, at most `max_workers` in flight, and returns one
    /// [`LoadResult`] per input in **completion order** (not submission
    /// order) — callers that need a stable order should sort by `file`.
    pub async fn run(
        &self,
        resolved: Vec<ResolvedFile>,
        cancel: CancellationToken,
        progress: ProgressHandle,
    ) -> OrchestratorSummary {
        let started = Instant::now();
        let client = self.client;
        let stage = self.stage;

        let futures_iter = resolved.into_iter().map(|file| {
            let cancel = cancel.clone();
            let progress = progress.clone();
            let settings = self.settings.clone();
            async move {
                let controller = PipelineController::new(client, stage, cancel, progress, settings);
                controller.run(&file).await
            }
        });

        let results: Vec<LoadResult> =
            stream::iter(futures_iter).buffer_unordered(self.max_workers).collect().await;

        let summary = summarize(&results, started.elapsed());
        progress.send(ProgressEvent::JobDone { summary: summary.clone() });
        OrchestratorSummary { results, summary }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSummary {
    pub results: Vec<LoadResult>,
    pub summary: JobSummary,
}

fn summarize(results: &[LoadResult], wall_time: std::time::Duration) -> JobSummary {
    let mut summary = JobSummary { wall_time, ..Default::default() };
    for result in results {
        match result.status {
            LoadStatus::Success | LoadStatus::SucceededWithWarnings => {
                summary.processed += 1;
                summary.rows_loaded_total += result.rows_loaded;
            }
            LoadStatus::Skipped => summary.skipped += 1,
            LoadStatus::Failed => summary.failed += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_workers_is_bounded() {
        assert!(default_max_workers() >= 1);
        assert!(default_max_workers() <= DEFAULT_MAX_WORKERS);
    }

    fn fixture(status: LoadStatus, rows_loaded: u64) -> LoadResult {
        LoadResult {
            file: std::path::PathBuf::from("fixture.csv"),
            status,
            rows_loaded,
            bytes_sent: 0,
            phase_durations: Vec::new(),
            error: None,
            validation: None,
        }
    }

    #[test]
    fn summarize_counts_each_status_once() {
        let results = vec![
            fixture(LoadStatus::Success, 10),
            fixture(LoadStatus::Failed, 0),
            fixture(LoadStatus::Skipped, 0),
            fixture(LoadStatus::SucceededWithWarnings, 5),
        ];
        let summary = summarize(&results, std::time::Duration::from_secs(1));
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.rows_loaded_total, 15);
    }
}
