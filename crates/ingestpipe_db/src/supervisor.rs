//! Async Job Supervisor (spec.md section 4.5).
//!
//! A COPY of a multi-GiB file can run for tens of minutes; this supervisor
//! keeps the warehouse session alive, bounds how long it will wait, and
//! surfaces cooperative cancellation — all while the caller only ever sees
//! one terminal outcome.
//!
//! State machine: `Submitted -> Polling -> (Succeeded | Failed | TimedOut |
//! Cancelled)`. Transitions are monotone: once a terminal outcome is
//! reached the supervisor never polls again.

use std::time::{Duration, Instant};

use ingestpipe_protocol::CancellationToken;
use tracing::{info, warn};

use crate::client::{JobHandle, JobStatus, WarehouseClient};
use crate::error::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(240);
const DEFAULT_WALL_CLOCK_CEILING: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub keep_alive_interval: Duration,
    pub wall_clock_ceiling: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            wall_clock_ceiling: DEFAULT_WALL_CLOCK_CEILING,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Succeeded { rows_affected: u64 },
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Drives one async job to a terminal outcome.
///
/// Holds no state across calls to [`AsyncJobSupervisor::supervise`] — one
/// instance supervises any number of handles sequentially, which is how the
/// Pipeline Controller uses it (one handle per file's Load phase).
pub struct AsyncJobSupervisor<'a> {
    client: &'a WarehouseClient,
    settings: SupervisorSettings,
}

impl<'a> AsyncJobSupervisor<'a> {
    pub fn new(client: &'a WarehouseClient, settings: SupervisorSettings) -> Self {
        Self { client, settings }
    }

    /// Polls `handle` to completion, sending keep-alives on a sibling
    /// connection of the same pool and checking `cancel` on every tick.
    pub async fn supervise(
        &self,
        handle: &JobHandle,
        cancel: &CancellationToken,
    ) -> Result<SupervisorOutcome> {
        info!(query_id = %handle.query_id, "async job submitted");
        let started = Instant::now();
        let mut last_keep_alive = Instant::now();
        let mut keep_alives_sent = 0u32;

        loop {
            if cancel.is_cancelled() {
                warn!(query_id = %handle.query_id, "cancellation observed, aborting server-side job");
                self.client.cancel_job(handle).await?;
                return Ok(SupervisorOutcome::Cancelled);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.wall_clock_ceiling {
                warn!(query_id = %handle.query_id, ?elapsed, "wall-clock ceiling exceeded, cancelling");
                self.client.cancel_job(handle).await?;
                return Ok(SupervisorOutcome::TimedOut);
            }

            match self.client.poll(handle).await? {
                JobStatus::Running => {}
                JobStatus::Succeeded { rows_affected } => {
                    info!(query_id = %handle.query_id, rows_affected, keep_alives_sent, "async job succeeded");
                    return Ok(SupervisorOutcome::Succeeded { rows_affected });
                }
                JobStatus::Failed(message) => {
                    return Ok(SupervisorOutcome::Failed(message));
                }
            }

            if last_keep_alive.elapsed() >= self.settings.keep_alive_interval {
                self.client.keep_alive().await?;
                last_keep_alive = Instant::now();
                keep_alives_sent += 1;
            }

            let remaining_to_ceiling = self.settings.wall_clock_ceiling.saturating_sub(elapsed);
            let sleep_for = self.settings.poll_interval.min(remaining_to_ceiling);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_spec() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.keep_alive_interval, Duration::from_secs(240));
        assert_eq!(settings.wall_clock_ceiling, Duration::from_secs(7200));
    }
}
