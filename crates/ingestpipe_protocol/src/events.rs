//! Progress events multiplexed by the Progress Tracker (spec.md section
//! 4.12). Producers never touch the display surface directly — they only
//! emit events.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::types::{LoadStatus, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stream {
    Read,
    Write,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    PhaseEntered {
        file: String,
        phase: Phase,
    },
    BytesAdvanced {
        file: String,
        stream: Stream,
        bytes: u64,
    },
    PhaseDone {
        file: String,
        phase: Phase,
        duration: Duration,
    },
    FileDone {
        file: String,
        status: LoadStatus,
    },
    JobDone {
        summary: JobSummary,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows_loaded_total: u64,
    pub wall_time: Duration,
}
