//! Value objects that flow through the pipeline (spec.md section 3).

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::FileSpec;
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFormat {
    Csv,
    Tsv,
}

/// A file pattern resolved to a concrete path for one run.
///
/// Created once by pattern resolution and never mutated afterward — every
/// later phase borrows it.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub spec: FileSpec,
    pub format: DataFormat,
    pub delimiter: char,
    pub quote: Option<char>,
    pub has_header: bool,
    /// The `[start, end]` date range implied by the pattern's `{month}` or
    /// `{date_range}` placeholder.
    pub expected_range: (NaiveDate, NaiveDate),
}

impl ResolvedFile {
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Duplicate-key exemplars captured by the File Analyzer, capped at a fixed
/// count so pathological inputs can't grow this unboundedly (spec.md
/// section 9, "Large intermediate data").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateDigest {
    pub cap: usize,
    pub distinct_keys_seen: u64,
    pub duplicate_keys_found: u64,
    pub exemplars: Vec<Vec<String>>,
    pub cap_exceeded: bool,
}

/// Output of streaming a file once through the File Analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub row_count: u64,
    pub byte_size: u64,
    pub column_count_min: usize,
    pub column_count_max: usize,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
    pub date_parse_errors: u64,
    pub duplicate_digest: Option<DuplicateDigest>,
    pub skipped_qc: bool,
}

impl FileAnalysis {
    /// Column counts are only trustworthy if every sampled row agreed.
    pub fn column_count_consistent(&self) -> bool {
        self.column_count_min == self.column_count_max
    }

    pub fn date_parse_error_rate(&self) -> f64 {
        if self.row_count == 0 {
            0.0
        } else {
            self.date_parse_errors as f64 / self.row_count as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub resolved: ResolvedFile,
    pub analysis: FileAnalysis,
    pub compression_level: u32,
    pub stage_path: String,
    pub use_async: bool,
    pub expected_row_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadStatus {
    Success,
    SucceededWithWarnings,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Analyze,
    QcGate,
    Compress,
    StageUpload,
    Load,
    PostValidate,
    Cleanup,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::QcGate => "qc-gate",
            Phase::Compress => "compress",
            Phase::StageUpload => "stage-upload",
            Phase::Load => "load",
            Phase::PostValidate => "post-validate",
            Phase::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub file: PathBuf,
    pub status: LoadStatus,
    pub rows_loaded: u64,
    pub bytes_sent: u64,
    pub phase_durations: Vec<(Phase, Duration)>,
    pub error: Option<(ErrorKind, String)>,
    pub validation: Option<ValidationResult>,
}

impl LoadResult {
    pub fn total_duration(&self) -> Duration {
        self.phase_durations.iter().map(|(_, d)| *d).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    SeverelyLow,
    Low,
    OutlierLow,
    Normal,
    OutlierHigh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalousDate {
    pub date: NaiveDate,
    pub count: u64,
    pub severity: Severity,
    pub percent_of_avg: f64,
    pub expected_range: (f64, f64),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RowCountStats {
    pub mean: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapSegment {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub days: i64,
}

/// Reasons are emitted in the priority order spec.md section 4.9 specifies;
/// `valid = failure_reasons.is_empty()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FailureReason {
    MissingDates(usize),
    Gaps(usize),
    SeverelyLow(usize),
    Low(usize),
    Outliers(usize),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::MissingDates(n) => write!(f, "{} missing date(s)", n),
            FailureReason::Gaps(n) => write!(f, "{} gap segment(s)", n),
            FailureReason::SeverelyLow(n) => write!(f, "{} severely-low date(s)", n),
            FailureReason::Low(n) => write!(f, "{} low date(s)", n),
            FailureReason::Outliers(n) => write!(f, "{} outlier date(s)", n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub failure_reasons: Vec<FailureReason>,
    pub requested_range: (NaiveDate, NaiveDate),
    pub observed_range: Option<(NaiveDate, NaiveDate)>,
    pub total_rows: u64,
    pub unique_dates: usize,
    pub expected_dates: usize,
    pub missing_dates: Vec<NaiveDate>,
    pub gaps: Vec<GapSegment>,
    pub stats: RowCountStats,
    pub anomalous_dates: Vec<AnomalousDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionStatus {
    Success,
    Skipped,
    Failed,
    DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionTarget {
    pub table: String,
    pub date_column: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionResult {
    pub target: DeletionTarget,
    pub status: DeletionStatus,
    pub rows_before: u64,
    pub rows_affected: u64,
    pub deletion_percent: f64,
    pub recovery_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub execution_time: Duration,
}
