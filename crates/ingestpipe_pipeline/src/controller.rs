//! Pipeline Controller (spec.md section 4.7): runs one file through
//! analyze -> QC-gate -> compress -> stage-upload -> load -> post-validate
//! -> cleanup, emitting a phase transition event at every boundary.
//!
//! Each phase's duration is recorded onto the returned [`LoadResult`]
//! regardless of outcome. Only transport-classified errors in the upload
//! and load phases are retried, and that retry lives inside
//! [`ingestpipe_db::WarehouseClient::exec`] — this controller just calls it
//! and classifies whatever comes back.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use ingestpipe_db::{AsyncJobSupervisor, Identifier, StageManager, SupervisorOutcome, SupervisorSettings, WarehouseClient};
use ingestpipe_protocol::{
    CancellationToken, ErrorKind, FileAnalysis, IngestError, LoadResult, LoadStatus, Phase,
    ProgressEvent, ResolvedFile, Stream, ValidationResult,
};
use ingestpipe_validate::{validate, ValidationRequest};
use ingestpipe_worker::{analyze_file, compress_file, AnalyzeOptions, CompressOptions};

use crate::progress::ProgressHandle;

const DEFAULT_ASYNC_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const DEFAULT_COMPRESSION_LEVEL: u32 = 1;
const DUPLICATE_KEY_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub async_threshold_bytes: u64,
    pub compression_level: u32,
    pub supervisor: SupervisorSettings,
    pub scratch_dir: Option<PathBuf>,
    /// Mirrors `validation.gate_success` (SPEC_FULL.md section A.3 /
    /// Open Question in spec.md section 9): when true, a
    /// `ValidationFailed` verdict downgrades the result to `Failed`
    /// instead of `Succeeded-With-Warnings`.
    pub validation_gate_success: bool,
    pub skip_qc: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            async_threshold_bytes: DEFAULT_ASYNC_THRESHOLD_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            supervisor: SupervisorSettings::default(),
            scratch_dir: None,
            validation_gate_success: false,
            skip_qc: false,
        }
    }
}

pub struct PipelineController<'a> {
    client: &'a WarehouseClient,
    stage: &'a StageManager<'a>,
    cancel: CancellationToken,
    progress: ProgressHandle,
    settings: PipelineSettings,
}

impl<'a> PipelineController<'a> {
    pub fn new(
        client: &'a WarehouseClient,
        stage: &'a StageManager<'a>,
        cancel: CancellationToken,
        progress: ProgressHandle,
        settings: PipelineSettings,
    ) -> Self {
        Self { client, stage, cancel, progress, settings }
    }

    pub async fn run(&self, resolved: &ResolvedFile) -> LoadResult {
        let file = resolved.display_name();
        let mut phase_durations = Vec::new();

        macro_rules! phase_failed {
            ($phase:expr, $kind:expr, $message:expr) => {{
                self.progress.send(ProgressEvent::FileDone { file: file.clone(), status: LoadStatus::Failed });
                return LoadResult {
                    file: resolved.path.clone(),
                    status: LoadStatus::Failed,
                    rows_loaded: 0,
                    bytes_sent: 0,
                    phase_durations,
                    error: Some(($kind, $message)),
                    validation: None,
                };
            }};
        }

        if self.cancel.is_cancelled() {
            phase_failed!(Phase::Analyze, ErrorKind::Cancelled, "cancelled before analyze".to_string());
        }

        // --- Analyze ---
        let (analysis, duration) = match self.enter_phase(&file, Phase::Analyze, |on_bytes| {
            self.analyze(resolved, on_bytes)
        }) {
            Ok(pair) => pair,
            Err(err) => phase_failed!(Phase::Analyze, err.kind(), err.to_string()),
        };
        phase_durations.push((Phase::Analyze, duration));
        self.progress.send(ProgressEvent::PhaseDone { file: file.clone(), phase: Phase::Analyze, duration });

        // --- QC-gate ---
        let gate_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::QcGate });
        if let Err(reason) = qc_gate(resolved, &analysis) {
            phase_durations.push((Phase::QcGate, gate_started.elapsed()));
            phase_failed!(Phase::QcGate, ErrorKind::QualityCheckFailed, reason);
        }
        phase_durations.push((Phase::QcGate, gate_started.elapsed()));
        self.progress.send(ProgressEvent::PhaseDone {
            file: file.clone(),
            phase: Phase::QcGate,
            duration: gate_started.elapsed(),
        });

        if analysis.row_count == 0 {
            self.progress.send(ProgressEvent::FileDone { file: file.clone(), status: LoadStatus::Skipped });
            return LoadResult {
                file: resolved.path.clone(),
                status: LoadStatus::Skipped,
                rows_loaded: 0,
                bytes_sent: 0,
                phase_durations,
                error: None,
                validation: None,
            };
        }

        // --- Compress ---
        let compress_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::Compress });
        let compressed_path = match self.compress(resolved, &file) {
            Ok(path) => path,
            Err(err) => {
                phase_durations.push((Phase::Compress, compress_started.elapsed()));
                phase_failed!(Phase::Compress, err.kind(), err.to_string());
            }
        };
        let compress_duration = compress_started.elapsed();
        phase_durations.push((Phase::Compress, compress_duration));
        self.progress.send(ProgressEvent::PhaseDone { file: file.clone(), phase: Phase::Compress, duration: compress_duration });

        // --- Stage upload ---
        let upload_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::StageUpload });
        let staged = match self.stage.put(&[compressed_path.clone()]).await {
            Ok(artifacts) => artifacts,
            Err(err) => {
                let _ = std::fs::remove_file(&compressed_path);
                phase_durations.push((Phase::StageUpload, upload_started.elapsed()));
                phase_failed!(Phase::StageUpload, ErrorKind::TransportError, err.to_string());
            }
        };
        let upload_duration = upload_started.elapsed();
        phase_durations.push((Phase::StageUpload, upload_duration));
        self.progress.send(ProgressEvent::PhaseDone { file: file.clone(), phase: Phase::StageUpload, duration: upload_duration });
        let bytes_sent = analysis.byte_size;

        // --- Load ---
        let load_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::Load });
        let rows_loaded = match self.load(resolved, &analysis, &staged[0].stage_path).await {
            Ok(rows) => rows,
            Err(err) => {
                self.stage.purge(&staged).await;
                let _ = std::fs::remove_file(&compressed_path);
                phase_durations.push((Phase::Load, load_started.elapsed()));
                phase_failed!(Phase::Load, err.kind(), err.to_string());
            }
        };
        let load_duration = load_started.elapsed();
        phase_durations.push((Phase::Load, load_duration));
        self.progress.send(ProgressEvent::PhaseDone { file: file.clone(), phase: Phase::Load, duration: load_duration });

        // --- Post-validate ---
        let validate_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::PostValidate });
        let validation = self.post_validate(resolved).await;
        let validate_duration = validate_started.elapsed();
        phase_durations.push((Phase::PostValidate, validate_duration));
        self.progress.send(ProgressEvent::PhaseDone {
            file: file.clone(),
            phase: Phase::PostValidate,
            duration: validate_duration,
        });

        // --- Cleanup ---
        let cleanup_started = Instant::now();
        self.progress.send(ProgressEvent::PhaseEntered { file: file.clone(), phase: Phase::Cleanup });
        self.stage.purge(&staged).await;
        let _ = std::fs::remove_file(&compressed_path);
        phase_durations.push((Phase::Cleanup, cleanup_started.elapsed()));
        self.progress.send(ProgressEvent::PhaseDone {
            file: file.clone(),
            phase: Phase::Cleanup,
            duration: cleanup_started.elapsed(),
        });

        let status = match &validation {
            Some(v) if !v.valid && self.settings.validation_gate_success => LoadStatus::Failed,
            Some(v) if !v.valid => LoadStatus::SucceededWithWarnings,
            _ => LoadStatus::Success,
        };
        self.progress.send(ProgressEvent::FileDone { file: file.clone(), status });

        LoadResult {
            file: resolved.path.clone(),
            status,
            rows_loaded,
            bytes_sent,
            phase_durations,
            error: if status == LoadStatus::Failed {
                Some((ErrorKind::ValidationFailed, "post-load validation failed".to_string()))
            } else {
                None
            },
            validation,
        }
    }

    fn enter_phase<T>(
        &self,
        file: &str,
        phase: Phase,
        action: impl FnOnce(&mut dyn FnMut(u64)) -> Result<T, IngestError>,
    ) -> Result<(T, Duration), IngestError> {
        self.progress.send(ProgressEvent::PhaseEntered { file: file.to_string(), phase });
        let started = Instant::now();
        let progress = self.progress.clone();
        let file_owned = file.to_string();
        let mut on_bytes = move |n: u64| {
            progress.send(ProgressEvent::BytesAdvanced { file: file_owned.clone(), stream: Stream::Read, bytes: n });
        };
        let value = action(&mut on_bytes)?;
        Ok((value, started.elapsed()))
    }

    fn analyze(
        &self,
        resolved: &ResolvedFile,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<FileAnalysis, IngestError> {
        let date_column_index = column_index(resolved, &resolved.spec.date_column)
            .ok_or_else(|| IngestError::ConfigurationError(format!(
                "date column '{}' not found in expected_columns",
                resolved.spec.date_column
            )))?;
        let duplicate_key_indices: Option<Vec<usize>> = resolved.spec.duplicate_key_columns.as_ref().map(|cols| {
            cols.iter().filter_map(|c| column_index(resolved, c)).collect()
        });

        let options = AnalyzeOptions {
            format: resolved.format,
            delimiter: resolved.delimiter,
            has_header: resolved.has_header,
            date_column_index,
            duplicate_key_indices: duplicate_key_indices.as_deref(),
            duplicate_cap: DUPLICATE_KEY_THRESHOLD as usize,
            skip_qc: self.settings.skip_qc,
        };

        analyze_file(&resolved.path, &options, on_bytes).map_err(|err| match err {
            ingestpipe_worker::AnalyzerError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound => {
                IngestError::InputNotFound(resolved.path.display().to_string())
            }
            other => IngestError::QualityCheckFailed { reason: other.to_string() },
        })
    }

    fn compress(&self, resolved: &ResolvedFile, file: &str) -> Result<PathBuf, IngestError> {
        let options = CompressOptions {
            level: self.settings.compression_level,
            output_dir: self.settings.scratch_dir.clone(),
            ..Default::default()
        };
        let progress = self.progress.clone();
        let file_owned = file.to_string();
        compress_file(&resolved.path, &options, move |n| {
            progress.send(ProgressEvent::BytesAdvanced { file: file_owned.clone(), stream: Stream::Read, bytes: n });
        })
        .map_err(|err| IngestError::TransportError(err.to_string()))
    }

    async fn load(
        &self,
        resolved: &ResolvedFile,
        analysis: &FileAnalysis,
        stage_path: &str,
    ) -> Result<u64, IngestError> {
        let table = Identifier::new(resolved.spec.table_name.as_str())
            .map_err(|err| IngestError::ConfigurationError(err.to_string()))?;
        let sql = build_copy_sql(&table, resolved, stage_path);

        if analysis.byte_size > self.settings.async_threshold_bytes {
            let handle = self
                .client
                .exec_async(sql)
                .await
                .map_err(|err| db_error_to_ingest(err, resolved, analysis))?;
            let supervisor = AsyncJobSupervisor::new(self.client, self.settings.supervisor);
            match supervisor
                .supervise(&handle, &self.cancel)
                .await
                .map_err(|err| db_error_to_ingest(err, resolved, analysis))?
            {
                SupervisorOutcome::Succeeded { rows_affected } => Ok(rows_affected),
                SupervisorOutcome::Failed(message) => Err(IngestError::WarehouseError {
                    code: "COPY".to_string(),
                    message: diagnose_copy_error(&message, resolved, analysis),
                }),
                SupervisorOutcome::TimedOut => Err(IngestError::AsyncTimeout),
                SupervisorOutcome::Cancelled => Err(IngestError::Cancelled),
            }
        } else {
            self.client.exec(&sql).await.map_err(|err| db_error_to_ingest(err, resolved, analysis))
        }
    }

    async fn post_validate(&self, resolved: &ResolvedFile) -> Option<ValidationResult> {
        let table = Identifier::new(resolved.spec.table_name.as_str()).ok()?;
        let date_column = Identifier::new(resolved.spec.date_column.as_str()).ok()?;
        let request = ValidationRequest { table, date_column, requested_range: resolved.expected_range };
        validate(self.client, &request).await.ok()
    }
}

/// Returns `Err(reason)` on gate failure; does not itself classify the
/// kind (the caller always uses `QualityCheckFailed`).
fn qc_gate(resolved: &ResolvedFile, analysis: &FileAnalysis) -> Result<(), String> {
    if analysis.byte_size == 0 {
        return Err("file is empty".to_string());
    }
    // Header-only files (and any other file with zero data rows) are
    // `Skipped` by the caller, not gated here: the analyzer resets
    // `column_count_min` to 0 when it never saw a data row, which would
    // otherwise collide with the column-count check below and misreport
    // a skip as a quality failure.
    if analysis.row_count == 0 {
        return Ok(());
    }
    if analysis.skipped_qc {
        return Ok(());
    }

    let expected_columns = resolved.spec.expected_columns.len();
    if !analysis.column_count_consistent() {
        return Err(format!(
            "inconsistent column count: min={} max={}",
            analysis.column_count_min, analysis.column_count_max
        ));
    }
    if analysis.column_count_min != expected_columns {
        return Err(format!(
            "column count {} does not match expected {}",
            analysis.column_count_min, expected_columns
        ));
    }

    let (expected_start, expected_end) = resolved.expected_range;
    if let (Some(min), Some(max)) = (analysis.date_min, analysis.date_max) {
        if min < expected_start || max > expected_end {
            return Err(format!(
                "observed date range {}..{} outside expected range {}..{}",
                min, max, expected_start, expected_end
            ));
        }
    }

    if analysis.date_parse_error_rate() > 0.01 {
        return Err(format!(
            "date column unparseable on {:.2}% of rows (threshold 1%)",
            analysis.date_parse_error_rate() * 100.0
        ));
    }

    if let Some(digest) = &analysis.duplicate_digest {
        if digest.cap_exceeded || digest.duplicate_keys_found > DUPLICATE_KEY_THRESHOLD {
            return Err(format!(
                "duplicate-key set exceeds threshold ({} found, cap {})",
                digest.duplicate_keys_found, digest.cap
            ));
        }
    }

    Ok(())
}

fn column_index(resolved: &ResolvedFile, name: &str) -> Option<usize> {
    resolved.spec.expected_columns.iter().position(|c| c == name)
}

fn db_error_to_ingest(
    err: ingestpipe_db::DbError,
    resolved: &ResolvedFile,
    analysis: &FileAnalysis,
) -> IngestError {
    if err.is_retriable() {
        IngestError::TransportError(err.to_string())
    } else {
        let message = diagnose_copy_error(&err.to_string(), resolved, analysis);
        IngestError::WarehouseError { code: "DB".to_string(), message }
    }
}

/// Enriches a raw COPY/load error with a one-line diagnosis naming the
/// offending column when the message carries a column-count or type
/// mismatch signature (SPEC_FULL.md section B.3), grounded on
/// `diagnose_column_mismatch.py`'s column-by-column scan (match the
/// erroring value/column against the file's expected columns) and
/// `diagnose_copy_error.py`'s triage of Snowflake's column-count/type
/// error codes. Falls back to the raw message untouched when neither
/// signature is present — the server message is still the primary text,
/// this only appends context we can derive locally.
fn diagnose_copy_error(raw: &str, resolved: &ResolvedFile, analysis: &FileAnalysis) -> String {
    let lower = raw.to_ascii_lowercase();
    let expected = resolved.spec.expected_columns.len();

    let looks_like_column_count_mismatch = lower.contains("column")
        && (lower.contains("mismatch")
            || lower.contains("extra data")
            || lower.contains("missing data")
            || lower.contains("does not match"));
    if looks_like_column_count_mismatch && analysis.column_count_max != expected {
        return format!(
            "{raw} (diagnosis: file has {actual} columns, table \"{table}\" expects {expected}; \
             every column from the mismatch point on shifts into the wrong field)",
            raw = raw,
            actual = analysis.column_count_max,
            table = resolved.spec.table_name,
            expected = expected,
        );
    }

    let looks_like_type_mismatch =
        lower.contains("invalid input syntax") || lower.contains("numeric value");
    if looks_like_type_mismatch {
        if let Some(value) = extract_quoted_tail(raw) {
            let column = column_named_in_message(resolved, raw).unwrap_or("<unknown>");
            return format!(
                "{raw} (diagnosis: column \"{column}\" rejected value \"{value}\" — \
                 check that column's position and type against table \"{table}\")",
                raw = raw,
                column = column,
                value = value,
                table = resolved.spec.table_name,
            );
        }
    }

    raw.to_string()
}

/// Extracts the innermost double-quoted substring, e.g. the offending
/// value in `invalid input syntax for type integer: "1 - GC"`.
fn extract_quoted_tail(raw: &str) -> Option<&str> {
    let close = raw.rfind('"')?;
    let open = raw[..close].rfind('"')?;
    Some(&raw[open + 1..close])
}

/// Warehouses typically name the offending column verbatim in COPY parse
/// errors; match against the file's expected columns rather than trying to
/// parse the server's error grammar.
fn column_named_in_message<'a>(resolved: &'a ResolvedFile, raw: &str) -> Option<&'a str> {
    let lower = raw.to_ascii_lowercase();
    resolved
        .spec
        .expected_columns
        .iter()
        .find(|name| !name.is_empty() && lower.contains(name.to_ascii_lowercase().as_str()))
        .map(|s| s.as_str())
}

/// Builds the COPY statement shape from spec.md section 6, substituting
/// this file's detected delimiter/quote/header into the `FILE_FORMAT`
/// clause.
fn build_copy_sql(table: &Identifier, resolved: &ResolvedFile, stage_path: &str) -> String {
    let quote = match resolved.quote {
        Some(c) => format!("'{}'", c),
        None => "NONE".to_string(),
    };
    format!(
        "COPY INTO \"{table}\" FROM @{stage} \
         FILE_FORMAT = (TYPE = CSV, FIELD_DELIMITER = '{delim}', SKIP_HEADER = {skip_header}, \
         FIELD_OPTIONALLY_ENCLOSED_BY = {quote}, ESCAPE_UNENCLOSED_FIELD = NONE, \
         ERROR_ON_COLUMN_COUNT_MISMATCH = FALSE, REPLACE_INVALID_CHARACTERS = TRUE, \
         DATE_FORMAT = AUTO, TIMESTAMP_FORMAT = AUTO, NULL_IF = ('','NULL','null','\\N')) \
         ON_ERROR = ABORT_STATEMENT PURGE = TRUE SIZE_LIMIT = 5368709120",
        table = table.as_str(),
        stage = stage_path,
        delim = resolved.delimiter,
        skip_header = if resolved.has_header { 1 } else { 0 },
        quote = quote,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingestpipe_protocol::{DataFormat, FileSpec};
    use std::path::PathBuf;

    fn sample_resolved() -> ResolvedFile {
        ResolvedFile {
            path: PathBuf::from("/tmp/t_2024-01.tsv"),
            spec: FileSpec {
                file_pattern: "t_{month}.tsv".to_string(),
                table_name: "orders".to_string(),
                date_column: "d".to_string(),
                expected_columns: vec!["d".to_string(), "a".to_string(), "b".to_string()],
                duplicate_key_columns: None,
                delimiter: None,
                file_format: None,
                quote_char: None,
            },
            format: DataFormat::Tsv,
            delimiter: '\t',
            quote: None,
            has_header: true,
            expected_range: (
                chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ),
        }
    }

    #[test]
    fn copy_sql_embeds_detected_delimiter_and_skip_header() {
        let resolved = sample_resolved();
        let table = Identifier::new("orders").unwrap();
        let sql = build_copy_sql(&table, &resolved, "ns/t_2024-01.tsv.gz");
        assert!(sql.contains("FIELD_DELIMITER = '\t'"));
        assert!(sql.contains("SKIP_HEADER = 1"));
        assert!(sql.contains("FIELD_OPTIONALLY_ENCLOSED_BY = NONE"));
        assert!(sql.contains("ON_ERROR = ABORT_STATEMENT"));
    }

    #[test]
    fn column_index_resolves_date_column() {
        let resolved = sample_resolved();
        assert_eq!(column_index(&resolved, "d"), Some(0));
        assert_eq!(column_index(&resolved, "missing"), None);
    }

    fn sample_analysis(row_count: u64, column_count: usize) -> FileAnalysis {
        FileAnalysis {
            row_count,
            byte_size: 128,
            column_count_min: column_count,
            column_count_max: column_count,
            date_min: None,
            date_max: None,
            date_parse_errors: 0,
            duplicate_digest: None,
            skipped_qc: false,
        }
    }

    #[test]
    fn qc_gate_rejects_zero_byte_file_as_empty() {
        let resolved = sample_resolved();
        let mut analysis = sample_analysis(0, 3);
        analysis.byte_size = 0;
        assert_eq!(qc_gate(&resolved, &analysis), Err("file is empty".to_string()));
    }

    #[test]
    fn qc_gate_passes_header_only_file_despite_column_count_reset() {
        // Header-only files have byte_size > 0 but row_count == 0; the
        // analyzer resets column_count_min/_max to 0 in that case, which
        // must not trip the column-count check below.
        let resolved = sample_resolved();
        let analysis = sample_analysis(0, 0);
        assert_eq!(qc_gate(&resolved, &analysis), Ok(()));
    }

    #[test]
    fn qc_gate_still_rejects_column_count_mismatch_when_rows_present() {
        let resolved = sample_resolved();
        let analysis = sample_analysis(10, 2);
        assert!(qc_gate(&resolved, &analysis).is_err());
    }

    #[test]
    fn diagnose_copy_error_leaves_unrecognized_messages_untouched() {
        let resolved = sample_resolved();
        let analysis = sample_analysis(10, 3);
        let raw = "connection reset by peer";
        assert_eq!(diagnose_copy_error(raw, &resolved, &analysis), raw);
    }

    #[test]
    fn diagnose_copy_error_names_expected_vs_actual_column_count() {
        let resolved = sample_resolved();
        let analysis = sample_analysis(10, 5);
        let raw = "number of columns in file does not match table definition";
        let diagnosis = diagnose_copy_error(raw, &resolved, &analysis);
        assert!(diagnosis.contains("file has 5 columns"));
        assert!(diagnosis.contains("expects 3"));
        assert!(diagnosis.starts_with(raw));
    }

    #[test]
    fn diagnose_copy_error_names_offending_column_on_type_mismatch() {
        let resolved = sample_resolved();
        let analysis = sample_analysis(10, 3);
        let raw = r#"invalid input syntax for type integer: "1 - GC""#;
        let diagnosis = diagnose_copy_error(raw, &resolved, &analysis);
        assert!(diagnosis.contains("rejected value \"1 - GC\""));
        assert!(diagnosis.starts_with(raw));
    }
}
