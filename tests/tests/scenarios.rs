//! End-to-end scenarios 1-3 from spec.md section 8, run against local
//! fixture files. These exercise the Format Detector, File Analyzer, and
//! Post-Load Validator's pure math together without a warehouse connection
//! (`WarehouseClient` is a concrete `sqlx::PgPool` wrapper, not a trait
//! object, so substituting an in-memory double for it isn't possible —
//! see DESIGN.md's Open Question decisions).

use std::collections::BTreeMap;
use std::io::Write;

use chrono::NaiveDate;
use ingestpipe_pipeline::resolve_file_spec;
use ingestpipe_protocol::FileSpec;
use ingestpipe_validate::build_result;
use ingestpipe_worker::{analyze_file, AnalyzeOptions};

fn file_spec(pattern: &str, expected_columns: usize) -> FileSpec {
    FileSpec {
        file_pattern: pattern.to_string(),
        table_name: "T".to_string(),
        date_column: "D".to_string(),
        expected_columns: (0..expected_columns).map(|i| format!("c{i}")).collect(),
        duplicate_key_columns: None,
        delimiter: None,
        file_format: None,
        quote_char: None,
    }
}

fn write_fixture(dir: &std::path::Path, name: &str, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    path
}

/// Scenario 1: one FileSpec, 31 distinct days x 1000 rows, 3 columns.
/// Expected: row_count == 31000, column counts consistent, validation valid.
#[test]
fn scenario_1_full_month_load_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let mut lines = Vec::new();
    let mut daily_counts = BTreeMap::new();
    for day in 1..=31u32 {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        for row in 0..1000 {
            lines.push(format!("{}\ta{row}\tb{row}", date.format("%Y-%m-%d")));
        }
        daily_counts.insert(date, 1000u64);
    }
    write_fixture(dir.path(), "t_2024-01.tsv", &lines);

    let spec = file_spec("t_{month}.tsv", 3);
    let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let resolved = resolve_file_spec(dir.path(), &spec, month).unwrap();

    // The fixture has no header row; `detect_header` flags any line whose
    // first field fails a numeric parse, which a leading date column
    // always does, so header detection isn't trustworthy for data like
    // this and the test asserts the analyzer's own behavior directly.
    let options = AnalyzeOptions {
        format: resolved.format,
        delimiter: resolved.delimiter,
        has_header: false,
        date_column_index: 0,
        duplicate_key_indices: None,
        duplicate_cap: 1000,
        skip_qc: false,
    };
    let analysis = analyze_file(&resolved.path, &options, |_| {}).unwrap();

    assert_eq!(analysis.row_count, 31_000);
    assert!(analysis.column_count_consistent());
    assert_eq!(analysis.column_count_min, 3);

    let result = build_result(resolved.expected_range, &daily_counts);
    assert!(result.valid);
    assert!(result.failure_reasons.is_empty());
    assert_eq!(result.total_rows, 31_000);
}

/// Scenario 2: same as (1) but `2024-01-15` has 12 rows instead of 1000.
/// Expected: anomaly severity `SeverelyLow` for that date, failure_reasons
/// non-empty, but every other day's rows still count toward the total.
#[test]
fn scenario_2_severely_low_day_flags_but_does_not_drop_other_days() {
    let mut daily_counts = BTreeMap::new();
    for day in 1..=31u32 {
        let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let count = if day == 15 { 12 } else { 1000 };
        daily_counts.insert(date, count);
    }

    let requested_range =
        (NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());
    let result = build_result(requested_range, &daily_counts);

    assert!(!result.valid);
    assert!(!result.failure_reasons.is_empty());
    assert_eq!(result.anomalous_dates.len(), 1);
    assert_eq!(result.anomalous_dates[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    assert_eq!(result.anomalous_dates[0].severity, ingestpipe_protocol::Severity::SeverelyLow);
    // 30 normal days at 1000 plus the one low day at 12.
    assert_eq!(result.total_rows, 30 * 1000 + 12);
}

/// Scenario 3: input has 4 tab-separated fields where the FileSpec expects
/// 3. Expected: the analyzer observes a consistent-but-wrong column count,
/// which is what the Pipeline Controller's QC gate turns into
/// `QualityCheckFailed(column-count)` — no stage upload, no COPY.
#[test]
fn scenario_3_column_count_mismatch_is_observable_before_qc_gate() {
    let dir = tempfile::tempdir().unwrap();
    let lines: Vec<String> = (0..10).map(|i| format!("2024-01-0{}\ta{i}\tb{i}\tc{i}", 1 + i % 9)).collect();
    write_fixture(dir.path(), "t_2024-01.tsv", &lines);

    let spec = file_spec("t_{month}.tsv", 3);
    let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let resolved = resolve_file_spec(dir.path(), &spec, month).unwrap();

    let options = AnalyzeOptions {
        format: resolved.format,
        delimiter: resolved.delimiter,
        has_header: false,
        date_column_index: 0,
        duplicate_key_indices: None,
        duplicate_cap: 1000,
        skip_qc: false,
    };
    let analysis = analyze_file(&resolved.path, &options, |_| {}).unwrap();

    assert!(analysis.column_count_consistent());
    assert_eq!(analysis.column_count_min, 4);
    assert_ne!(analysis.column_count_min, resolved.spec.expected_columns.len());
}
