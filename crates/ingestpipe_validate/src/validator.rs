//! Post-Load Validator (spec.md section 4.9).
//!
//! Issues one aggregation query per file (per-day row counts over the
//! file's expected date range), then performs the date-coverage and
//! anomaly-severity post-processing described in spec.md entirely in Rust
//! — see [`crate::stats`] for the pure math this builds on.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ingestpipe_db::{DbError, Identifier, WarehouseClient};
use ingestpipe_protocol::{AnomalousDate, FailureReason, GapSegment, Severity, ValidationResult};
use sqlx::Row;
use thiserror::Error;

use crate::stats::{classify_severity, compute_stats, percent_of_avg};

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error(transparent)]
    Db(#[from] DbError),
}

pub struct ValidationRequest {
    pub table: Identifier,
    pub date_column: Identifier,
    pub requested_range: (NaiveDate, NaiveDate),
}

/// Runs the aggregation query and post-processes it into a
/// [`ValidationResult`]. `valid` is `failure_reasons.is_empty()`, per
/// spec.md's stated equivalence.
pub async fn validate(
    client: &WarehouseClient,
    request: &ValidationRequest,
) -> Result<ValidationResult, ValidatorError> {
    let daily_counts = fetch_daily_counts(client, request).await?;
    Ok(build_result(request.requested_range, &daily_counts))
}

async fn fetch_daily_counts(
    client: &WarehouseClient,
    request: &ValidationRequest,
) -> Result<BTreeMap<NaiveDate, u64>, ValidatorError> {
    let (start, end) = request.requested_range;
    let sql = format!(
        "SELECT {date_col} AS d, COUNT(*) AS n FROM \"{table}\" \
         WHERE {date_col} BETWEEN '{start}' AND '{end}' GROUP BY {date_col} ORDER BY {date_col}",
        date_col = request.date_column.as_str(),
        table = request.table.as_str(),
        start = start.format("%Y-%m-%d"),
        end = end.format("%Y-%m-%d"),
    );

    let rows = client.query(&sql).await.map_err(ValidatorError::Db)?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let date: NaiveDate = row.try_get("d").map_err(DbError::from)?;
        let count: i64 = row.try_get("n").map_err(DbError::from)?;
        counts.insert(date, count.max(0) as u64);
    }
    Ok(counts)
}

/// Separated from [`fetch_daily_counts`] so the date-coverage/anomaly logic
/// can be unit-tested without a warehouse connection.
pub fn build_result(
    requested_range: (NaiveDate, NaiveDate),
    daily_counts: &BTreeMap<NaiveDate, u64>,
) -> ValidationResult {
    let (start, end) = requested_range;
    let total_rows: u64 = daily_counts.values().sum();
    let observed_range = match (daily_counts.keys().next(), daily_counts.keys().next_back()) {
        (Some(&first), Some(&last)) => Some((first, last)),
        _ => None,
    };

    let expected_dates = all_dates(start, end);
    let missing_dates: Vec<NaiveDate> = expected_dates
        .iter()
        .filter(|d| !daily_counts.contains_key(d))
        .copied()
        .collect();
    let gaps = gap_segments(&missing_dates);

    let counts: Vec<u64> = daily_counts.values().copied().collect();
    let stats = compute_stats(&counts);

    let mut anomalous_dates: Vec<AnomalousDate> = daily_counts
        .iter()
        .filter_map(|(&date, &count)| {
            let severity = classify_severity(count, &stats);
            if severity == Severity::Normal {
                return None;
            }
            Some(AnomalousDate {
                date,
                count,
                severity,
                percent_of_avg: percent_of_avg(count, stats.mean),
                expected_range: (stats.mean * 0.9, stats.mean * 1.1),
            })
        })
        .collect();
    // Tie-break within a severity by ascending percent-of-avg (spec.md 4.9).
    anomalous_dates.sort_by(|a, b| {
        severity_rank(a.severity)
            .cmp(&severity_rank(b.severity))
            .then(a.percent_of_avg.partial_cmp(&b.percent_of_avg).unwrap())
    });

    let severely_low = anomalous_dates
        .iter()
        .filter(|d| d.severity == Severity::SeverelyLow)
        .count();
    let low = anomalous_dates
        .iter()
        .filter(|d| d.severity == Severity::Low)
        .count();
    let outliers = anomalous_dates
        .iter()
        .filter(|d| matches!(d.severity, Severity::OutlierLow | Severity::OutlierHigh))
        .count();

    // Priority order from spec.md 4.9: missing-date-count, gap-count,
    // severely-low-count, low-count, outlier-count.
    let mut failure_reasons = Vec::new();
    if !missing_dates.is_empty() {
        failure_reasons.push(FailureReason::MissingDates(missing_dates.len()));
    }
    if !gaps.is_empty() {
        failure_reasons.push(FailureReason::Gaps(gaps.len()));
    }
    if severely_low > 0 {
        failure_reasons.push(FailureReason::SeverelyLow(severely_low));
    }
    if low > 0 {
        failure_reasons.push(FailureReason::Low(low));
    }
    if outliers > 0 {
        failure_reasons.push(FailureReason::Outliers(outliers));
    }

    ValidationResult {
        valid: failure_reasons.is_empty(),
        failure_reasons,
        requested_range,
        observed_range,
        total_rows,
        unique_dates: daily_counts.len(),
        expected_dates: expected_dates.len(),
        missing_dates,
        gaps,
        stats,
        anomalous_dates,
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::SeverelyLow => 0,
        Severity::OutlierLow => 1,
        Severity::Low => 2,
        Severity::OutlierHigh => 3,
        Severity::Normal => 4,
    }
}

fn all_dates(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current);
        current += chrono::Duration::days(1);
    }
    dates
}

/// Groups a sorted list of missing dates into contiguous runs.
fn gap_segments(missing: &[NaiveDate]) -> Vec<GapSegment> {
    let mut gaps = Vec::new();
    let mut iter = missing.iter().peekable();
    while let Some(&&from) = iter.peek() {
        let mut to = from;
        iter.next();
        while let Some(&&next) = iter.peek() {
            if next == to + chrono::Duration::days(1) {
                to = next;
                iter.next();
            } else {
                break;
            }
        }
        let days = (to - from).num_days() + 1;
        gaps.push(GapSegment { from, to, days });
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn complete_coverage_is_valid() {
        let mut counts = BTreeMap::new();
        for day in 1..=31 {
            counts.insert(date(2024, 1, day), 1000);
        }
        let result = build_result((date(2024, 1, 1), date(2024, 1, 31)), &counts);
        assert!(result.valid);
        assert!(result.failure_reasons.is_empty());
        assert_eq!(result.total_rows, 31000);
        assert_eq!(result.unique_dates, 31);
    }

    #[test]
    fn missing_dates_form_contiguous_gaps() {
        let mut counts = BTreeMap::new();
        counts.insert(date(2024, 1, 1), 100);
        counts.insert(date(2024, 1, 5), 100);
        let result = build_result((date(2024, 1, 1), date(2024, 1, 5)), &counts);
        assert_eq!(result.missing_dates.len(), 3);
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.gaps[0], GapSegment { from: date(2024, 1, 2), to: date(2024, 1, 4), days: 3 });
        assert!(!result.valid);
    }

    #[test]
    fn severely_low_day_is_flagged_and_invalidates() {
        let mut counts = BTreeMap::new();
        for day in 1..=31 {
            counts.insert(date(2024, 1, day), if day == 15 { 12 } else { 1000 });
        }
        let result = build_result((date(2024, 1, 1), date(2024, 1, 31)), &counts);
        assert!(!result.valid);
        assert_eq!(result.anomalous_dates.len(), 1);
        assert_eq!(result.anomalous_dates[0].date, date(2024, 1, 15));
        assert_eq!(result.anomalous_dates[0].severity, Severity::SeverelyLow);
    }
}
