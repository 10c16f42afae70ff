//! Pattern resolution (spec.md section 6): turns one [`FileSpec`] plus a
//! target month into a concrete [`ResolvedFile`] — substituting the
//! pattern's placeholder, finding the file on disk under `base_path`, and
//! running format detection once up front so every later phase works from
//! an immutable, fully-resolved description.

use std::path::Path;

use chrono::{Datelike, NaiveDate};
use ingestpipe_protocol::{FileSpec, ResolvedFile};
use ingestpipe_worker::detect_format;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("file spec pattern '{0}' contains neither {{month}} nor {{date_range}}")]
    NoPlaceholder(String),
    #[error("no file under {base} matches pattern '{pattern}'")]
    NotFound { base: String, pattern: String },
    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),
}

/// Resolves one [`FileSpec`] against `month` (the first day of the target
/// month) under `base_path`.
///
/// `{month}` expands to `YYYY-MM`; `{date_range}` expands to
/// `YYYYMMDD-YYYYMMDD` spanning the whole month — a pattern that names a
/// partial range is still treated as a full-month span (spec.md section 9,
/// "source silently treats as full month").
pub fn resolve_file_spec(
    base_path: &Path,
    spec: &FileSpec,
    month: NaiveDate,
) -> Result<ResolvedFile, ResolveError> {
    let (first, last) = month_bounds(month);
    let expanded = expand_pattern(&spec.file_pattern, first, last)?;
    let path = base_path.join(&expanded);
    if !path.is_file() {
        return Err(ResolveError::NotFound {
            base: base_path.display().to_string(),
            pattern: expanded,
        });
    }

    let detected =
        detect_format(&path).map_err(|err| ResolveError::Io(path.display().to_string(), err))?;

    let format = spec.file_format.unwrap_or(detected.format);
    let delimiter = spec.delimiter.unwrap_or(detected.delimiter);
    let quote = spec.quote_char.or(detected.quote_char);

    Ok(ResolvedFile {
        path,
        spec: spec.clone(),
        format,
        delimiter,
        quote,
        has_header: detected.has_header,
        expected_range: (first, last),
    })
}

fn expand_pattern(pattern: &str, first: NaiveDate, last: NaiveDate) -> Result<String, ResolveError> {
    if pattern.contains("{month}") {
        Ok(pattern.replace("{month}", &first.format("%Y-%m").to_string()))
    } else if pattern.contains("{date_range}") {
        let range = format!("{}-{}", first.format("%Y%m%d"), last.format("%Y%m%d"));
        Ok(pattern.replace("{date_range}", &range))
    } else {
        Err(ResolveError::NoPlaceholder(pattern.to_string()))
    }
}

/// Inclusive `[first-of-month, last-of-month]` for whatever month `month`
/// falls in; shared with the Deletion Planner, which derives the same
/// bounds from a `--month` argument.
pub fn month_bounds(month: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = month.with_day(1).expect("day 1 always valid");
    let (next_year, next_month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1).expect("valid calendar month");
    let last = next_first.pred_opt().expect("month always has at least one day");
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pattern: &str) -> FileSpec {
        FileSpec {
            file_pattern: pattern.to_string(),
            table_name: "orders".to_string(),
            date_column: "d".to_string(),
            expected_columns: vec!["d".to_string()],
            duplicate_key_columns: None,
            delimiter: None,
            file_format: None,
            quote_char: None,
        }
    }

    #[test]
    fn month_bounds_handles_february_and_december() {
        let (_, last) = month_bounds(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(last, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let (first_dec, last_dec) = month_bounds(NaiveDate::from_ymd_opt(2023, 12, 15).unwrap());
        assert_eq!(first_dec, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(last_dec, NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn expand_pattern_substitutes_month_placeholder() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let (first, last) = month_bounds(month);
        let expanded = expand_pattern("t_{month}.tsv", first, last).unwrap();
        assert_eq!(expanded, "t_2024-01.tsv");
    }

    #[test]
    fn expand_pattern_substitutes_date_range_placeholder() {
        let month = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let (first, last) = month_bounds(month);
        let expanded = expand_pattern("t_{date_range}.csv", first, last).unwrap();
        assert_eq!(expanded, "t_20240201-20240229.csv");
    }

    #[test]
    fn resolve_file_spec_errors_when_pattern_has_no_placeholder() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = resolve_file_spec(Path::new("/tmp"), &spec("t.tsv"), month).unwrap_err();
        assert!(matches!(err, ResolveError::NoPlaceholder(_)));
    }

    #[test]
    fn resolve_file_spec_errors_when_file_missing() {
        let month = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = resolve_file_spec(Path::new("/nonexistent-base"), &spec("t_{month}.tsv"), month)
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }
}
