//! Streams a resolved file once to produce row/column/date statistics and
//! an optional duplicate-key digest (spec.md section 4.2).
//!
//! The analyzer itself only fails when the file cannot be read at all.
//! Column-count inconsistency and excessive date-parse-error rates are
//! carried in the returned [`FileAnalysis`] and turned into a
//! `QualityCheckFailed` by the Pipeline Controller's QC-gate phase — the
//! analyzer's job is to observe, not to judge.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::NaiveDate;
use ingestpipe_protocol::{DataFormat, DuplicateDigest, FileAnalysis};
use thiserror::Error;

const DEFAULT_DUPLICATE_CAP: usize = 1000;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse row {row}: {source}")]
    Csv {
        row: u64,
        #[source]
        source: csv::Error,
    },
}

/// What to look for while streaming; column indices are resolved by the
/// caller from the header row or from `expected_columns` ordinal position.
pub struct AnalyzeOptions<'a> {
    pub format: DataFormat,
    pub delimiter: char,
    pub has_header: bool,
    pub date_column_index: usize,
    pub duplicate_key_indices: Option<&'a [usize]>,
    pub duplicate_cap: usize,
    /// When true, only row count and byte size are gathered (spec.md 4.2,
    /// "Skipping QC is permitted by configuration").
    pub skip_qc: bool,
}

impl<'a> Default for AnalyzeOptions<'a> {
    fn default() -> Self {
        Self {
            format: DataFormat::Csv,
            delimiter: ',',
            has_header: true,
            date_column_index: 0,
            duplicate_key_indices: None,
            duplicate_cap: DEFAULT_DUPLICATE_CAP,
            skip_qc: false,
        }
    }
}

pub fn analyze_file(
    path: &Path,
    options: &AnalyzeOptions<'_>,
    mut on_bytes_read: impl FnMut(u64),
) -> Result<FileAnalysis, AnalyzerError> {
    let byte_size = std::fs::metadata(path)?.len();
    let reader = open_reader(path)?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter as u8)
        .has_headers(options.has_header)
        .flexible(true)
        .from_reader(CountingReader::new(reader, &mut on_bytes_read));

    let mut row_count: u64 = 0;
    let mut column_count_min = usize::MAX;
    let mut column_count_max = 0usize;
    let mut date_min: Option<NaiveDate> = None;
    let mut date_max: Option<NaiveDate> = None;
    let mut date_parse_errors: u64 = 0;

    let mut key_counts: HashMap<u64, u32> = HashMap::new();
    let mut exemplars: Vec<Vec<String>> = Vec::new();
    let mut cap_exceeded = false;

    let mut record = csv::StringRecord::new();
    loop {
        let read = csv_reader
            .read_record(&mut record)
            .map_err(|source| AnalyzerError::Csv { row: row_count, source })?;
        if !read {
            break;
        }
        row_count += 1;

        if options.skip_qc {
            continue;
        }

        let field_count = record.len();
        column_count_min = column_count_min.min(field_count);
        column_count_max = column_count_max.max(field_count);

        if let Some(raw) = record.get(options.date_column_index) {
            match parse_date(raw) {
                Some(date) => {
                    date_min = Some(date_min.map_or(date, |d| d.min(date)));
                    date_max = Some(date_max.map_or(date, |d| d.max(date)));
                }
                None => date_parse_errors += 1,
            }
        } else {
            date_parse_errors += 1;
        }

        if let Some(indices) = options.duplicate_key_indices {
            let key_values: Vec<String> = indices
                .iter()
                .map(|&i| record.get(i).unwrap_or("").to_string())
                .collect();
            let hash = hash_key(&key_values);
            let count = key_counts.entry(hash).or_insert(0);
            *count += 1;
            if *count == 2 && !cap_exceeded {
                if exemplars.len() < options.duplicate_cap {
                    exemplars.push(key_values);
                } else {
                    cap_exceeded = true;
                }
            }
        }
    }

    if column_count_min == usize::MAX {
        column_count_min = 0;
    }

    let duplicate_digest = options.duplicate_key_indices.map(|_| {
        let duplicate_keys_found = key_counts.values().filter(|&&c| c >= 2).count() as u64;
        DuplicateDigest {
            cap: options.duplicate_cap,
            distinct_keys_seen: key_counts.len() as u64,
            duplicate_keys_found,
            exemplars,
            cap_exceeded,
        }
    });

    Ok(FileAnalysis {
        row_count,
        byte_size,
        column_count_min,
        column_count_max,
        date_min,
        date_max,
        date_parse_errors,
        duplicate_digest,
        skipped_qc: options.skip_qc,
    })
}

fn hash_key(values: &[String]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for value in values {
        hasher.update(value.as_bytes());
        hasher.update(&[0u8]);
    }
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u64::from_le_bytes(bytes[0..8].try_into().unwrap())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y%m%d"))
        .ok()
}

fn open_reader(path: &Path) -> std::io::Result<Box<dyn Read>> {
    let file = File::open(path)?;
    let is_gz = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gz {
        Ok(Box::new(flate2::read::MultiGzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Wraps a reader to report bytes consumed, used to drive `BytesAdvanced`
/// progress events without re-reading the file.
struct CountingReader<'a, R> {
    inner: R,
    on_bytes: &'a mut dyn FnMut(u64),
}

impl<'a, R> CountingReader<'a, R> {
    fn new(inner: R, on_bytes: &'a mut dyn FnMut(u64)) -> Self {
        Self { inner, on_bytes }
    }
}

impl<'a, R: Read> Read for CountingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.on_bytes)(n as u64);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn counts_rows_and_date_range() {
        let file = write_temp("d,a,b\n2024-01-01,1,2\n2024-01-03,3,4\n2024-01-02,5,6\n");
        let options = AnalyzeOptions {
            date_column_index: 0,
            ..Default::default()
        };
        let analysis = analyze_file(file.path(), &options, |_| {}).unwrap();
        assert_eq!(analysis.row_count, 3);
        assert_eq!(analysis.date_min, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(analysis.date_max, NaiveDate::from_ymd_opt(2024, 1, 3));
        assert!(analysis.column_count_consistent());
    }

    #[test]
    fn flags_inconsistent_column_count_without_erroring() {
        let file = write_temp("d,a,b\n2024-01-01,1,2\n2024-01-02,3\n");
        let options = AnalyzeOptions {
            date_column_index: 0,
            ..Default::default()
        };
        let analysis = analyze_file(file.path(), &options, |_| {}).unwrap();
        assert!(!analysis.column_count_consistent());
    }

    #[test]
    fn skip_qc_only_gathers_row_count() {
        let file = write_temp("d,a,b\nnot-a-date,1,2\n");
        let options = AnalyzeOptions {
            date_column_index: 0,
            skip_qc: true,
            ..Default::default()
        };
        let analysis = analyze_file(file.path(), &options, |_| {}).unwrap();
        assert_eq!(analysis.row_count, 1);
        assert_eq!(analysis.date_parse_errors, 0);
        assert!(analysis.skipped_qc);
    }

    #[test]
    fn duplicate_keys_are_captured_with_exemplars() {
        let file = write_temp("d,k,v\n2024-01-01,A,1\n2024-01-01,A,2\n2024-01-01,B,3\n");
        let options = AnalyzeOptions {
            date_column_index: 0,
            duplicate_key_indices: Some(&[0, 1]),
            ..Default::default()
        };
        let analysis = analyze_file(file.path(), &options, |_| {}).unwrap();
        let digest = analysis.duplicate_digest.unwrap();
        assert_eq!(digest.duplicate_keys_found, 1);
        assert_eq!(digest.exemplars.len(), 1);
        assert_eq!(digest.exemplars[0], vec!["2024-01-01".to_string(), "A".to_string()]);
    }

    #[test]
    fn date_parse_errors_are_counted_not_fatal() {
        let file = write_temp("d,a\n2024-01-01,1\nnot-a-date,2\n20240103,3\n");
        let options = AnalyzeOptions {
            date_column_index: 0,
            ..Default::default()
        };
        let analysis = analyze_file(file.path(), &options, |_| {}).unwrap();
        assert_eq!(analysis.date_parse_errors, 1);
        assert_eq!(analysis.row_count, 3);
    }
}
