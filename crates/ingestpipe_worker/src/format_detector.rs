//! Delimiter and header detection for CSV/TSV inputs (spec.md section 4.1).
//!
//! Two-step strategy: trust the file extension when it is unambiguous
//! (`.csv`/`.tsv`, optionally `.gz`-suffixed), otherwise score candidate
//! delimiters against a small sample of lines and fall back to comma if
//! nothing scores well.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use ingestpipe_protocol::DataFormat;

const HEAD_BYTES: usize = 64 * 1024;
const SAMPLE_LINES: usize = 10;
const CANDIDATE_DELIMITERS: [char; 5] = [',', '\t', '|', ';', ':'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    Extension,
    ContentAnalysis,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct DetectedFormat {
    pub format: DataFormat,
    pub delimiter: char,
    pub has_header: bool,
    pub quote_char: Option<char>,
    pub confidence: f64,
    pub method: DetectionMethod,
}

/// Detect format, delimiter, header, and quote character for `path`.
///
/// Transparently gunzips `.gz`-suffixed inputs before sampling; the
/// extension check itself looks past `.gz` too, so `t_2024-01.tsv.gz`
/// resolves via the `.tsv` branch exactly like `t_2024-01.tsv` would.
pub fn detect_format(path: &Path) -> io::Result<DetectedFormat> {
    let sample = read_sample(path)?;
    let lines: Vec<&str> = sample.lines().take(SAMPLE_LINES).collect();

    if let Some((format, delimiter)) = format_from_extension(path) {
        let has_header = detect_header(lines.first().copied(), delimiter);
        let quote_char = if format == DataFormat::Csv { Some('"') } else { None };
        return Ok(DetectedFormat {
            format,
            delimiter,
            has_header,
            quote_char,
            confidence: 0.9,
            method: DetectionMethod::Extension,
        });
    }

    if let Some((delimiter, confidence)) = detect_delimiter_from_content(&lines) {
        let format = if delimiter == '\t' { DataFormat::Tsv } else { DataFormat::Csv };
        let has_header = detect_header(lines.first().copied(), delimiter);
        let quote_char = if format == DataFormat::Csv { Some('"') } else { None };
        return Ok(DetectedFormat {
            format,
            delimiter,
            has_header,
            quote_char,
            confidence,
            method: DetectionMethod::ContentAnalysis,
        });
    }

    Ok(DetectedFormat {
        format: DataFormat::Csv,
        delimiter: ',',
        has_header: false,
        quote_char: Some('"'),
        confidence: 0.3,
        method: DetectionMethod::Fallback,
    })
}

fn read_sample(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let is_gz = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);

    let mut buf = vec![0u8; HEAD_BYTES];
    let read = if is_gz {
        let mut decoder = flate2::read::MultiGzDecoder::new(BufReader::new(file));
        decoder.read(&mut buf)?
    } else {
        let mut reader = BufReader::new(file);
        reader.read(&mut buf)?
    };
    buf.truncate(read);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Strips a trailing `.gz` before looking up `.csv`/`.tsv`.
fn format_from_extension(path: &Path) -> Option<(DataFormat, char)> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let without_gz = name.strip_suffix(".gz").unwrap_or(&name);
    if without_gz.ends_with(".csv") {
        Some((DataFormat::Csv, ','))
    } else if without_gz.ends_with(".tsv") {
        Some((DataFormat::Tsv, '\t'))
    } else {
        None
    }
}

fn detect_delimiter_from_content(lines: &[&str]) -> Option<(char, f64)> {
    if lines.len() < 2 {
        return None;
    }

    let mut best: Option<(char, f64)> = None;
    for delim in CANDIDATE_DELIMITERS {
        let counts: Vec<usize> = lines.iter().map(|l| l.matches(delim).count()).collect();
        if counts.iter().any(|&c| c == 0) {
            continue;
        }

        let avg = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        let variance =
            counts.iter().map(|&c| (c as f64 - avg).powi(2)).sum::<f64>() / counts.len() as f64;
        let mut score = 1.0 / (1.0 + variance);
        if delim == ',' || delim == '\t' {
            score *= 1.2;
        }

        if best.map(|(_, best_score)| score > best_score).unwrap_or(true) {
            best = Some((delim, score));
        }
    }

    best.map(|(delim, score)| (delim, score.min(1.0)))
}

/// A row is a header if any field fails to parse as a number.
fn detect_header(first_line: Option<&str>, delimiter: char) -> bool {
    let Some(line) = first_line else { return false };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .from_reader(line.as_bytes());
    let Some(Ok(record)) = reader.records().next() else {
        return false;
    };
    record.iter().any(|field| field.trim().parse::<f64>().is_err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn csv_extension_is_high_confidence() {
        let file = write_temp(".csv", "a,b,c\n1,2,3\n");
        let detected = detect_format(file.path()).unwrap();
        assert_eq!(detected.format, DataFormat::Csv);
        assert_eq!(detected.delimiter, ',');
        assert!(detected.has_header);
        assert_eq!(detected.method, DetectionMethod::Extension);
        assert!((detected.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn tsv_gz_extension_strips_compression_suffix() {
        let file = write_temp(".tsv.gz", "ignored because extension wins\n");
        let detected = detect_format(file.path()).unwrap();
        assert_eq!(detected.format, DataFormat::Tsv);
        assert_eq!(detected.delimiter, '\t');
    }

    #[test]
    fn pipe_delimited_content_is_detected_without_extension_hint() {
        let contents = "h1|h2|h3\n1|2|3\n4|5|6\n7|8|9\n";
        let file = write_temp(".dat", contents);
        let detected = detect_format(file.path()).unwrap();
        assert_eq!(detected.delimiter, '|');
        assert_eq!(detected.method, DetectionMethod::ContentAnalysis);
    }

    #[test]
    fn unrecognizable_content_falls_back_to_csv() {
        let file = write_temp(".dat", "just some prose\nwith no structure\n");
        let detected = detect_format(file.path()).unwrap();
        assert_eq!(detected.method, DetectionMethod::Fallback);
        assert_eq!(detected.delimiter, ',');
        assert!((detected.confidence - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn headerless_numeric_first_row_is_not_a_header() {
        let file = write_temp(".csv", "1,2,3\n4,5,6\n");
        let detected = detect_format(file.path()).unwrap();
        assert!(!detected.has_header);
    }
}
