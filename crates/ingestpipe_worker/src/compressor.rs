//! Streaming gzip compression for staged upload (spec.md section 4.3).

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_LEVEL: u32 = 1;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("failed to read input: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write compressed output: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub chunk_size: usize,
    pub level: u32,
    /// Directory to write the `.gz` artifact into. `None` places it
    /// alongside the input.
    pub output_dir: Option<PathBuf>,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            level: DEFAULT_LEVEL,
            output_dir: None,
        }
    }
}

/// Compress `input` to a sibling (or `output_dir`-relative) `.gz` artifact.
///
/// On any failure the partial output file is removed before the error is
/// returned — callers never see a truncated artifact on disk.
pub fn compress_file(
    input: &Path,
    options: &CompressOptions,
    mut on_bytes_read: impl FnMut(u64),
) -> Result<PathBuf, CompressError> {
    let output_path = derive_output_path(input, options);

    match compress_inner(input, &output_path, options, &mut on_bytes_read) {
        Ok(()) => Ok(output_path),
        Err(err) => {
            let _ = fs::remove_file(&output_path);
            Err(err)
        }
    }
}

fn compress_inner(
    input: &Path,
    output_path: &Path,
    options: &CompressOptions,
    on_bytes_read: &mut dyn FnMut(u64),
) -> Result<(), CompressError> {
    let input_file = File::open(input).map_err(CompressError::Read)?;
    let mut reader = BufReader::new(input_file);

    let output_file = File::create(output_path).map_err(CompressError::Write)?;
    let writer = BufWriter::new(output_file);
    let mut encoder = GzEncoder::new(writer, Compression::new(options.level));

    let mut buf = vec![0u8; options.chunk_size];
    loop {
        let read = reader.read(&mut buf).map_err(CompressError::Read)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read]).map_err(CompressError::Write)?;
        on_bytes_read(read as u64);
    }

    encoder.finish().map_err(CompressError::Write)?;
    Ok(())
}

fn derive_output_path(input: &Path, options: &CompressOptions) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|n| {
            let mut n = n.to_os_string();
            n.push(".gz");
            n
        })
        .unwrap_or_else(|| "output.gz".into());

    match &options.output_dir {
        Some(dir) => dir.join(file_name),
        None => input.with_file_name(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn compresses_and_reports_bytes_read() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("data.csv");
        let mut input = File::create(&input_path).unwrap();
        let payload = "a,b,c\n1,2,3\n".repeat(1000);
        input.write_all(payload.as_bytes()).unwrap();
        drop(input);

        let mut total_read = 0u64;
        let options = CompressOptions {
            chunk_size: 1024,
            ..Default::default()
        };
        let output = compress_file(&input_path, &options, |n| total_read += n).unwrap();

        assert_eq!(output, input_path.with_file_name("data.csv.gz"));
        assert_eq!(total_read, payload.len() as u64);
        assert!(output.exists());

        let mut decoder = flate2::read::GzDecoder::new(File::open(&output).unwrap());
        let mut decompressed = String::new();
        decoder.read_to_string(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn failure_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing_input = dir.path().join("does-not-exist.csv");
        let options = CompressOptions::default();
        let result = compress_file(&missing_input, &options, |_| {});
        assert!(result.is_err());
        assert!(!dir.path().join("does-not-exist.csv.gz").exists());
    }
}
