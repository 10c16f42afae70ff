//! `compare` (SPEC_FULL.md section B.1, grounded on
//! `original_source/compare_tsv_files.py`): a byte/row-level diff of two
//! local files that never touches the warehouse. `--quick` only compares
//! byte size and line count; full mode streams both files line-by-line and
//! reports the first differing rows.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use super::output::print_table;
use super::{EXIT_OK, EXIT_PROBLEM};

const MAX_REPORTED_DIFFERENCES: usize = 20;

pub fn run(file1: &PathBuf, file2: &PathBuf, quick: bool) -> Result<ExitCode> {
    let size1 = std::fs::metadata(file1)
        .with_context(|| format!("failed to stat {}", file1.display()))?
        .len();
    let size2 = std::fs::metadata(file2)
        .with_context(|| format!("failed to stat {}", file2.display()))?
        .len();

    let rows1 = open_lines(file1)?;
    let rows2 = open_lines(file2)?;

    let label1 = file1.display().to_string();
    let label2 = file2.display().to_string();

    if quick {
        let count1 = rows1.count();
        let count2 = rows2.count();
        print_table(
            &["metric", &label1, &label2],
            vec![
                vec!["bytes".to_string(), size1.to_string(), size2.to_string()],
                vec!["rows".to_string(), count1.to_string(), count2.to_string()],
            ],
        );
        return Ok(status(size1 == size2 && count1 == count2));
    }

    let mut differences = Vec::new();
    let mut row_count1 = 0usize;
    let mut row_count2 = 0usize;
    let mut iter1 = rows1.peekable();
    let mut iter2 = rows2.peekable();
    loop {
        match (iter1.next(), iter2.next()) {
            (Some(a), Some(b)) => {
                row_count1 += 1;
                row_count2 += 1;
                let (a, b) = (a?, b?);
                if a != b && differences.len() < MAX_REPORTED_DIFFERENCES {
                    differences.push((row_count1, a, b));
                }
            }
            (Some(a), None) => {
                row_count1 += 1;
                a?;
                if differences.len() < MAX_REPORTED_DIFFERENCES {
                    differences.push((row_count1, "<missing>".to_string(), String::new()));
                }
            }
            (None, Some(b)) => {
                row_count2 += 1;
                b?;
                if differences.len() < MAX_REPORTED_DIFFERENCES {
                    differences.push((row_count2, String::new(), "<missing>".to_string()));
                }
            }
            (None, None) => break,
        }
    }

    print_table(
        &["metric", &label1, &label2],
        vec![
            vec!["bytes".to_string(), size1.to_string(), size2.to_string()],
            vec!["rows".to_string(), row_count1.to_string(), row_count2.to_string()],
        ],
    );

    if differences.is_empty() {
        println!("no content differences");
    } else {
        println!("first {} differing row(s):", differences.len());
        for (row, a, b) in &differences {
            println!("  row {row}:\n    < {a}\n    > {b}");
        }
    }

    Ok(status(size1 == size2 && row_count1 == row_count2 && differences.is_empty()))
}

fn open_lines(path: &PathBuf) -> Result<impl Iterator<Item = std::io::Result<String>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file).lines())
}

fn status(identical: bool) -> ExitCode {
    ExitCode::from(if identical { EXIT_OK } else { EXIT_PROBLEM } as u8)
}
