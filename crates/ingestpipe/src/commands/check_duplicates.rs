//! `check-duplicates` (spec.md section 4.10 / 6).

use std::process::ExitCode;

use anyhow::{Context, Result};
use comfy_table::Color;
use ingestpipe_db::Identifier;
use ingestpipe_protocol::Config;
use ingestpipe_validate::{check_duplicates, DuplicateCheckRequest, DuplicateSeverity, SeverityThresholds};

use super::output::{print_table, print_table_colored};
use super::{connect, EXIT_OK, EXIT_PROBLEM};

pub async fn run(
    config: &Config,
    table: &str,
    key_columns: &[String],
    date_range: Option<&str>,
) -> Result<ExitCode> {
    let table_id = Identifier::new(table).with_context(|| format!("'{table}' is not a valid identifier"))?;
    let key_ids = key_columns
        .iter()
        .map(|c| Identifier::new(c.as_str()).with_context(|| format!("'{c}' is not a valid identifier")))
        .collect::<Result<Vec<_>>>()?;

    let (date_column, range) = match date_range {
        Some(raw) => {
            let (start_raw, end_raw) = raw
                .split_once(':')
                .with_context(|| format!("'--date-range' must be 'YYYY-MM-DD:YYYY-MM-DD', got '{raw}'"))?;
            let start = chrono::NaiveDate::parse_from_str(start_raw, "%Y-%m-%d")
                .with_context(|| format!("invalid start date '{start_raw}'"))?;
            let end = chrono::NaiveDate::parse_from_str(end_raw, "%Y-%m-%d")
                .with_context(|| format!("invalid end date '{end_raw}'"))?;
            let date_column = config
                .files
                .iter()
                .find(|spec| spec.table_name == table)
                .map(|spec| spec.date_column.clone())
                .with_context(|| format!("table '{table}' is not declared in the configuration"))?;
            let date_column = Identifier::new(date_column.as_str())
                .with_context(|| format!("date column '{date_column}' is not a valid identifier"))?;
            (Some(date_column), Some((start, end)))
        }
        None => (None, None),
    };

    let client = connect(&config.warehouse).await?;
    let request = DuplicateCheckRequest {
        table: table_id,
        key_columns: key_ids,
        date_column,
        date_range: range,
        severity_thresholds: SeverityThresholds::default(),
    };
    let result = check_duplicates(&client, &request).await?;

    let rows = result
        .groups
        .iter()
        .map(|group| vec![group.key_values.join(", "), group.count.to_string()])
        .collect();
    print_table(&["key", "count"], rows);

    let (severity_label, color) = match result.severity {
        DuplicateSeverity::Critical => ("critical", Color::Red),
        DuplicateSeverity::High => ("high", Color::Yellow),
        DuplicateSeverity::Medium => ("medium", Color::Yellow),
        DuplicateSeverity::Low => ("low", Color::Green),
    };
    print_table_colored(
        &["metric", "value"],
        vec![
            vec![("total rows".to_string(), None), (result.total_rows.to_string(), None)],
            vec![("duplicate rows".to_string(), None), (result.duplicate_rows.to_string(), None)],
            vec![("severity".to_string(), None), (severity_label.to_string(), Some(color))],
        ],
    );

    match result.severity {
        DuplicateSeverity::Critical | DuplicateSeverity::High => Ok(ExitCode::from(EXIT_PROBLEM as u8)),
        DuplicateSeverity::Medium | DuplicateSeverity::Low => Ok(ExitCode::from(EXIT_OK as u8)),
    }
}
