//! `report` (SPEC_FULL.md section B.2, grounded on
//! `original_source/snowflake_etl/operations/utilities/generate_report_operation.py`):
//! a read-only row-count and date-coverage summary over the configured
//! tables. `--tables` scopes to a subset; `--output` writes JSON instead of
//! a table to stdout.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use ingestpipe_db::Identifier;
use ingestpipe_protocol::Config;
use serde::Serialize;
use sqlx::Row;

use super::output::print_table;
use super::{connect, EXIT_OK, EXIT_PROBLEM};

#[derive(Serialize)]
struct TableReport {
    table: String,
    row_count: u64,
    earliest_date: Option<NaiveDate>,
    latest_date: Option<NaiveDate>,
}

pub async fn run(config: &Config, tables: Option<&[String]>, output: Option<&Path>) -> Result<ExitCode> {
    let specs: Vec<&ingestpipe_protocol::FileSpec> = match tables {
        Some(names) => {
            let mut specs = Vec::with_capacity(names.len());
            for name in names {
                let spec = config
                    .files
                    .iter()
                    .find(|spec| &spec.table_name == name)
                    .with_context(|| format!("table '{name}' is not declared in the configuration"))?;
                specs.push(spec);
            }
            specs
        }
        None => config.files.iter().collect(),
    };

    let client = connect(&config.warehouse).await?;
    let mut reports = Vec::with_capacity(specs.len());
    for spec in specs {
        let table_id = Identifier::new(spec.table_name.as_str())
            .with_context(|| format!("table name '{}' is not a valid identifier", spec.table_name))?;
        let date_id = Identifier::new(spec.date_column.as_str())
            .with_context(|| format!("date column '{}' is not a valid identifier", spec.date_column))?;

        let row_count = client
            .row_count(&table_id)
            .await
            .with_context(|| format!("row count query failed for table '{}'", spec.table_name))?;

        let sql = format!(
            "SELECT MIN({date_col}) AS earliest, MAX({date_col}) AS latest FROM \"{table}\"",
            date_col = date_id.as_str(),
            table = table_id.as_str(),
        );
        let rows = client
            .query(&sql)
            .await
            .with_context(|| format!("date coverage query failed for table '{}'", spec.table_name))?;
        let (earliest_date, latest_date) = match rows.first() {
            Some(row) => {
                let earliest: Option<NaiveDate> = row
                    .try_get("earliest")
                    .with_context(|| format!("malformed date coverage row for table '{}'", spec.table_name))?;
                let latest: Option<NaiveDate> = row
                    .try_get("latest")
                    .with_context(|| format!("malformed date coverage row for table '{}'", spec.table_name))?;
                (earliest, latest)
            }
            None => (None, None),
        };

        reports.push(TableReport {
            table: spec.table_name.clone(),
            row_count,
            earliest_date,
            latest_date,
        });
    }

    match output {
        Some(path) => {
            let json = serde_json::to_string_pretty(&reports).context("failed to serialize report")?;
            std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => {
            let rows = reports
                .iter()
                .map(|r| {
                    vec![
                        r.table.clone(),
                        r.row_count.to_string(),
                        r.earliest_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                        r.latest_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                    ]
                })
                .collect();
            print_table(&["table", "rows", "earliest", "latest"], rows);
        }
    }

    if reports.iter().any(|r| r.row_count == 0) {
        Ok(ExitCode::from(EXIT_PROBLEM as u8))
    } else {
        Ok(ExitCode::from(EXIT_OK as u8))
    }
}
