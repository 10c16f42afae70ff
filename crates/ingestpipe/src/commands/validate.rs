//! `validate` (spec.md section 4.9 / 6): re-runs post-load validation for a
//! table/month without loading anything. With no `--table`, every
//! configured table is checked; with no `--month`, the current month is
//! used — there is no persisted "last loaded month" to fall back to
//! (spec.md section 6, "Persisted state": only the log and events files).

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use ingestpipe_db::Identifier;
use ingestpipe_protocol::Config;
use ingestpipe_validate::{validate, ValidationRequest};
use serde::Serialize;

use super::{connect, parse_month, EXIT_OK, EXIT_PROBLEM};
use ingestpipe_pipeline::month_bounds;

#[derive(Serialize)]
struct TableValidation {
    table: String,
    result: ingestpipe_protocol::ValidationResult,
}

pub async fn run(
    config: &Config,
    table: Option<&str>,
    month: Option<&str>,
    output: Option<&Path>,
) -> Result<ExitCode> {
    let month = match month {
        Some(raw) => parse_month(raw)?,
        None => Utc::now().date_naive(),
    };

    let specs: Vec<&ingestpipe_protocol::FileSpec> = match table {
        Some(name) => {
            let spec = config
                .files
                .iter()
                .find(|spec| spec.table_name == name)
                .with_context(|| format!("table '{name}' is not declared in the configuration"))?;
            vec![spec]
        }
        None => config.files.iter().collect(),
    };

    let client = connect(&config.warehouse).await?;
    let mut reports = Vec::with_capacity(specs.len());
    for spec in specs {
        let table_id = Identifier::new(spec.table_name.as_str())
            .with_context(|| format!("table name '{}' is not a valid identifier", spec.table_name))?;
        let date_column = Identifier::new(spec.date_column.as_str())
            .with_context(|| format!("date column '{}' is not a valid identifier", spec.date_column))?;
        let (start, end) = month_bounds(month);
        let request = ValidationRequest { table: table_id, date_column, requested_range: (start, end) };
        let result = validate(&client, &request)
            .await
            .with_context(|| format!("validation query failed for table '{}'", spec.table_name))?;
        reports.push(TableValidation { table: spec.table_name.clone(), result });
    }

    let all_valid = reports.iter().all(|r| r.result.valid);
    let json = serde_json::to_string_pretty(&reports).context("failed to serialize validation report")?;
    match output {
        Some(path) => std::fs::write(path, &json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }

    if all_valid {
        Ok(ExitCode::from(EXIT_OK as u8))
    } else {
        Ok(ExitCode::from(EXIT_PROBLEM as u8))
    }
}
