//! `delete` (spec.md section 4.11 / 6): deletes one table's rows for one
//! month, with an impact preview and an explicit `--yes` confirmation gate.

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use ingestpipe_pipeline::{DeletionExecutor, DeletionExecutorError, DeletionRequest};
use ingestpipe_protocol::{Config, DeletionStatus};

use super::{connect, parse_month, EXIT_OK, EXIT_PROBLEM};

pub async fn run(
    config: &Config,
    table: &str,
    month: &str,
    dry_run: bool,
    yes: bool,
) -> Result<ExitCode> {
    let date_column = config
        .files
        .iter()
        .find(|spec| spec.table_name == table)
        .map(|spec| spec.date_column.clone())
        .with_context(|| format!("table '{table}' is not declared in the configuration"))?;
    let month = parse_month(month)?;
    let client = connect(&config.warehouse).await?;

    let request = DeletionRequest {
        table: table.to_string(),
        date_column,
        month,
        dry_run,
        confirmed: yes,
        preview: true,
    };

    let executor = DeletionExecutor::new(&client);
    let result = match executor.execute(&request).await {
        Ok(result) => result,
        Err(DeletionExecutorError::NotConfirmed) => {
            let plan = executor.plan(&request).await?;
            println!(
                "would delete {} of {} row(s) ({:.2}%) from '{}' for {}..{}",
                plan.impact,
                plan.rows_before,
                if plan.rows_before == 0 { 0.0 } else { plan.impact as f64 / plan.rows_before as f64 * 100.0 },
                table,
                plan.target.start,
                plan.target.end,
            );
            for row in &plan.preview_rows {
                println!("  {row}");
            }
            println!("pass --yes to execute");
            return Ok(ExitCode::from(EXIT_PROBLEM as u8));
        }
        Err(err) => bail!(err),
    };

    match result.status {
        DeletionStatus::Success => {
            println!(
                "deleted {} row(s) from '{}' for {}..{} ({:.2}% of {})",
                result.rows_affected,
                table,
                result.target.start,
                result.target.end,
                result.deletion_percent,
                result.rows_before,
            );
            Ok(ExitCode::from(EXIT_OK as u8))
        }
        DeletionStatus::Skipped => {
            println!("nothing to delete: 0 rows in range {}..{}", result.target.start, result.target.end);
            Ok(ExitCode::from(EXIT_OK as u8))
        }
        DeletionStatus::DryRun => {
            println!(
                "dry run: {} row(s) would be deleted from '{}' for {}..{} ({:.2}% of {})",
                result.rows_affected,
                table,
                result.target.start,
                result.target.end,
                result.deletion_percent,
                result.rows_before,
            );
            Ok(ExitCode::from(EXIT_OK as u8))
        }
        DeletionStatus::Failed => {
            println!("deletion failed for '{table}'");
            Ok(ExitCode::from(EXIT_PROBLEM as u8))
        }
    }
}
