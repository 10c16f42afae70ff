//! Deletion Planner / Executor (spec.md section 4.11): converts a
//! `(table, month)` pair into a bounded `DELETE`, with a dry-run impact
//! preview and an explicit external confirmation gate — this module never
//! prompts anyone itself, it only refuses to execute until the caller
//! (the CLI) passes `confirmed: true`.
//!
//! Phases: validate -> analyze impact -> preview -> confirm -> execute ->
//! verify. A dry run halts after analyze impact; a zero-impact plan is
//! reported `Skipped` without ever issuing the `DELETE`.

use chrono::{NaiveDate, Utc};
use ingestpipe_db::{DbError, Identifier, WarehouseClient};
use ingestpipe_protocol::{DeletionResult, DeletionStatus, DeletionTarget};
use sqlx::Row;
use thiserror::Error;
use tracing::warn;

use crate::resolve::month_bounds;

const DEFAULT_PREVIEW_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum DeletionExecutorError {
    #[error("table or date column does not exist: {0}")]
    ValidationFailed(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("execution requires confirmation (pass --yes or confirmed=true)")]
    NotConfirmed,
}

#[derive(Debug, Clone)]
pub struct DeletionRequest {
    pub table: String,
    pub date_column: String,
    /// Any day within the target month; bounds are derived via
    /// [`month_bounds`].
    pub month: NaiveDate,
    pub dry_run: bool,
    pub confirmed: bool,
    pub preview: bool,
}

/// The outcome of the validate/analyze-impact/preview phases, before any
/// row is deleted. A dry run's final [`DeletionResult`] is built directly
/// from this.
#[derive(Debug, Clone)]
pub struct DeletionPlan {
    pub target: DeletionTarget,
    pub rows_before: u64,
    pub impact: u64,
    pub preview_rows: Vec<String>,
}

pub struct DeletionExecutor<'a> {
    client: &'a WarehouseClient,
}

impl<'a> DeletionExecutor<'a> {
    pub fn new(client: &'a WarehouseClient) -> Self {
        Self { client }
    }

    /// Runs validate -> analyze-impact -> (optional) preview and returns
    /// the plan. Does not delete anything.
    pub async fn plan(&self, request: &DeletionRequest) -> Result<DeletionPlan, DeletionExecutorError> {
        let table = Identifier::new(request.table.as_str())
            .map_err(|err| DeletionExecutorError::ValidationFailed(err.to_string()))?;
        let date_column = Identifier::new(request.date_column.as_str())
            .map_err(|err| DeletionExecutorError::ValidationFailed(err.to_string()))?;
        let (start, end) = month_bounds(request.month);

        self.validate(&table, &date_column).await?;
        let (rows_before, impact) = self.analyze_impact(&table, &date_column, start, end).await?;
        let preview_rows = if request.preview && impact > 0 {
            self.preview(&table, &date_column, start, end, DEFAULT_PREVIEW_LIMIT).await?
        } else {
            Vec::new()
        };

        Ok(DeletionPlan {
            target: DeletionTarget {
                table: request.table.clone(),
                date_column: request.date_column.clone(),
                start,
                end,
            },
            rows_before,
            impact,
            preview_rows,
        })
    }

    /// Runs the full phase sequence for one request, honoring `dry_run`,
    /// `confirmed`, and the zero-impact skip.
    pub async fn execute(
        &self,
        request: &DeletionRequest,
    ) -> Result<DeletionResult, DeletionExecutorError> {
        let started = std::time::Instant::now();
        let plan = self.plan(request).await?;

        if plan.impact == 0 {
            return Ok(DeletionResult {
                target: plan.target,
                status: DeletionStatus::Skipped,
                rows_before: plan.rows_before,
                rows_affected: 0,
                deletion_percent: 0.0,
                recovery_timestamp: None,
                execution_time: started.elapsed(),
            });
        }

        if request.dry_run {
            return Ok(DeletionResult {
                target: plan.target,
                status: DeletionStatus::DryRun,
                rows_before: plan.rows_before,
                rows_affected: plan.impact,
                deletion_percent: percent(plan.impact, plan.rows_before),
                recovery_timestamp: None,
                execution_time: started.elapsed(),
            });
        }

        if !request.confirmed {
            return Err(DeletionExecutorError::NotConfirmed);
        }

        let table = Identifier::new(request.table.as_str())
            .map_err(|err| DeletionExecutorError::ValidationFailed(err.to_string()))?;
        let date_column = Identifier::new(request.date_column.as_str())
            .map_err(|err| DeletionExecutorError::ValidationFailed(err.to_string()))?;
        let recovery_timestamp = Utc::now();

        let sql = format!(
            "DELETE FROM \"{table}\" WHERE {date_col} BETWEEN '{start}' AND '{end}'",
            table = table.as_str(),
            date_col = date_column.as_str(),
            start = plan.target.start.format("%Y-%m-%d"),
            end = plan.target.end.format("%Y-%m-%d"),
        );
        let rows_affected = self.client.exec(&sql).await?;

        if rows_affected != plan.impact {
            warn!(
                table = %request.table,
                expected = plan.impact,
                actual = rows_affected,
                "rows affected by DELETE did not match analyzed impact"
            );
        }

        Ok(DeletionResult {
            target: plan.target,
            status: DeletionStatus::Success,
            rows_before: plan.rows_before,
            rows_affected,
            deletion_percent: percent(rows_affected, plan.rows_before),
            recovery_timestamp: Some(recovery_timestamp),
            execution_time: started.elapsed(),
        })
    }

    async fn validate(
        &self,
        table: &Identifier,
        date_column: &Identifier,
    ) -> Result<(), DeletionExecutorError> {
        let sql = format!("SELECT {} FROM \"{}\" LIMIT 0", date_column.as_str(), table.as_str());
        self.client
            .query(&sql)
            .await
            .map(|_| ())
            .map_err(|err| DeletionExecutorError::ValidationFailed(err.to_string()))
    }

    async fn analyze_impact(
        &self,
        table: &Identifier,
        date_column: &Identifier,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(u64, u64), DeletionExecutorError> {
        let rows_before = self.client.row_count(table).await?;
        let sql = format!(
            "SELECT COUNT(*) AS n FROM \"{table}\" WHERE {date_col} BETWEEN '{start}' AND '{end}'",
            table = table.as_str(),
            date_col = date_column.as_str(),
            start = start.format("%Y-%m-%d"),
            end = end.format("%Y-%m-%d"),
        );
        let rows = self.client.query(&sql).await?;
        let impact: i64 = rows
            .first()
            .map(|row| row.try_get("n"))
            .transpose()
            .map_err(DbError::from)?
            .unwrap_or(0);
        Ok((rows_before, impact.max(0) as u64))
    }

    /// Each previewed row is rendered as one JSON object via Postgres'
    /// `to_jsonb`, sidestepping the need to know the table's column types
    /// up front — the facade otherwise has no reason to.
    async fn preview(
        &self,
        table: &Identifier,
        date_column: &Identifier,
        start: NaiveDate,
        end: NaiveDate,
        limit: u32,
    ) -> Result<Vec<String>, DeletionExecutorError> {
        let sql = format!(
            "SELECT to_jsonb(t) AS row_json FROM \"{table}\" t \
             WHERE {date_col} BETWEEN '{start}' AND '{end}' LIMIT {limit}",
            table = table.as_str(),
            date_col = date_column.as_str(),
            start = start.format("%Y-%m-%d"),
            end = end.format("%Y-%m-%d"),
            limit = limit,
        );
        let rows = self.client.query(&sql).await?;
        rows.iter()
            .map(|row| {
                row.try_get::<serde_json::Value, _>("row_json")
                    .map(|v| v.to_string())
                    .map_err(|err| DeletionExecutorError::Db(DbError::from(err)))
            })
            .collect()
    }
}

fn percent(affected: u64, before: u64) -> f64 {
    if before == 0 {
        0.0
    } else {
        (affected as f64 / before as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_empty_table() {
        assert_eq!(percent(0, 0), 0.0);
    }

    #[test]
    fn percent_computes_ratio() {
        assert!((percent(250, 1000) - 25.0).abs() < f64::EPSILON);
    }
}
