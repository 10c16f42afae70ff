//! Duplicate Checker (spec.md section 4.10).

use chrono::NaiveDate;
use ingestpipe_db::{DbError, Identifier, WarehouseClient};
use sqlx::Row;
use thiserror::Error;

const TOP_GROUPS_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum DuplicateCheckError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("key_columns must be non-empty")]
    EmptyKeyColumns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSeverity {
    Critical,
    High,
    Medium,
    Low,
}

/// Severity thresholds from spec.md section 4.10: ratio of duplicate rows
/// to total rows. Configurable — callers that want different cutoffs pass
/// their own via [`DuplicateCheckRequest::severity_thresholds`].
#[derive(Debug, Clone, Copy)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self { critical: 0.10, high: 0.05, medium: 0.01 }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, ratio: f64) -> DuplicateSeverity {
        if ratio > self.critical {
            DuplicateSeverity::Critical
        } else if ratio > self.high {
            DuplicateSeverity::High
        } else if ratio > self.medium {
            DuplicateSeverity::Medium
        } else {
            DuplicateSeverity::Low
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub key_values: Vec<String>,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct DuplicateCheckResult {
    pub total_rows: u64,
    pub duplicate_rows: u64,
    pub groups: Vec<DuplicateGroup>,
    pub severity: DuplicateSeverity,
}

pub struct DuplicateCheckRequest {
    pub table: Identifier,
    pub key_columns: Vec<Identifier>,
    pub date_column: Option<Identifier>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub severity_thresholds: SeverityThresholds,
}

pub async fn check_duplicates(
    client: &WarehouseClient,
    request: &DuplicateCheckRequest,
) -> Result<DuplicateCheckResult, DuplicateCheckError> {
    if request.key_columns.is_empty() {
        return Err(DuplicateCheckError::EmptyKeyColumns);
    }

    let keys: Vec<&str> = request.key_columns.iter().map(Identifier::as_str).collect();
    let key_list = keys.join(", ");

    let where_clause = match (&request.date_column, request.date_range) {
        (Some(col), Some((start, end))) => format!(
            " WHERE {} BETWEEN '{}' AND '{}'",
            col.as_str(),
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d"),
        ),
        _ => String::new(),
    };

    let sql = format!(
        "SELECT {keys}, COUNT(*) AS c FROM \"{table}\"{where_clause} \
         GROUP BY {keys} HAVING COUNT(*) > 1 ORDER BY c DESC LIMIT {limit}",
        keys = key_list,
        table = request.table.as_str(),
        where_clause = where_clause,
        limit = TOP_GROUPS_LIMIT,
    );

    let rows = client.query(&sql).await?;
    let mut groups = Vec::with_capacity(rows.len());
    let mut duplicate_rows = 0u64;
    for row in &rows {
        let mut key_values = Vec::with_capacity(keys.len());
        for key in &keys {
            let value: String = row.try_get(*key).map_err(DbError::from)?;
            key_values.push(value);
        }
        let count: i64 = row.try_get("c").map_err(DbError::from)?;
        let count = count.max(0) as u64;
        duplicate_rows += count.saturating_sub(1);
        groups.push(DuplicateGroup { key_values, count });
    }

    let total_rows = client.row_count(&request.table).await?;
    let ratio = if total_rows == 0 { 0.0 } else { duplicate_rows as f64 / total_rows as f64 };
    let severity = request.severity_thresholds.classify(ratio);

    Ok(DuplicateCheckResult { total_rows, duplicate_rows, groups, severity })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_thresholds_match_spec() {
        let thresholds = SeverityThresholds::default();
        assert_eq!(thresholds.classify(0.11), DuplicateSeverity::Critical);
        assert_eq!(thresholds.classify(0.06), DuplicateSeverity::High);
        assert_eq!(thresholds.classify(0.02), DuplicateSeverity::Medium);
        assert_eq!(thresholds.classify(0.001), DuplicateSeverity::Low);
        assert_eq!(thresholds.classify(0.10), DuplicateSeverity::High);
    }
}
