//! Schema conformance and data quality checks.
//!
//! The validator never fits anything. It decides whether a run may proceed
//! and hands the transformer a table of rows that satisfy every row-level
//! check. Rejected rows are counted in the report and dropped.

use crate::schema::{ColumnSpec, ExpectedSchema, Violation};
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub column: String,
    pub nulls: usize,
    pub null_ratio: f64,
    /// Non-null values that violate type, range, domain or label mapping.
    pub invalid: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingColumn { column: String },
    ExtraColumn { column: String },
    NullRatioExceeded { column: String, ratio: f64, threshold: f64 },
    NoAcceptedRows,
}

impl ValidationIssue {
    /// Extra columns are reported but never stop a run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ExtraColumn { .. })
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingColumn { column } => write!(f, "missing column `{column}`"),
            Self::ExtraColumn { column } => write!(f, "unexpected column `{column}`"),
            Self::NullRatioExceeded { column, ratio, threshold } => {
                write!(f, "column `{column}` null ratio {ratio:.3} exceeds {threshold:.3}")
            }
            Self::NoAcceptedRows => f.write_str("no rows passed row-level checks"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub schema_matched: bool,
    pub missing_columns: Vec<String>,
    pub extra_columns: Vec<String>,
    pub columns: Vec<ColumnStats>,
    pub total_rows: usize,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
    pub issues: Vec<ValidationIssue>,
    pub accepted: bool,
}

impl ValidationReport {
    pub fn fatal_issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_fatal())
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let fatal: Vec<String> = self.fatal_issues().map(ToString::to_string).collect();
        if fatal.is_empty() {
            format!("{}/{} rows accepted", self.accepted_rows, self.total_rows)
        } else {
            fatal.join("; ")
        }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        self.columns.iter().find(|c| c.column == name)
    }
}

#[derive(Debug, Clone)]
pub struct DataValidator {
    schema: ExpectedSchema,
    max_null_ratio: f64,
}

enum Check<'a> {
    Feature(&'a ColumnSpec),
    Target,
}

impl DataValidator {
    #[must_use]
    pub fn new(schema: ExpectedSchema, max_null_ratio: f64) -> Self {
        Self { schema, max_null_ratio }
    }

    /// Validate `table` and return the accepted rows with the report.
    ///
    /// The accepted table keeps the input's column order minus any extra
    /// columns, so a conforming table comes back unchanged.
    pub fn validate(&self, table: &Table) -> (Table, ValidationReport) {
        let expected = self.schema.column_names();
        let missing_columns: Vec<String> =
            expected.iter().filter(|name| table.column_index(name).is_none()).cloned().collect();
        let extra_columns: Vec<String> =
            table.columns().iter().filter(|name| !self.schema.contains(name)).cloned().collect();

        let mut issues: Vec<ValidationIssue> = missing_columns
            .iter()
            .map(|column| ValidationIssue::MissingColumn { column: column.clone() })
            .chain(extra_columns.iter().map(|column| ValidationIssue::ExtraColumn { column: column.clone() }))
            .collect();

        // (table column index, check) for every expected column that is present
        let checks: Vec<(usize, Check<'_>)> = table
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| {
                if *name == self.schema.target.column {
                    Some((idx, Check::Target))
                } else {
                    self.schema.feature(name).map(|spec| (idx, Check::Feature(spec)))
                }
            })
            .collect();

        let total_rows = table.len();
        let mut columns: Vec<ColumnStats> = checks
            .iter()
            .map(|(idx, _)| ColumnStats {
                column: table.columns()[*idx].clone(),
                nulls: 0,
                null_ratio: 0.0,
                invalid: 0,
            })
            .collect();

        let schema_matched = missing_columns.is_empty();
        let mut accepted_idx = Vec::with_capacity(total_rows);
        for (row_idx, row) in table.rows().iter().enumerate() {
            let mut row_ok = true;
            for ((col_idx, check), stats) in checks.iter().zip(columns.iter_mut()) {
                let value = &row[*col_idx];
                if value.is_null() {
                    stats.nulls += 1;
                }
                if !self.passes(check, value, stats) {
                    row_ok = false;
                }
            }
            if row_ok && schema_matched {
                accepted_idx.push(row_idx);
            }
        }

        for stats in &mut columns {
            stats.null_ratio = if total_rows == 0 { 0.0 } else { stats.nulls as f64 / total_rows as f64 };
            if stats.null_ratio > self.max_null_ratio {
                issues.push(ValidationIssue::NullRatioExceeded {
                    column: stats.column.clone(),
                    ratio: stats.null_ratio,
                    threshold: self.max_null_ratio,
                });
            }
        }

        let keep: Vec<usize> = checks.iter().map(|(idx, _)| *idx).collect();
        let accepted_table = table.project(&keep, accepted_idx.iter().copied());
        if accepted_table.is_empty() {
            issues.push(ValidationIssue::NoAcceptedRows);
        }

        let accepted = !issues.iter().any(ValidationIssue::is_fatal);
        let report = ValidationReport {
            schema_matched,
            missing_columns,
            extra_columns,
            columns,
            total_rows,
            accepted_rows: accepted_table.len(),
            rejected_rows: total_rows - accepted_table.len(),
            issues,
            accepted,
        };

        if report.accepted {
            info!(
                total = report.total_rows,
                accepted = report.accepted_rows,
                rejected = report.rejected_rows,
                extra_columns = report.extra_columns.len(),
                "validation passed"
            );
        } else {
            warn!(summary = %report.summary(), total = report.total_rows, "validation failed");
        }

        (accepted_table, report)
    }

    fn passes(&self, check: &Check<'_>, value: &Value, stats: &mut ColumnStats) -> bool {
        match check {
            Check::Feature(spec) => match spec.check(value) {
                Ok(()) => true,
                Err(Violation::Null) => false,
                Err(_) => {
                    stats.invalid += 1;
                    false
                }
            },
            Check::Target => {
                if value.is_null() {
                    return false;
                }
                if self.schema.target.encode(value).is_none() {
                    stats.invalid += 1;
                    return false;
                }
                true
            }
        }
    }
}
