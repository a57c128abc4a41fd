//! Time-weighted uptime/downtime aggregation for rack sensor spreadsheets.
//!
//! A table has one time column followed by one value column per rack. Every
//! retained row is weighted by the minutes elapsed since the previous row, and
//! each column's readings are split into time spent below the threshold
//! (downtime) and at or above it (uptime).

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod series;
pub mod table;
pub mod value;

pub use aggregate::{aggregate_series, classify, ColumnResult, State};
pub use series::{build_time_axis, NormalizedSeries, SeriesPoint, TimeAxis};
pub use table::{parse_table, Cell, Table};
pub use value::parse_value;

#[derive(Error, Debug)]
pub enum UptimeError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse CSV file: {0}")]
    CsvParse(String),
    #[error("failed to parse spreadsheet: {0}")]
    SpreadsheetParse(String),
    #[error("workbook contains no worksheets")]
    EmptyWorkbook,
    #[error("table needs a time column and at least one value column, found {found} column(s)")]
    TooFewColumns { found: usize },
    #[error("time column '{column}' could not be parsed in any of its {rows} non-empty row(s)")]
    UnparseableTimeColumn { column: String, rows: usize },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Readings strictly below this value count as downtime.
    pub threshold: f64,
    /// Columns considered from the left, time column included.
    pub max_columns: usize,
    /// Duration credited to the first retained row, which has no predecessor.
    pub first_row_minutes: f64,
    /// Explicit chrono format for text timestamps; auto-detected when unset.
    pub time_format: Option<String>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            threshold: -5.0,
            max_columns: 5,
            first_row_minutes: 1.0,
            time_format: None,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), UptimeError> {
        if !self.threshold.is_finite() {
            return Err(UptimeError::InvalidParameter(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        if self.max_columns < 2 {
            return Err(UptimeError::InvalidParameter(format!(
                "max_columns must be at least 2, got {}",
                self.max_columns
            )));
        }
        if !self.first_row_minutes.is_finite() || self.first_row_minutes < 0.0 {
            return Err(UptimeError::InvalidParameter(format!(
                "first_row_minutes must be a non-negative number, got {}",
                self.first_row_minutes
            )));
        }
        if let Some(fmt) = self.time_format.as_deref() {
            if fmt.trim().is_empty() {
                return Err(UptimeError::InvalidParameter(
                    "time_format must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Bookkeeping about rows and columns that did not make it into the results.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TableDiagnostics {
    pub rows_read: usize,
    pub rows_missing_time: usize,
    pub rows_bad_time: usize,
    pub duplicate_rows_dropped: usize,
    pub columns_dropped: usize,
    pub span_minutes: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UptimeReport {
    pub columns: Vec<ColumnResult>,
    pub diagnostics: TableDiagnostics,
}

/// Compute per-column uptime/downtime for a loaded table.
///
/// Column 0 is the time axis whatever its header says; only the first
/// `params.max_columns` columns are considered. Structural problems are
/// reported as errors and never as an all-zero report.
pub fn compute_uptime(table: &Table, params: &Params) -> Result<UptimeReport, UptimeError> {
    params.validate()?;

    let (table, columns_dropped) = table.truncated(params.max_columns);
    if table.width() < 2 {
        return Err(UptimeError::TooFewColumns {
            found: table.width(),
        });
    }

    let axis = build_time_axis(&table, params)?;
    let columns = (1..table.width())
        .map(|col| {
            let series = NormalizedSeries::from_column(&axis, &table, col);
            aggregate_series(&series, params.threshold)
        })
        .collect();

    let mut diagnostics = axis.diagnostics.clone();
    diagnostics.columns_dropped = columns_dropped;
    Ok(UptimeReport {
        columns,
        diagnostics,
    })
}
