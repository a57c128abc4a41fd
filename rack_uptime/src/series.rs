//! Time axis construction and per-column series normalization.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::table::{Cell, Table};
use crate::value::parse_value;
use crate::{Params, TableDiagnostics, UptimeError};

const TEXT_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
];

const TEXT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d.%m.%Y"];

const MILLIS_PER_DAY: f64 = 86_400_000.0;
// Serial day of 9999-12-31
const MAX_SERIAL_DAYS: f64 = 2_958_465.0;

/// Shared time axis of a table: retained rows in time order with their durations.
#[derive(Clone, Debug, Default)]
pub struct TimeAxis {
    /// (source row index, timestamp, duration in minutes), ascending by timestamp.
    pub entries: Vec<(usize, NaiveDateTime, f64)>,
    pub diagnostics: TableDiagnostics,
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub duration_minutes: f64,
}

/// One value column laid onto the time axis, ready for classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSeries {
    pub column_id: String,
    pub points: Vec<SeriesPoint>,
}

impl NormalizedSeries {
    pub fn from_column(axis: &TimeAxis, table: &Table, col: usize) -> Self {
        let points = axis
            .entries
            .iter()
            .map(|&(row, timestamp, duration_minutes)| SeriesPoint {
                timestamp,
                value: parse_value(table.cell(row, col)),
                duration_minutes,
            })
            .collect();
        Self {
            column_id: table.headers.get(col).cloned().unwrap_or_default(),
            points,
        }
    }

    pub fn total_minutes(&self) -> f64 {
        self.points.iter().map(|p| p.duration_minutes).sum()
    }
}

/// Filter, sort and deduplicate the rows of `table` by its first column and
/// assign each retained row the minutes elapsed since its predecessor.
pub fn build_time_axis(table: &Table, params: &Params) -> Result<TimeAxis, UptimeError> {
    let mut diagnostics = TableDiagnostics {
        rows_read: table.rows.len(),
        ..TableDiagnostics::default()
    };

    let mut stamped: Vec<(usize, NaiveDateTime)> = Vec::with_capacity(table.rows.len());
    for row in 0..table.rows.len() {
        let cell = table.cell(row, 0);
        if cell.is_empty() {
            diagnostics.rows_missing_time += 1;
            continue;
        }
        match parse_timestamp(cell, params.time_format.as_deref()) {
            Some(ts) => stamped.push((row, ts)),
            None => diagnostics.rows_bad_time += 1,
        }
    }

    if stamped.is_empty() && diagnostics.rows_bad_time > 0 {
        return Err(UptimeError::UnparseableTimeColumn {
            column: table.headers.first().cloned().unwrap_or_default(),
            rows: diagnostics.rows_bad_time,
        });
    }

    stamped.sort_by_key(|&(_, ts)| ts);
    let before = stamped.len();
    stamped.dedup_by_key(|&mut (_, ts)| ts);
    diagnostics.duplicate_rows_dropped = before - stamped.len();

    let mut entries = Vec::with_capacity(stamped.len());
    let mut prev: Option<NaiveDateTime> = None;
    for (row, ts) in stamped {
        let duration = match prev {
            Some(p) => minutes_between(p, ts),
            None => params.first_row_minutes,
        };
        entries.push((row, ts, duration));
        prev = Some(ts);
    }

    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        diagnostics.span_minutes = minutes_between(first.1, last.1);
    }

    Ok(TimeAxis {
        entries,
        diagnostics,
    })
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

/// Interpret a time cell. Numbers are spreadsheet serial days.
///
/// Every layout yields wall-clock time as written: an RFC 3339 offset is
/// dropped rather than applied, so offset and naive stamps in one column
/// share a clock.
pub fn parse_timestamp(cell: &Cell, format: Option<&str>) -> Option<NaiveDateTime> {
    match cell {
        Cell::DateTime(ts) => Some(*ts),
        Cell::Number(days) => from_serial_days(*days),
        Cell::Text(s) => parse_text_timestamp(s.trim(), format),
        Cell::Empty | Cell::Bool(_) => None,
    }
}

fn from_serial_days(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() || !(0.0..=MAX_SERIAL_DAYS).contains(&days) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (days * MILLIS_PER_DAY).round();
    epoch.checked_add_signed(Duration::milliseconds(millis as i64))
}

fn parse_text_timestamp(raw: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    if let Some(fmt) = format {
        return NaiveDateTime::parse_from_str(raw, fmt).ok().or_else(|| {
            NaiveDate::parse_from_str(raw, fmt)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    TEXT_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            TEXT_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn table(rows: Vec<Vec<Cell>>) -> Table {
        Table::new(vec!["time".into(), "Rack".into()], rows)
    }

    #[test]
    fn parses_common_text_layouts() {
        let expected = at(10, 15, 0);
        for raw in [
            "2024-03-01 10:15:00",
            "2024-03-01T10:15:00",
            "2024-03-01 10:15",
            "01/03/2024 10:15",
            "2024-03-01T10:15:00Z",
            "2024-03-01T10:15:00+02:00",
        ] {
            assert_eq!(parse_timestamp(&text(raw), None), Some(expected), "{raw}");
        }
        assert_eq!(
            parse_timestamp(&text("2024-03-01"), None),
            Some(at(0, 0, 0))
        );
    }

    #[test]
    fn offset_and_naive_stamps_share_wall_clock() {
        let t = table(vec![
            vec![text("2024-03-01T10:00:00+02:00"), Cell::Number(1.0)],
            vec![text("2024-03-01 10:00:00"), Cell::Number(2.0)],
            vec![text("2024-03-01 10:30:00"), Cell::Number(3.0)],
        ]);
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        assert_eq!(axis.len(), 2);
        assert_eq!(axis.entries[0].0, 0);
        assert_eq!(axis.entries[1].2, 30.0);
        assert_eq!(axis.diagnostics.duplicate_rows_dropped, 1);
    }

    #[test]
    fn explicit_format_overrides_detection() {
        let cell = text("03-01-2024 10:15");
        assert_eq!(parse_timestamp(&cell, None), None);
        assert_eq!(
            parse_timestamp(&cell, Some("%m-%d-%Y %H:%M")),
            Some(at(10, 15, 0))
        );
    }

    #[test]
    fn serial_days_use_spreadsheet_epoch() {
        // 45352 is 2024-03-01 in spreadsheet serial days
        assert_eq!(
            parse_timestamp(&Cell::Number(45352.5), None),
            Some(at(12, 0, 0))
        );
        assert_eq!(parse_timestamp(&Cell::Number(-1.0), None), None);
        assert_eq!(parse_timestamp(&Cell::Number(f64::NAN), None), None);
    }

    #[test]
    fn native_datetime_passes_through() {
        assert_eq!(
            parse_timestamp(&Cell::DateTime(at(1, 2, 3)), None),
            Some(at(1, 2, 3))
        );
        assert_eq!(parse_timestamp(&Cell::Bool(true), None), None);
    }

    #[test]
    fn axis_sorts_and_assigns_durations() {
        let t = table(vec![
            vec![Cell::DateTime(at(0, 6, 0)), Cell::Number(-10.0)],
            vec![Cell::DateTime(at(0, 0, 0)), Cell::Number(-10.0)],
            vec![Cell::DateTime(at(0, 1, 0)), Cell::Number(-2.0)],
        ]);
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        let rows: Vec<usize> = axis.entries.iter().map(|e| e.0).collect();
        let durations: Vec<f64> = axis.entries.iter().map(|e| e.2).collect();
        assert_eq!(rows, [1, 2, 0]);
        assert_eq!(durations, [1.0, 1.0, 5.0]);
        assert_eq!(axis.diagnostics.span_minutes, 6.0);
    }

    #[test]
    fn axis_keeps_first_of_duplicate_timestamps() {
        let t = table(vec![
            vec![Cell::DateTime(at(0, 0, 0)), Cell::Number(-10.0)],
            vec![Cell::DateTime(at(0, 10, 0)), Cell::Number(3.0)],
            vec![Cell::DateTime(at(0, 0, 0)), Cell::Number(3.0)],
        ]);
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        assert_eq!(axis.len(), 2);
        assert_eq!(axis.entries[0].0, 0);
        assert_eq!(axis.diagnostics.duplicate_rows_dropped, 1);
    }

    #[test]
    fn axis_drops_missing_and_bad_timestamps() {
        let t = table(vec![
            vec![Cell::Empty, Cell::Number(1.0)],
            vec![text("garbage"), Cell::Number(1.0)],
            vec![Cell::DateTime(at(0, 0, 30)), Cell::Number(1.0)],
            vec![Cell::DateTime(at(0, 1, 0)), Cell::Number(1.0)],
        ]);
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        assert_eq!(axis.len(), 2);
        assert_eq!(axis.diagnostics.rows_read, 4);
        assert_eq!(axis.diagnostics.rows_missing_time, 1);
        assert_eq!(axis.diagnostics.rows_bad_time, 1);
        assert_eq!(axis.entries[1].2, 0.5);
    }

    #[test]
    fn only_missing_timestamps_is_degenerate_not_fatal() {
        let t = table(vec![vec![Cell::Empty, Cell::Number(1.0)]]);
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        assert!(axis.is_empty());
        assert_eq!(axis.diagnostics.span_minutes, 0.0);
    }

    #[test]
    fn first_row_minutes_is_configurable() {
        let t = table(vec![vec![Cell::DateTime(at(0, 0, 0)), Cell::Number(1.0)]]);
        let params = Params {
            first_row_minutes: 2.5,
            ..Params::default()
        };
        let axis = build_time_axis(&t, &params).unwrap();
        assert_eq!(axis.entries[0].2, 2.5);
    }

    #[test]
    fn series_parses_values_per_column() {
        let t = Table::new(
            vec!["time".into(), "a".into(), "b".into()],
            vec![
                vec![Cell::DateTime(at(0, 0, 0)), text("-6,5 kPa"), text("N/A")],
                vec![Cell::DateTime(at(0, 2, 0)), Cell::Number(1.0)],
            ],
        );
        let axis = build_time_axis(&t, &Params::default()).unwrap();
        let a = NormalizedSeries::from_column(&axis, &t, 1);
        let b = NormalizedSeries::from_column(&axis, &t, 2);
        assert_eq!(a.column_id, "a");
        assert_eq!(a.points[0].value, Some(-6.5));
        assert_eq!(a.points[1].value, Some(1.0));
        assert_eq!(b.points[0].value, None);
        assert_eq!(b.points[1].value, None);
        assert_eq!(a.total_minutes(), 3.0);
        assert_eq!(b.total_minutes(), 3.0);
    }
}
