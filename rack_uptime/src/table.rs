//! Raw table model and the CSV/spreadsheet loaders that produce it.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::UptimeError;

/// A raw cell as delivered by the loader, before any interpretation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    /// Type a textual cell the way a spreadsheet reader would: blank is empty,
    /// anything that reads as a float is a number, the rest stays text.
    pub fn from_text(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else if let Ok(v) = trimmed.parse::<f64>() {
            Cell::Number(v)
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Render the cell as a header label.
    pub fn label(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Number(v) => format!("{v}"),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::DateTime(ts) => ts.to_string(),
        }
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build a table; blank header labels become `column N`.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let headers = headers
            .into_iter()
            .enumerate()
            .map(|(idx, h)| {
                let h = h.trim();
                if h.is_empty() {
                    format!("column {}", idx + 1)
                } else {
                    h.to_string()
                }
            })
            .collect();
        Self { headers, rows }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    /// Cell at (`row`, `col`); ragged rows read as empty past their end.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Keep the first `max_columns` columns and report how many were dropped.
    pub fn truncated(&self, max_columns: usize) -> (Table, usize) {
        let keep = self.width().min(max_columns);
        let dropped = self.width() - keep;
        let rows = self
            .rows
            .iter()
            .map(|r| r.iter().take(keep).cloned().collect())
            .collect();
        (
            Table {
                headers: self.headers[..keep].to_vec(),
                rows,
            },
            dropped,
        )
    }
}

/// Parse a table from bytes using the provided format hint (extension or file name).
pub fn parse_table(input: &[u8], format: &str) -> Result<Table, UptimeError> {
    let format_lc = format.to_ascii_lowercase();
    let ext = format_lc.rsplit('.').next().unwrap_or("");
    match ext {
        "csv" => parse_csv_table(input),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => parse_workbook_table(input),
        _ => Err(UptimeError::UnsupportedFormat(format.to_string())),
    }
}

fn parse_csv_table(input: &[u8]) -> Result<Table, UptimeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .delimiter(sniff_delimiter(input))
        .from_reader(input);

    // Fields are decoded lossily so a stray legacy-encoded byte only spoils
    // its own cell.
    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|e| UptimeError::CsvParse(e.to_string()))?
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| UptimeError::CsvParse(e.to_string()))?;
        let row: Vec<Cell> = record
            .iter()
            .map(|field| Cell::from_text(&String::from_utf8_lossy(field)))
            .collect();
        if row.iter().all(Cell::is_empty) {
            continue;
        }
        rows.push(row);
    }
    Ok(Table::new(headers, rows))
}

/// `;` when the header line uses it and has no `,`, otherwise `,`.
fn sniff_delimiter(input: &[u8]) -> u8 {
    let header = input.split(|&b| b == b'\n').next().unwrap_or_default();
    if header.contains(&b';') && !header.contains(&b',') {
        b';'
    } else {
        b','
    }
}

fn parse_workbook_table(input: &[u8]) -> Result<Table, UptimeError> {
    let cursor = Cursor::new(input.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)
        .map_err(|e| UptimeError::SpreadsheetParse(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(UptimeError::EmptyWorkbook)?
        .map_err(|e| UptimeError::SpreadsheetParse(e.to_string()))?;

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row
            .iter()
            .map(|cell| workbook_cell(cell).label())
            .collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for raw in rows_iter {
        let row: Vec<Cell> = raw.iter().map(workbook_cell).collect();
        if row.iter().all(Cell::is_empty) {
            continue;
        }
        rows.push(row);
    }
    Ok(Table::new(headers, rows))
}

fn workbook_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Int(v) => Cell::Number(*v as f64),
        Data::Float(v) => Cell::Number(*v),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.clone())
            }
        }
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}
