//! In-memory CSV tables.
//!
//! Every intermediate file the pipelines exchange is a UTF-8 CSV with a
//! header row. Files are written with a byte-order mark so spreadsheet tools
//! open Cyrillic text correctly; the mark is stripped again on read. Cells are
//! kept as strings and columns are addressed by header name.

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::{Result, VodaflowError};

const BOM: &str = "\u{feff}";

/// A header row plus string rows of equal width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Creates an empty table with the given headers.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builds a table from key/value rows. Headers are the union of keys in
    /// first-seen order; missing cells are empty.
    #[must_use]
    pub fn from_pairs(rows: Vec<Vec<(String, String)>>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for (key, _) in row {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let mut table = Self::new(headers);
        for row in rows {
            let cells = table
                .headers
                .iter()
                .map(|h| {
                    row.iter()
                        .find(|(k, _)| k == h)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                })
                .collect();
            table.rows.push(cells);
        }
        table
    }

    /// Parses CSV text. A leading byte-order mark is ignored and ragged rows
    /// are padded or cut to the header width.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.strip_prefix(BOM).unwrap_or(text);
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = Self::new(headers);
        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(str::to_string).collect());
        }
        Ok(table)
    }

    /// Reads a CSV file. A missing file is a [`VodaflowError::MissingInput`].
    pub fn read(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VodaflowError::missing(path));
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    /// Reads a CSV file if it exists.
    pub fn read_optional(path: &Path) -> Result<Option<Self>> {
        if path.is_file() {
            Self::read(path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Renders the table as CSV text without a byte-order mark.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| VodaflowError::Internal(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| VodaflowError::Internal(e.to_string()))
    }

    /// Writes the table, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        let body = self.to_csv_string()?;
        write_with_bom(path, body.as_bytes())
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column with exactly this header.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of the first column whose header satisfies `pred`.
    pub fn find_column(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.headers.iter().position(|h| pred(h))
    }

    /// Like [`Table::column`], but a missing column is a structure error
    /// naming `source`.
    pub fn require(&self, name: &str, source: &str) -> Result<usize> {
        self.column(name)
            .ok_or_else(|| VodaflowError::structure(source, format!("column '{name}' not found")))
    }

    /// Returns the index of `name`, appending it filled with `default` when
    /// absent.
    pub fn ensure_column(&mut self, name: &str, default: &str) -> usize {
        if let Some(index) = self.column(name) {
            return index;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
        self.headers.len() - 1
    }

    /// Removes a column if present.
    pub fn drop_column(&mut self, name: &str) {
        if let Some(index) = self.column(name) {
            self.headers.remove(index);
            for row in &mut self.rows {
                row.remove(index);
            }
        }
    }

    /// Appends a row, padding or cutting it to the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    /// Cell at `row`, `col`; empty when out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", String::as_str)
    }

    /// Overwrites a cell. Out-of-range positions are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: impl Into<String>) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value.into();
        }
    }

    /// Iterates over rows with by-name access.
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |cells| Row {
            headers: &self.headers,
            cells,
        })
    }

    /// Keeps only the rows matching `pred`.
    pub fn retain(&mut self, mut pred: impl FnMut(&[String]) -> bool) {
        self.rows.retain(|r| pred(r));
    }

    /// Sorts rows with a comparator over raw cells.
    pub fn sort_by(
        &mut self,
        compare: impl FnMut(&Vec<String>, &Vec<String>) -> std::cmp::Ordering,
    ) {
        self.rows.sort_by(compare);
    }
}

/// A borrowed row with access by header name.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    headers: &'a [String],
    cells: &'a [String],
}

impl<'a> Row<'a> {
    /// Cell under `name`, empty when the column is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> &'a str {
        self.headers
            .iter()
            .position(|h| h == name)
            .and_then(|i| self.cells.get(i))
            .map_or("", String::as_str)
    }

    /// Cell at a position, empty when out of range.
    #[must_use]
    pub fn cell(&self, index: usize) -> &'a str {
        self.cells.get(index).map_or("", String::as_str)
    }

    /// First cell.
    #[must_use]
    pub fn first(&self) -> &'a str {
        self.cell(0)
    }

    /// Last cell.
    #[must_use]
    pub fn last(&self) -> &'a str {
        self.cells.last().map_or("", String::as_str)
    }
}

/// Serializes typed records to a CSV file with a byte-order mark.
///
/// Headers come from the record's field names. An empty slice still writes
/// the header row when `headers` is given.
pub fn write_records<T: Serialize>(path: &Path, records: &[T], headers: &[&str]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(!records.is_empty())
        .from_writer(Vec::new());
    if records.is_empty() && !headers.is_empty() {
        writer.write_record(headers)?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| VodaflowError::Internal(e.to_string()))?;
    write_with_bom(path, &bytes)
}

fn write_with_bom(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(BOM.as_bytes())?;
    file.write_all(body)?;
    Ok(())
}

/// Lenient number parsing for table cells (`,` accepted as decimal point).
#[must_use]
pub fn parse_number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parses an integer id cell, accepting float renderings such as `12.0`.
#[must_use]
pub fn parse_id(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        parse_number(trimmed)
            .filter(|n| n.fract() == 0.0 && n.abs() < 9.0e15)
            .map(|n| n as i64)
    })
}
