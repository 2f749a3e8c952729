// 📋 Tabular Data - the neutral table shape every stage reads and writes
// A table is a named header row plus string cells; CSV is the on-disk encoding.

use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Logical table name (sheet name in the surrounding system)
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Table {
            name: name.into(),
            headers,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Vec<String>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a header (exact match after trim)
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Like `column_index`, but a missing column is an input-shape error
    pub fn require_column(&self, column: &str) -> PipelineResult<usize> {
        self.column_index(column)
            .ok_or_else(|| PipelineError::missing_column(&self.name, column))
    }

    /// A table without a header row was never really supplied (empty file or body)
    pub fn require_headers(&self) -> PipelineResult<&Self> {
        if self.headers.iter().all(|h| h.trim().is_empty()) {
            return Err(PipelineError::MissingTable(self.name.clone()));
        }
        Ok(self)
    }

    /// Cell value, empty string for short rows
    pub fn cell<'a>(&'a self, row: &'a [String], index: usize) -> &'a str {
        row.get(index).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Copy of this table without the named columns (unknown names are ignored)
    pub fn without_columns(&self, columns: &[String]) -> Table {
        let keep: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !columns.iter().any(|c| c.trim() == h.trim()))
            .map(|(i, _)| i)
            .collect();

        Table {
            name: self.name.clone(),
            headers: keep.iter().map(|&i| self.headers[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| keep.iter().map(|&i| self.cell(row, i).to_string()).collect())
                .collect(),
        }
    }
}

// ============================================================================
// CSV ENCODING
// ============================================================================

/// Read a table from any CSV source; short rows are allowed (flexible)
pub fn read_csv<R: Read>(name: &str, reader: R) -> PipelineResult<Table> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut table = Table::new(name, headers);
    for result in rdr.records() {
        let record = result?;
        table.push_row(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(table)
}

pub fn write_csv<W: Write>(table: &Table, writer: W) -> PipelineResult<()> {
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Load a CSV file; the table is named after the file stem
pub fn load_table(path: &Path) -> Result<Table> {
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("table")
        .to_string();

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;

    read_csv(&name, file).with_context(|| format!("Failed to parse CSV table: {}", path.display()))
}

pub fn save_table(table: &Table, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    write_csv(table, file).with_context(|| format!("Failed to write CSV table: {}", path.display()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(
            "details",
            vec!["Employee ID".to_string(), "电话".to_string(), "false_num".to_string()],
        )
        .with_rows(vec![
            vec!["E1".to_string(), "123".to_string(), "1".to_string()],
            vec!["E2".to_string(), "456".to_string(), "2".to_string()],
        ])
    }

    #[test]
    fn test_require_column_reports_table_name() {
        let table = sample();
        assert_eq!(table.require_column("false_num").unwrap(), 2);

        let err = table.require_column("Violation date").unwrap_err();
        assert!(err.to_string().contains("'details'"));
        assert!(err.to_string().contains("'Violation date'"));
    }

    #[test]
    fn test_without_columns_drops_privacy_field() {
        let table = sample().without_columns(&["电话".to_string()]);
        assert_eq!(table.headers, vec!["Employee ID", "false_num"]);
        assert_eq!(table.rows[1], vec!["E2", "2"]);
    }

    #[test]
    fn test_read_csv_strips_bom_and_allows_short_rows() {
        let data = "\u{feff}Employee ID,false_num\nE1,3\nE2\n";
        let table = read_csv("details", data.as_bytes()).unwrap();

        assert_eq!(table.headers[0], "Employee ID");
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(&table.rows[1], 1), "");
    }

    #[test]
    fn test_csv_write_then_read() {
        let table = sample();
        let mut buffer = Vec::new();
        write_csv(&table, &mut buffer).unwrap();

        let back = read_csv("details", buffer.as_slice()).unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_empty_input_is_missing_table() {
        let table = read_csv("auxiliary", "".as_bytes()).unwrap();
        let err = table.require_headers().unwrap_err();
        assert!(matches!(err, PipelineError::MissingTable(ref name) if name == "auxiliary"));
        assert!(err.is_input_shape());

        assert!(sample().require_headers().is_ok());
    }
}
