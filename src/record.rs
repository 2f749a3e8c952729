// 🧾 Incident Records - typed view over the details table
// Core fields are typed, every other column rides along as the detail payload.

use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::normalizer::{normalize_violation_type, ViolationType};
use crate::table::Table;
use crate::temporal::parse_date;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ============================================================================
// INCIDENT RECORD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeKind {
    Untouched,
    /// Same employee, date and type
    Exact,
    /// Same employee and type, 3+ records, type escalated
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// 0-based row in the input table
    pub row: usize,

    pub employee_id: Option<String>,
    pub violation_date: Option<NaiveDate>,
    pub violation_type: ViolationType,

    /// Bill/document number; comma-joined after a merge
    pub bill_number: String,

    /// Additive incident count
    pub quantity: i64,

    /// Every non-core column, in input order
    pub details: Vec<(String, String)>,

    /// Input rows this record stands for
    pub sources: Vec<usize>,

    pub merge: MergeKind,
}

impl IncidentRecord {
    pub fn new(row: usize, employee_id: Option<&str>, violation_type: ViolationType) -> Self {
        IncidentRecord {
            row,
            employee_id: employee_id.map(|s| s.to_string()),
            violation_date: None,
            violation_type,
            bill_number: String::new(),
            quantity: 0,
            details: Vec::new(),
            sources: vec![row],
            merge: MergeKind::Untouched,
        }
    }

    /// Builder pattern: violation date
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.violation_date = Some(date);
        self
    }

    /// Builder pattern: bill number
    pub fn with_bill(mut self, bill: &str) -> Self {
        self.bill_number = bill.to_string();
        self
    }

    /// Builder pattern: quantity
    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = quantity;
        self
    }

    /// Builder pattern: add a detail field
    pub fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.push((key.to_string(), value.to_string()));
        self
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// ISO date or empty string
    pub fn date_string(&self) -> String {
        self.violation_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

/// Row-level problem, recovered locally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub row: usize,
    pub field: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(row: usize, field: &str, message: impl Into<String>) -> Self {
        Diagnostic {
            row,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedIncidents {
    /// Header order of the source table, reused when writing output
    pub headers: Vec<String>,
    pub records: Vec<IncidentRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed)
    }
}

/// Quantity cell: integers, or floats with no fractional part ("2.0")
fn parse_quantity(raw: &str) -> Result<i64, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(0);
    }
    if let Ok(n) = value.parse::<i64>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(format!("unparseable quantity '{}'", value)),
    }
}

/// Parse the details table; violation types are normalized on the way in
///
/// Missing required columns abort; bad cells become diagnostics.
pub fn parse_incidents(table: &Table, config: &PipelineConfig) -> PipelineResult<ParsedIncidents> {
    let cols = &config.columns;
    let id_idx = table.require_column(&cols.employee_id)?;
    let date_idx = table.require_column(&cols.violation_date)?;
    let type_idx = table.require_column(&cols.violation_type)?;
    let qty_idx = table.require_column(&cols.quantity)?;
    let bill_idx = table.require_column(&cols.bill_number)?;
    let core = [id_idx, date_idx, type_idx, qty_idx, bill_idx];

    let mut records = Vec::with_capacity(table.len());
    let mut diagnostics = Vec::new();

    for (row, cells) in table.rows.iter().enumerate() {
        let raw_type = table.cell(cells, type_idx);
        let violation_type =
            normalize_violation_type(Some(raw_type), &config.keywords, &config.labels);

        let mut record = IncidentRecord::new(row, non_empty(table.cell(cells, id_idx)), violation_type)
            .with_bill(table.cell(cells, bill_idx).trim());

        let raw_date = table.cell(cells, date_idx);
        match parse_date(raw_date) {
            Some(date) => record = record.with_date(date),
            None if raw_date.trim().is_empty() => {}
            None => {
                let d = Diagnostic::new(row, &cols.violation_date, format!("unparseable date '{}'", raw_date.trim()));
                warn!(row, field = %d.field, "{}", d.message);
                diagnostics.push(d);
            }
        }

        match parse_quantity(table.cell(cells, qty_idx)) {
            Ok(quantity) => record = record.with_quantity(quantity),
            Err(message) => {
                warn!(row, field = %cols.quantity, "{}", message);
                diagnostics.push(Diagnostic::new(row, &cols.quantity, message));
            }
        }

        for (i, header) in table.headers.iter().enumerate() {
            if !core.contains(&i) {
                record = record.with_detail(header, table.cell(cells, i));
            }
        }

        records.push(record);
    }

    Ok(ParsedIncidents {
        headers: table.headers.clone(),
        records,
        diagnostics,
    })
}

/// Render records back into the source table's column layout
pub fn incidents_to_table(
    name: &str,
    headers: &[String],
    records: &[IncidentRecord],
    config: &PipelineConfig,
) -> Table {
    let cols = &config.columns;
    let mut table = Table::new(name, headers.to_vec());

    for record in records {
        let row = headers
            .iter()
            .map(|header| {
                let h = header.trim();
                if h == cols.employee_id {
                    record.employee_id.clone().unwrap_or_default()
                } else if h == cols.violation_date {
                    record.date_string()
                } else if h == cols.violation_type {
                    record.violation_type.label(&config.labels)
                } else if h == cols.quantity {
                    record.quantity.to_string()
                } else if h == cols.bill_number {
                    record.bill_number.clone()
                } else {
                    record.detail(header).unwrap_or("").to_string()
                }
            })
            .collect();
        table.push_row(row);
    }

    table
}

// ============================================================================
// REFERENCE RECORD
// ============================================================================

/// Entry of the authoritative (auxiliary / original-type) table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub bill_number: String,
    pub prior_type: ViolationType,
}

/// `None` when the table has no bill column; the type column is optional
pub fn parse_references(
    table: &Table,
    bill_column: &str,
    type_column: &str,
    config: &PipelineConfig,
) -> Option<Vec<ReferenceRecord>> {
    let bill_idx = table.column_index(bill_column)?;
    let type_idx = table.column_index(type_column);

    let records = table
        .rows
        .iter()
        .filter_map(|cells| {
            let bill = non_empty(table.cell(cells, bill_idx))?;
            let prior_type = match type_idx {
                Some(i) => normalize_violation_type(Some(table.cell(cells, i)), &config.keywords, &config.labels),
                None => ViolationType::Unknown,
            };
            Some(ReferenceRecord {
                bill_number: bill.to_string(),
                prior_type,
            })
        })
        .collect();

    Some(records)
}

// ============================================================================
// TESTS
// ============================================================================
