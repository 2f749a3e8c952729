// 📤 Export Sheets - Upload sheet and original-type sheet
// The upload sheet folds every non-core column into one JSON payload; the
// original-type sheet parses that payload back next to the legacy type label.

use crate::config::PipelineConfig;
use crate::normalizer::ViolationType;
use crate::record::{Diagnostic, IncidentRecord};
use crate::table::Table;
use crate::temporal::{extract_month_day, MonthDay};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

pub const UPLOAD_SHEET: &str = "details";
pub const ORIGINAL_TYPE_SHEET: &str = "details_original_type";

// ============================================================================
// EXPORT ROW
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub employee_id: String,
    pub violation_date: String,
    pub violation_type: ViolationType,

    /// JSON object of the non-empty payload fields; empty when there are none
    pub details_json: String,
}

/// Build export rows; payload keys follow the source column order
pub fn export_rows(headers: &[String], records: &[IncidentRecord], config: &PipelineConfig) -> Vec<ExportRow> {
    let cols = &config.columns;
    let core = [&cols.employee_id, &cols.violation_date, &cols.violation_type, &cols.violation_details];

    records
        .iter()
        .map(|record| {
            let mut payload = Map::new();
            for header in headers {
                let key = header.trim();
                if core.iter().any(|c| c.as_str() == key) {
                    continue;
                }
                if key == cols.quantity {
                    payload.insert(key.to_string(), Value::from(record.quantity));
                } else if key == cols.bill_number {
                    if !record.bill_number.is_empty() {
                        payload.insert(key.to_string(), Value::from(record.bill_number.clone()));
                    }
                } else if let Some(value) = record.detail(header).filter(|v| !v.trim().is_empty()) {
                    payload.insert(key.to_string(), Value::from(value));
                }
            }

            let details_json = if payload.is_empty() {
                String::new()
            } else {
                Value::Object(payload).to_string()
            };

            ExportRow {
                employee_id: record.employee_id.clone().unwrap_or_default(),
                violation_date: record.date_string(),
                violation_type: record.violation_type.clone(),
                details_json,
            }
        })
        .collect()
}

fn core_headers(config: &PipelineConfig) -> Vec<String> {
    let cols = &config.columns;
    vec![cols.employee_id.clone(), cols.violation_date.clone(), cols.violation_type.clone()]
}

/// Upload sheet: id, date, integer type code, JSON details
pub fn upload_table(rows: &[ExportRow], config: &PipelineConfig) -> Table {
    let mut headers = core_headers(config);
    headers.push(config.columns.violation_details.clone());

    let code = config.export.violation_type_code.to_string();
    let mut table = Table::new(UPLOAD_SHEET, headers);
    for row in rows {
        table.push_row(vec![
            row.employee_id.clone(),
            row.violation_date.clone(),
            code.clone(),
            row.details_json.clone(),
        ]);
    }
    table
}

// ============================================================================
// ORIGINAL-TYPE SHEET
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationDetails {
    pub false_type: String,
    pub false_num: String,
    pub false_bill_num: String,
}

fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Parse the upload payload; an empty payload yields empty fields
pub fn parse_violation_details(json: &str, config: &PipelineConfig) -> Result<ViolationDetails, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(ViolationDetails::default());
    }

    let object: Map<String, Value> = serde_json::from_str(json)?;
    let cols = &config.columns;
    Ok(ViolationDetails {
        false_type: value_text(object.get(&cols.false_type)),
        false_num: value_text(object.get(&cols.quantity)),
        false_bill_num: value_text(object.get(&cols.bill_number)),
    })
}

/// Original-type sheet; malformed payloads leave the fields empty
pub fn original_type_table(rows: &[ExportRow], config: &PipelineConfig) -> (Table, Vec<Diagnostic>) {
    let cols = &config.columns;
    let mut headers = core_headers(config);
    headers.extend([cols.false_type.clone(), cols.quantity.clone(), cols.bill_number.clone()]);

    let mut table = Table::new(ORIGINAL_TYPE_SHEET, headers);
    let mut diagnostics = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let details = match parse_violation_details(&row.details_json, config) {
            Ok(details) => details,
            Err(e) => {
                warn!(row = i, error = %e, "Malformed violation details");
                diagnostics.push(Diagnostic::new(i, &cols.violation_details, format!("malformed JSON: {}", e)));
                ViolationDetails::default()
            }
        };

        table.push_row(vec![
            row.employee_id.clone(),
            row.violation_date.clone(),
            row.violation_type.legacy_label(&config.labels),
            details.false_type,
            details.false_num,
            details.false_bill_num,
        ]);
    }

    (table, diagnostics)
}

// ============================================================================
// FILE NAMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutputSuffix {
    /// Month/day code taken from the source file name
    FromFileName,
    /// Fixed suffix; empty means today's month/day
    Custom(String),
}

impl OutputSuffix {
    pub fn resolve(&self, source_name: &str, today: NaiveDate) -> String {
        match self {
            OutputSuffix::FromFileName => extract_month_day(source_name, today).code(),
            OutputSuffix::Custom(s) if !s.trim().is_empty() => s.trim().to_string(),
            OutputSuffix::Custom(_) => MonthDay::from_date(today).code(),
        }
    }
}

pub fn upload_file_name(prefix: &str, suffix: &str) -> String {
    format!("{}-{}.csv", prefix, suffix)
}

pub fn original_type_file_name(prefix: &str, suffix: &str) -> String {
    format!("{}-{}_{}.csv", prefix, suffix, ORIGINAL_TYPE_SHEET)
}

pub fn confirmation_file_name(prefix: &str, suffix: &str) -> String {
    format!("{}_{}.csv", prefix, suffix)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Script;

    fn headers() -> Vec<String> {
        ["Employee ID", "Violation date", "Violation type", "false_type", "false_num", "false_bill_num", "备注"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn create_test_record() -> IncidentRecord {
        IncidentRecord::new(0, Some("E1"), ViolationType::Stern(Script::Han))
            .with_date(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap())
            .with_bill("A1(2025-03-01),A2(2025-03-02)")
            .with_quantity(3)
            .with_detail("false_type", "虚假妥投")
            .with_detail("备注", "")
    }

    #[test]
    fn test_upload_table_payload() {
        let config = PipelineConfig::default();
        let rows = export_rows(&headers(), &[create_test_record()], &config);
        let table = upload_table(&rows, &config);

        assert_eq!(table.headers, vec!["Employee ID", "Violation date", "Violation type", "Violation details"]);
        assert_eq!(table.rows[0][1], "2025-03-15");
        assert_eq!(table.rows[0][2], "19");
        assert_eq!(
            table.rows[0][3],
            r#"{"false_type":"虚假妥投","false_num":3,"false_bill_num":"A1(2025-03-01),A2(2025-03-02)"}"#
        );
    }

    #[test]
    fn test_custom_type_code() {
        let mut config = PipelineConfig::default();
        config.export.violation_type_code = 7;
        let rows = export_rows(&headers(), &[create_test_record()], &config);
        assert_eq!(upload_table(&rows, &config).rows[0][2], "7");
    }

    #[test]
    fn test_original_type_table_parses_payload() {
        let config = PipelineConfig::default();
        let rows = export_rows(&headers(), &[create_test_record()], &config);
        let (table, diagnostics) = original_type_table(&rows, &config);

        assert!(diagnostics.is_empty());
        assert_eq!(table.name, ORIGINAL_TYPE_SHEET);
        assert_eq!(
            table.rows[0],
            vec!["E1", "2025-03-15", "严厉Stern", "虚假妥投", "3", "A1(2025-03-01),A2(2025-03-02)"]
        );
    }

    #[test]
    fn test_malformed_payload_is_row_diagnostic() {
        let config = PipelineConfig::default();
        let rows = vec![ExportRow {
            employee_id: "E9".to_string(),
            violation_date: String::new(),
            violation_type: ViolationType::Verbal(Script::Latin),
            details_json: "{not json".to_string(),
        }];

        let (table, diagnostics) = original_type_table(&rows, &config);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].field, "Violation details");
        assert_eq!(table.rows[0][2], "口述Verbal");
        assert_eq!(table.rows[0][3], "");
    }

    #[test]
    fn test_empty_payload() {
        let config = PipelineConfig::default();
        assert_eq!(parse_violation_details("", &config).unwrap(), ViolationDetails::default());
    }

    #[test]
    fn test_output_suffix_and_names() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 9).unwrap();
        assert_eq!(OutputSuffix::FromFileName.resolve("警告3月15日.csv", today), "0315");
        assert_eq!(OutputSuffix::Custom("batch7".to_string()).resolve("x", today), "batch7");
        assert_eq!(OutputSuffix::Custom(" ".to_string()).resolve("x", today), "0209");

        assert_eq!(upload_file_name("虚假妥投警告信", "0315"), "虚假妥投警告信-0315.csv");
        assert_eq!(confirmation_file_name("虚假类警告信确认", "0315"), "虚假类警告信确认_0315.csv");
    }
}
