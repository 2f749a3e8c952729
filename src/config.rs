// ⚙️ Pipeline Configuration - Keyword lists and labels as data
// Loaded from JSON (same approach as rule files); Default carries the built-in vocabulary.

use crate::error::{PipelineError, PipelineResult};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Bump when the keyword vocabulary changes meaning
pub const CONFIG_VERSION: u32 = 1;

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Version of the keyword vocabulary
    pub version: u32,

    pub keywords: KeywordConfig,
    pub labels: LabelConfig,
    pub columns: ColumnConfig,
    pub thresholds: Thresholds,
    pub export: ExportConfig,
    pub dispatch: DispatchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            version: CONFIG_VERSION,
            keywords: KeywordConfig::default(),
            labels: LabelConfig::default(),
            columns: ColumnConfig::default(),
            thresholds: Thresholds::default(),
            export: ExportConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load config from JSON file; missing sections fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.thresholds.exact_min_group < 2 {
            return Err(PipelineError::InvalidConfig(
                "thresholds.exact_min_group must be >= 2".to_string(),
            ));
        }
        if self.thresholds.partial_min_group < 2 {
            return Err(PipelineError::InvalidConfig(
                "thresholds.partial_min_group must be >= 2".to_string(),
            ));
        }

        let required = [
            ("keywords.stern", &self.keywords.stern),
            ("keywords.verbal", &self.keywords.verbal),
            ("keywords.do_not_send", &self.keywords.do_not_send),
            ("keywords.false_delivery", &self.keywords.false_delivery),
            ("keywords.false_marking", &self.keywords.false_marking),
        ];
        for (name, list) in required {
            if list.iter().all(|k| k.trim().is_empty()) {
                return Err(PipelineError::InvalidConfig(format!("{} must not be empty", name)));
            }
        }

        Ok(())
    }
}

// ============================================================================
// KEYWORDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Severe/stern warning synonyms (checked before verbal)
    pub stern: Vec<String>,

    /// Verbal/oral warning synonyms
    pub verbal: Vec<String>,

    /// Remark keywords meaning "do not send" for accepted appeals on false delivery
    pub do_not_send: Vec<String>,

    /// Remark keywords meaning "no warning" for accepted appeals on false marking
    pub no_warning: Vec<String>,

    /// Remark keyword selecting the stern outcome
    pub stern_remark: Vec<String>,

    /// Remark keyword selecting the verbal outcome
    pub verbal_remark: Vec<String>,

    /// Employment status: pending resignation (checked before resigned)
    pub pending_resignation: Vec<String>,
    pub resigned: Vec<String>,
    pub active: Vec<String>,

    /// Violation family keywords (type-A / type-B cascades)
    pub false_delivery: Vec<String>,
    pub false_marking: Vec<String>,

    /// Disposition note categories (exact match after trim)
    pub appeal_accepted: Vec<String>,
    pub appeal_insufficient: Vec<String>,
    pub no_appeal_or_poor_attitude: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordConfig {
    fn default() -> Self {
        KeywordConfig {
            stern: strings(&["严厉", "严重", "stern", "severe"]),
            verbal: strings(&["口述", "口头", "verbal", "oral"]),
            do_not_send: strings(&[
                "pod valid",
                "cancelled",
                "non-false",
                "no warning",
                "not send",
                "not sent",
                "no issue of warning",
            ]),
            no_warning: strings(&["no warning"]),
            stern_remark: strings(&["stern"]),
            verbal_remark: strings(&["verbal"]),
            pending_resignation: strings(&["待离职", "pending resignation"]),
            resigned: strings(&["离职", "resigned"]),
            active: strings(&["在职", "active"]),
            false_delivery: strings(&["虚假妥投", "false delivery"]),
            false_marking: strings(&["虚假标记", "false marking"]),
            appeal_accepted: strings(&["员工申诉，建议采纳", "appeal accepted"]),
            appeal_insufficient: strings(&["员工申诉，理由不充分", "appeal insufficient"]),
            no_appeal_or_poor_attitude: strings(&[
                "员工未申诉，或态度不好",
                "no appeal or poor attitude",
            ]),
        }
    }
}

// ============================================================================
// LABELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    pub han_stern: String,
    pub han_verbal: String,
    pub latin_stern: String,
    pub latin_verbal: String,

    /// Bilingual labels written to the original-type sheet
    pub legacy_stern: String,
    pub legacy_verbal: String,

    pub unknown: String,

    /// Family labels written back to the confirmation sheet
    pub false_delivery: String,
    pub false_marking: String,

    pub not_sent: String,
    pub disposition_verbal: String,
    pub disposition_stern: String,
    pub stern_manual_recheck: String,
    pub manual_recheck: String,

    pub bulk: String,
    pub single: String,
    pub bulk_with_recheck: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig {
            han_stern: "严厉警告".to_string(),
            han_verbal: "口述警告".to_string(),
            latin_stern: "Stern Reminder".to_string(),
            latin_verbal: "Verbal Warning".to_string(),
            legacy_stern: "严厉Stern".to_string(),
            legacy_verbal: "口述Verbal".to_string(),
            unknown: "unknown".to_string(),
            false_delivery: "虚假妥投".to_string(),
            false_marking: "虚假标记".to_string(),
            not_sent: "不发出NotSent".to_string(),
            disposition_verbal: "口述Verbal".to_string(),
            disposition_stern: "严厉Stern".to_string(),
            stern_manual_recheck: "严厉Stern-Manual Recheck".to_string(),
            manual_recheck: "Manual Recheck".to_string(),
            bulk: "Bulk Send".to_string(),
            single: "Single Send".to_string(),
            bulk_with_recheck: "Bulk Send-Manual Recheck".to_string(),
        }
    }
}

// ============================================================================
// COLUMNS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    // Incident (details) table
    pub employee_id: String,
    pub violation_date: String,
    pub violation_type: String,
    pub quantity: String,
    pub bill_number: String,
    pub false_type: String,
    pub violation_details: String,

    // Reference / original-type table
    pub reference_bill_number: String,
    pub reference_type: String,

    // Confirmation table
    pub confirm_type: String,
    pub confirm_detail: String,
    pub confirm_status: String,
    pub confirm_note: String,
    pub confirm_remark: String,
    pub confirm_waybill: String,
    pub confirm_prior_type: String,
    pub confirm_disposition: String,
    pub confirm_delivery: String,

    /// Pattern extracting the bill number from the detail text
    pub detail_bill_pattern: String,

    pub report: ReportColumns,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        ColumnConfig {
            employee_id: "Employee ID".to_string(),
            violation_date: "Violation date".to_string(),
            violation_type: "Violation type".to_string(),
            quantity: "false_num".to_string(),
            bill_number: "false_bill_num".to_string(),
            false_type: "false_type".to_string(),
            violation_details: "Violation details".to_string(),
            reference_bill_number: "false_bill_num".to_string(),
            reference_type: "Violation type".to_string(),
            confirm_type: "违规类型".to_string(),
            confirm_detail: "违规详情".to_string(),
            confirm_status: "在职状态".to_string(),
            confirm_note: "处理意见".to_string(),
            confirm_remark: "处理备注".to_string(),
            confirm_waybill: "辅助列-Waybill".to_string(),
            confirm_prior_type: "辅助1".to_string(),
            confirm_disposition: "警告信发出建议".to_string(),
            confirm_delivery: "发送方式".to_string(),
            detail_bill_pattern: r"(?i)虚假单号:(.*?);".to_string(),
            report: ReportColumns::default(),
        }
    }
}

/// Header keywords used to locate report columns (first contained keyword wins)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportColumns {
    pub id: Vec<String>,
    pub name: Vec<String>,
    pub warning_type: Vec<String>,
    pub area: Vec<String>,
    pub district: Vec<String>,
    pub branch: Vec<String>,
    pub ops: Vec<String>,
    pub position: Vec<String>,
    pub status: Vec<String>,
    pub employment_type: Vec<String>,
    pub sending_status: Vec<String>,
}

impl Default for ReportColumns {
    fn default() -> Self {
        ReportColumns {
            id: strings(&["staff id", "工号"]),
            name: strings(&["staff name", "姓名"]),
            warning_type: strings(&["warning type", "warning letter", "警告类型"]),
            area: strings(&["area", "大区"]),
            district: strings(&["district", "片区"]),
            branch: strings(&["branch", "网点"]),
            ops: strings(&["ops", "部门"]),
            position: strings(&["position", "职位"]),
            status: strings(&["work status", "在职状态"]),
            employment_type: strings(&["employment", "雇佣类型"]),
            sending_status: strings(&["sending status", "发送状态"]),
        }
    }
}

// ============================================================================
// THRESHOLDS / EXPORT / DISPATCH
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum group size for the exact (employee, date, type) merge
    pub exact_min_group: usize,

    /// Minimum group size for the partial (employee, type) merge + escalation
    pub partial_min_group: usize,

    /// Number of branches in the textual top-N narrative
    pub top_branches: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            exact_min_group: 2,
            partial_min_group: 3,
            top_branches: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Output file name prefix for the upload sheet
    pub prefix: String,

    /// Integer code written to the upload sheet's violation type column
    pub violation_type_code: i64,

    /// Columns removed from the confirmation output (privacy)
    pub drop_columns: Vec<String>,

    /// Output file name prefix for the confirmation sheet
    pub confirm_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            prefix: "虚假妥投警告信".to_string(),
            violation_type_code: 19,
            drop_columns: strings(&["电话"]),
            confirm_prefix: "虚假类警告信确认".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub subject_prefix: String,
    pub cc: Vec<String>,
    pub body_prefix: String,
    pub body_suffix: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.thresholds.exact_min_group, 2);
        assert_eq!(config.thresholds.partial_min_group, 3);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let json = r#"{ "thresholds": { "partial_min_group": 4 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.thresholds.partial_min_group, 4);
        assert_eq!(config.thresholds.exact_min_group, 2);
        assert_eq!(config.labels.latin_stern, "Stern Reminder");
    }

    #[test]
    fn test_rejects_single_member_threshold() {
        let mut config = PipelineConfig::default();
        config.thresholds.partial_min_group = 1;
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_empty_keyword_set() {
        let mut config = PipelineConfig::default();
        config.keywords.stern = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "dispatch": {{ "subject_prefix": "Warnings" }} }}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dispatch.subject_prefix, "Warnings");
    }
}
