// 🏷️ Disposition Rules - Cascades as Data
// Each violation family has an ordered rule list; the first matching rule decides
// the warning-letter recommendation and its delivery mode.

use crate::config::{ColumnConfig, KeywordConfig, LabelConfig, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::normalizer::{
    contains_any, detect_violation_family, normalize_employment_status, normalize_note_category,
    EmploymentStatus, NoteCategory, ViolationFamily, ViolationType, WarningCategory,
};
use crate::record::ReferenceRecord;
use crate::table::Table;
use anyhow::{Context as AnyhowContext, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    NotSent,
    Verbal,
    Stern,
    SternManualRecheck,
    ManualRecheck,
}

impl Disposition {
    pub fn label<'a>(&self, labels: &'a LabelConfig) -> &'a str {
        match self {
            Disposition::NotSent => &labels.not_sent,
            Disposition::Verbal => &labels.disposition_verbal,
            Disposition::Stern => &labels.disposition_stern,
            Disposition::SternManualRecheck => &labels.stern_manual_recheck,
            Disposition::ManualRecheck => &labels.manual_recheck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryMode {
    Bulk,
    Single,
    BulkWithRecheck,
}

impl DeliveryMode {
    pub fn label<'a>(&self, labels: &'a LabelConfig) -> &'a str {
        match self {
            DeliveryMode::Bulk => &labels.bulk,
            DeliveryMode::Single => &labels.single,
            DeliveryMode::BulkWithRecheck => &labels.bulk_with_recheck,
        }
    }
}

// ============================================================================
// CONFIRMATION RECORD
// ============================================================================

/// One row of the confirmation sheet, normalized for rule matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub row: usize,
    pub family: ViolationFamily,
    pub status: EmploymentStatus,
    pub note: NoteCategory,
    pub remark: String,

    /// Bill number extracted from the detail text
    pub bill_number: Option<String>,

    /// Type of the same bill in the original-type sheet (type-A only)
    pub prior_type: Option<ViolationType>,
}

/// Bill number → original violation type; later rows overwrite earlier ones
#[derive(Debug, Clone, Default)]
pub struct PriorTypeLookup {
    types: HashMap<String, ViolationType>,
}

impl PriorTypeLookup {
    pub fn from_references(references: &[ReferenceRecord]) -> Self {
        let types = references
            .iter()
            .map(|r| (r.bill_number.clone(), r.prior_type.clone()))
            .collect();
        PriorTypeLookup { types }
    }

    pub fn get(&self, bill: &str) -> Option<&ViolationType> {
        self.types.get(bill.trim())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

// ============================================================================
// CONDITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Condition {
    EmploymentStatusIn(Vec<EmploymentStatus>),
    NoteIs(NoteCategory),
    NoteIn(Vec<NoteCategory>),
    /// Case-insensitive containment in the remark
    RemarkContainsAny(Vec<String>),
    PriorTypeIs(WarningCategory),
    All(Vec<Condition>),
    Always,
}

impl Condition {
    pub fn matches(&self, record: &ConfirmationRecord) -> bool {
        match self {
            Condition::EmploymentStatusIn(statuses) => statuses.contains(&record.status),
            Condition::NoteIs(note) => record.note == *note,
            Condition::NoteIn(notes) => notes.contains(&record.note),
            Condition::RemarkContainsAny(keywords) => contains_any(&record.remark, keywords),
            Condition::PriorTypeIs(category) => record
                .prior_type
                .as_ref()
                .map(|t| t.category() == *category)
                .unwrap_or(false),
            Condition::All(conditions) => conditions.iter().all(|c| c.matches(record)),
            Condition::Always => true,
        }
    }
}

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispositionRule {
    /// Rule ID for tracking
    pub id: String,
    pub condition: Condition,
    pub disposition: Disposition,
    pub delivery: DeliveryMode,
}

impl DispositionRule {
    pub fn new(id: &str, condition: Condition, disposition: Disposition, delivery: DeliveryMode) -> Self {
        DispositionRule {
            id: id.to_string(),
            condition,
            disposition,
            delivery,
        }
    }
}

/// Progress of the fold over a cascade
enum Verdict<'a> {
    Pending,
    Decided(&'a DispositionRule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cascade {
    pub rules: Vec<DispositionRule>,
}

impl Cascade {
    pub fn new(rules: Vec<DispositionRule>) -> Self {
        Cascade { rules }
    }

    /// Type-A (false delivery)
    pub fn false_delivery(keywords: &KeywordConfig) -> Self {
        use Condition::*;
        let left = EmploymentStatusIn(vec![EmploymentStatus::Resigned, EmploymentStatus::PendingResignation]);
        let stern_no_appeal = |prior| {
            All(vec![
                NoteIs(NoteCategory::NoAppealOrPoorAttitude),
                RemarkContainsAny(keywords.stern_remark.clone()),
                PriorTypeIs(prior),
            ])
        };

        Cascade::new(vec![
            DispositionRule::new("a1-resigned", left, Disposition::NotSent, DeliveryMode::Bulk),
            DispositionRule::new(
                "a2-appeal-accepted-no-send",
                All(vec![
                    NoteIs(NoteCategory::AppealAccepted),
                    RemarkContainsAny(keywords.do_not_send.clone()),
                ]),
                Disposition::NotSent,
                DeliveryMode::Bulk,
            ),
            DispositionRule::new(
                "a2-appeal-accepted-recheck",
                NoteIs(NoteCategory::AppealAccepted),
                Disposition::ManualRecheck,
                DeliveryMode::Single,
            ),
            DispositionRule::new(
                "a3-insufficient-verbal",
                All(vec![
                    NoteIs(NoteCategory::AppealInsufficient),
                    RemarkContainsAny(keywords.verbal_remark.clone()),
                ]),
                Disposition::Verbal,
                DeliveryMode::Bulk,
            ),
            DispositionRule::new(
                "a3-insufficient-recheck",
                NoteIs(NoteCategory::AppealInsufficient),
                Disposition::ManualRecheck,
                DeliveryMode::Single,
            ),
            DispositionRule::new(
                "a4-stern-prior-verbal",
                stern_no_appeal(WarningCategory::Verbal),
                Disposition::Verbal,
                DeliveryMode::Single,
            ),
            DispositionRule::new(
                "a4-stern-prior-stern",
                stern_no_appeal(WarningCategory::Stern),
                Disposition::SternManualRecheck,
                DeliveryMode::BulkWithRecheck,
            ),
            DispositionRule::new(
                "a4-no-appeal-recheck",
                NoteIs(NoteCategory::NoAppealOrPoorAttitude),
                Disposition::ManualRecheck,
                DeliveryMode::Single,
            ),
            DispositionRule::new("a5-fallback", Always, Disposition::ManualRecheck, DeliveryMode::Single),
        ])
    }

    /// Type-B (false marking)
    pub fn false_marking(keywords: &KeywordConfig) -> Self {
        use Condition::*;
        let contested = NoteIn(vec![NoteCategory::NoAppealOrPoorAttitude, NoteCategory::AppealInsufficient]);

        Cascade::new(vec![
            DispositionRule::new(
                "b1-appeal-accepted-no-warning",
                All(vec![
                    NoteIs(NoteCategory::AppealAccepted),
                    RemarkContainsAny(keywords.no_warning.clone()),
                ]),
                Disposition::NotSent,
                DeliveryMode::Bulk,
            ),
            DispositionRule::new(
                "b2-stern",
                All(vec![contested.clone(), RemarkContainsAny(keywords.stern_remark.clone())]),
                Disposition::Stern,
                DeliveryMode::Bulk,
            ),
            DispositionRule::new(
                "b3-verbal",
                All(vec![contested, RemarkContainsAny(keywords.verbal_remark.clone())]),
                Disposition::Verbal,
                DeliveryMode::Bulk,
            ),
            DispositionRule::new("b4-fallback", Always, Disposition::ManualRecheck, DeliveryMode::Single),
        ])
    }

    /// Unrecognized families
    pub fn fallback() -> Self {
        Cascade::new(vec![DispositionRule::new(
            "fallback",
            Condition::Always,
            Disposition::ManualRecheck,
            DeliveryMode::Single,
        )])
    }

    /// A cascade must end with an unconditional rule
    pub fn validate(&self, name: &str) -> PipelineResult<()> {
        match self.rules.last() {
            Some(rule) if rule.condition == Condition::Always => Ok(()),
            _ => Err(PipelineError::InvalidConfig(format!(
                "cascade '{}' must end with an 'always' rule",
                name
            ))),
        }
    }

    /// First matching rule
    pub fn decide(&self, record: &ConfirmationRecord) -> Option<&DispositionRule> {
        let verdict = self.rules.iter().fold(Verdict::Pending, |verdict, rule| match verdict {
            Verdict::Pending if rule.condition.matches(record) => Verdict::Decided(rule),
            decided => decided,
        });

        match verdict {
            Verdict::Decided(rule) => Some(rule),
            Verdict::Pending => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeSet {
    pub false_delivery: Cascade,
    pub false_marking: Cascade,
    pub unrecognized: Cascade,
}

impl CascadeSet {
    pub fn from_keywords(keywords: &KeywordConfig) -> Self {
        CascadeSet {
            false_delivery: Cascade::false_delivery(keywords),
            false_marking: Cascade::false_marking(keywords),
            unrecognized: Cascade::fallback(),
        }
    }

    /// Load cascades from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file: {:?}", path.as_ref()))?;

        let set: CascadeSet = serde_json::from_str(&content).context("Failed to parse rules JSON")?;
        set.validate()?;
        Ok(set)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.false_delivery.validate("false_delivery")?;
        self.false_marking.validate("false_marking")?;
        self.unrecognized.validate("unrecognized")
    }

    pub fn for_family(&self, family: ViolationFamily) -> &Cascade {
        match family {
            ViolationFamily::FalseDelivery => &self.false_delivery,
            ViolationFamily::FalseMarking => &self.false_marking,
            ViolationFamily::Unrecognized => &self.unrecognized,
        }
    }
}

// ============================================================================
// CLASSIFICATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub record: ConfirmationRecord,
    pub disposition: Disposition,
    pub delivery: DeliveryMode,
    pub rule_id: String,
}

#[derive(Debug, Clone)]
pub struct ClassificationRun {
    /// Confirmation sheet plus the helper and recommendation columns
    pub table: Table,
    pub records: Vec<ClassifiedRecord>,

    /// Decisions per rule id
    pub rule_hits: BTreeMap<String, usize>,

    /// Type-A rows whose bill has no original type
    pub lookup_misses: usize,
}

impl ClassificationRun {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.records.iter().filter(|r| r.disposition == disposition).count()
    }
}

// ============================================================================
// DISPOSITION ENGINE
// ============================================================================

pub struct DispositionEngine {
    cascades: CascadeSet,
    keywords: KeywordConfig,
    labels: LabelConfig,
    columns: ColumnConfig,
    drop_columns: Vec<String>,
    bill_pattern: Regex,
}

impl DispositionEngine {
    /// Engine with the built-in cascades
    pub fn new(config: &PipelineConfig) -> PipelineResult<Self> {
        Self::with_cascades(config, CascadeSet::from_keywords(&config.keywords))
    }

    pub fn with_cascades(config: &PipelineConfig, cascades: CascadeSet) -> PipelineResult<Self> {
        cascades.validate()?;
        let bill_pattern = Regex::new(&config.columns.detail_bill_pattern).map_err(|e| {
            PipelineError::InvalidConfig(format!("columns.detail_bill_pattern: {}", e))
        })?;

        Ok(DispositionEngine {
            cascades,
            keywords: config.keywords.clone(),
            labels: config.labels.clone(),
            columns: config.columns.clone(),
            drop_columns: config.export.drop_columns.clone(),
            bill_pattern,
        })
    }

    /// Bill number from the detail text (`虚假单号:<bill>;`)
    pub fn extract_bill(&self, detail: &str) -> Option<String> {
        self.bill_pattern
            .captures(detail)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    /// Classify every row of the confirmation sheet
    pub fn classify(&self, table: &Table, prior_types: &PriorTypeLookup) -> PipelineResult<ClassificationRun> {
        let cols = &self.columns;
        let type_idx = table.require_column(&cols.confirm_type)?;
        let detail_idx = table.require_column(&cols.confirm_detail)?;
        let status_idx = table.require_column(&cols.confirm_status)?;
        let note_idx = table.require_column(&cols.confirm_note)?;
        let remark_idx = table.require_column(&cols.confirm_remark)?;

        let mut records = Vec::with_capacity(table.len());
        let mut rule_hits: BTreeMap<String, usize> = BTreeMap::new();
        let mut lookup_misses = 0;

        for (row, cells) in table.rows.iter().enumerate() {
            let family = detect_violation_family(table.cell(cells, type_idx), &self.keywords);
            let bill_number = self.extract_bill(table.cell(cells, detail_idx));

            let prior_type = match (family, &bill_number) {
                (ViolationFamily::FalseDelivery, Some(bill)) => {
                    let found = prior_types.get(bill).cloned();
                    if found.is_none() {
                        lookup_misses += 1;
                        debug!(row, bill = %bill, "No original type for bill");
                    }
                    found
                }
                (ViolationFamily::FalseDelivery, None) => {
                    lookup_misses += 1;
                    debug!(row, "No bill number in violation detail");
                    None
                }
                _ => None,
            };

            let record = ConfirmationRecord {
                row,
                family,
                status: normalize_employment_status(Some(table.cell(cells, status_idx)), &self.keywords),
                note: normalize_note_category(table.cell(cells, note_idx), &self.keywords),
                remark: table.cell(cells, remark_idx).to_string(),
                bill_number,
                prior_type,
            };

            let classified = match self.cascades.for_family(family).decide(&record) {
                Some(rule) => ClassifiedRecord {
                    disposition: rule.disposition,
                    delivery: rule.delivery,
                    rule_id: rule.id.clone(),
                    record,
                },
                None => ClassifiedRecord {
                    disposition: Disposition::ManualRecheck,
                    delivery: DeliveryMode::Single,
                    rule_id: "fallback".to_string(),
                    record,
                },
            };

            debug!(row, rule = %classified.rule_id, "Disposition decided");
            *rule_hits.entry(classified.rule_id.clone()).or_insert(0) += 1;
            records.push(classified);
        }

        info!(
            rows = records.len(),
            lookup_misses,
            rules = rule_hits.len(),
            "Classification done"
        );

        let table = self.render(table, type_idx, &records);
        Ok(ClassificationRun {
            table,
            records,
            rule_hits,
            lookup_misses,
        })
    }

    fn render(&self, source: &Table, type_idx: usize, records: &[ClassifiedRecord]) -> Table {
        let type_header = source.headers[type_idx].clone();
        let base = source.without_columns(&self.drop_columns);
        let type_idx = base.column_index(type_header.trim());

        let mut headers = base.headers.clone();
        headers.extend([
            self.columns.confirm_waybill.clone(),
            self.columns.confirm_prior_type.clone(),
            self.columns.confirm_disposition.clone(),
            self.columns.confirm_delivery.clone(),
        ]);

        let mut table = Table::new(source.name.clone(), headers);
        for (cells, classified) in base.rows.iter().zip(records) {
            let mut row: Vec<String> = (0..base.headers.len()).map(|i| base.cell(cells, i).to_string()).collect();

            let family_label = match classified.record.family {
                ViolationFamily::FalseDelivery => Some(&self.labels.false_delivery),
                ViolationFamily::FalseMarking => Some(&self.labels.false_marking),
                ViolationFamily::Unrecognized => None,
            };
            if let (Some(i), Some(label)) = (type_idx, family_label) {
                row[i] = label.clone();
            }

            row.push(classified.record.bill_number.clone().unwrap_or_default());
            row.push(
                classified
                    .record
                    .prior_type
                    .as_ref()
                    .map(|t| t.legacy_label(&self.labels))
                    .unwrap_or_default(),
            );
            row.push(classified.disposition.label(&self.labels).to_string());
            row.push(classified.delivery.label(&self.labels).to_string());
            table.push_row(row);
        }

        table
    }
}

// ============================================================================
// TESTS
// ============================================================================
