// 🔄 Pipelines - end-to-end runs over whole tables
// Each run is a chain of immutable stages; the config value is passed to every one.

use crate::config::PipelineConfig;
use crate::consolidation::{Consolidator, MergeDecision};
use crate::db::Event;
use crate::deduplication::{DeduplicationEngine, ReferenceSet};
use crate::error::{PipelineError, PipelineResult};
use crate::export::{export_rows, original_type_table, upload_table, ExportRow};
use crate::record::{incidents_to_table, parse_incidents, parse_references, Diagnostic};
use crate::report::{build_unit_report, preprocess_report_table, split_units, tally_warnings, ColumnMap, UnitReport};
use crate::rules::{ClassificationRun, DispositionEngine, PriorTypeLookup};
use crate::table::Table;
use chrono::{Local, NaiveDate};
use serde_json::{json, Value};
use tracing::{info, warn};

// ============================================================================
// CONSOLIDATION RUN
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConsolidationRun {
    /// Consolidated incidents in the source column layout
    pub consolidated: Table,
    pub upload: Table,
    pub original_type: Table,
    pub export_rows: Vec<ExportRow>,

    pub input_rows: usize,
    /// Source rows dropped because their bill was already known
    pub removed: Vec<usize>,
    pub exact: usize,
    pub partial: usize,
    pub untouched: usize,
    pub decisions: Vec<MergeDecision>,
    pub diagnostics: Vec<Diagnostic>,
}

impl ConsolidationRun {
    pub fn summary_json(&self) -> Value {
        json!({
            "input_rows": self.input_rows,
            "removed": self.removed.len(),
            "exact_merges": self.exact,
            "partial_merges": self.partial,
            "untouched": self.untouched,
            "output_rows": self.consolidated.len(),
            "diagnostics": self.diagnostics.len(),
        })
    }

    /// Audit trail: one event per merge decision and per diagnostic
    pub fn audit_events(&self, run_id: &str) -> Vec<Event> {
        let merges = self.decisions.iter().map(|d| {
            let data = serde_json::to_value(d).unwrap_or(Value::Null);
            Event::new(run_id, "merge", &d.employee_id, data)
        });
        let removals = self
            .removed
            .iter()
            .map(|row| Event::new(run_id, "known_bill_removed", &row.to_string(), json!({ "row": row })));
        let diagnostics = self.diagnostics.iter().map(|d| diagnostic_event(run_id, d));

        merges.chain(removals).chain(diagnostics).collect()
    }
}

fn diagnostic_event(run_id: &str, diagnostic: &Diagnostic) -> Event {
    let data = serde_json::to_value(diagnostic).unwrap_or(Value::Null);
    Event::new(run_id, "diagnostic", &diagnostic.row.to_string(), data)
}

/// Consolidate a details table as of today
pub fn consolidate_workbook(
    details: &Table,
    auxiliary: Option<&Table>,
    source_name: &str,
    config: &PipelineConfig,
) -> PipelineResult<ConsolidationRun> {
    consolidate_workbook_at(details, auxiliary, source_name, config, Local::now().date_naive())
}

/// Parse, drop known bills, merge, then build the export sheets
///
/// `today` is the fallback for month/day and year when the source gives none.
pub fn consolidate_workbook_at(
    details: &Table,
    auxiliary: Option<&Table>,
    source_name: &str,
    config: &PipelineConfig,
    today: NaiveDate,
) -> PipelineResult<ConsolidationRun> {
    config.validate()?;
    details.require_headers()?;
    if let Some(aux) = auxiliary {
        aux.require_headers()?;
    }
    let parsed = parse_incidents(details, config)?;

    let reference = auxiliary.and_then(|aux| {
        let set = ReferenceSet::from_table(aux, &config.columns.reference_bill_number);
        if set.is_none() {
            warn!(
                table = %aux.name,
                column = %config.columns.reference_bill_number,
                "Auxiliary table has no bill column, deduplication skipped"
            );
        }
        set
    });
    let dedup = DeduplicationEngine::new().remove_known(&parsed.records, reference.as_ref());

    let consolidation = Consolidator::from_thresholds(&config.thresholds, today).consolidate(&dedup.kept, source_name);

    let consolidated = incidents_to_table(&details.name, &parsed.headers, &consolidation.records, config);
    let rows = export_rows(&parsed.headers, &consolidation.records, config);
    let upload = upload_table(&rows, config);
    let (original_type, export_diagnostics) = original_type_table(&rows, config);

    let mut diagnostics = parsed.diagnostics;
    diagnostics.extend(export_diagnostics);

    info!(
        source = %source_name,
        input = details.len(),
        removed = dedup.removed.len(),
        exact = consolidation.exact,
        partial = consolidation.partial,
        output = consolidation.records.len(),
        diagnostics = diagnostics.len(),
        "Consolidation run complete"
    );

    Ok(ConsolidationRun {
        consolidated,
        upload,
        original_type,
        export_rows: rows,
        input_rows: details.len(),
        removed: dedup.removed,
        exact: consolidation.exact,
        partial: consolidation.partial,
        untouched: consolidation.untouched,
        decisions: consolidation.decisions,
        diagnostics,
    })
}

// ============================================================================
// CONFIRMATION
// ============================================================================

/// Classify a confirmation sheet with the built-in cascades
pub fn confirm_warnings(details: &Table, reference: &Table, config: &PipelineConfig) -> PipelineResult<ClassificationRun> {
    let engine = DispositionEngine::new(config)?;
    confirm_warnings_with(&engine, details, reference, config)
}

pub fn confirm_warnings_with(
    engine: &DispositionEngine,
    details: &Table,
    reference: &Table,
    config: &PipelineConfig,
) -> PipelineResult<ClassificationRun> {
    details.require_headers()?;
    reference.require_headers()?;
    let cols = &config.columns;
    let references = parse_references(reference, &cols.reference_bill_number, &cols.reference_type, config)
        .ok_or_else(|| PipelineError::missing_column(&reference.name, &cols.reference_bill_number))?;
    let lookup = PriorTypeLookup::from_references(&references);

    let run = engine.classify(details, &lookup)?;
    info!(
        rows = run.records.len(),
        references = lookup.len(),
        lookup_misses = run.lookup_misses,
        "Confirmation run complete"
    );
    Ok(run)
}

pub fn classification_summary_json(run: &ClassificationRun) -> Value {
    json!({
        "rows": run.records.len(),
        "rule_hits": run.rule_hits,
        "lookup_misses": run.lookup_misses,
    })
}

/// One event per classified row
pub fn classification_events(run_id: &str, run: &ClassificationRun) -> Vec<Event> {
    run.records
        .iter()
        .map(|r| {
            Event::new(
                run_id,
                "disposition",
                &r.record.row.to_string(),
                json!({
                    "rule": r.rule_id,
                    "disposition": r.disposition,
                    "delivery": r.delivery,
                    "bill": r.record.bill_number,
                }),
            )
        })
        .collect()
}

// ============================================================================
// RISK REPORTS
// ============================================================================

/// Tally over the whole table, then build one report per split value
pub fn build_risk_reports(table: &Table, split_column: &str, config: &PipelineConfig) -> PipelineResult<Vec<UnitReport>> {
    table.require_headers()?;
    let map = ColumnMap::detect(table, &config.columns.report)?;
    // Fail on the split column before doing any work
    table.require_column(split_column)?;

    let prepared = preprocess_report_table(table, &map, config);
    let tallies = tally_warnings(&prepared, &map, config);

    let reports: Vec<UnitReport> = split_units(&prepared, split_column)?
        .into_iter()
        .map(|(name, unit)| build_unit_report(&name, &unit, &tallies, &map, config.thresholds.top_branches))
        .collect();

    info!(
        rows = table.len(),
        employees = tallies.len(),
        units = reports.len(),
        "Risk reports built"
    );
    Ok(reports)
}

// ============================================================================
// TESTS
// ============================================================================
