// 🔍 Deduplication Engine - Drop incidents already known to the auxiliary table
// One strategy: bill number membership in the reference identifier set

use crate::record::IncidentRecord;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

// ============================================================================
// REFERENCE SET
// ============================================================================

/// Bill identifiers of the authoritative table
#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    bills: HashSet<String>,
}

impl ReferenceSet {
    /// `None` when the table has no identifier column
    pub fn from_table(table: &Table, column: &str) -> Option<Self> {
        let idx = table.column_index(column)?;
        let bills = table
            .rows
            .iter()
            .map(|row| table.cell(row, idx).trim())
            .filter(|bill| !bill.is_empty())
            .map(|bill| bill.to_string())
            .collect();
        Some(ReferenceSet { bills })
    }

    pub fn from_bills<I, S>(bills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ReferenceSet {
            bills: bills
                .into_iter()
                .map(|b| b.as_ref().trim().to_string())
                .filter(|b| !b.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, bill: &str) -> bool {
        let bill = bill.trim();
        !bill.is_empty() && self.bills.contains(bill)
    }

    pub fn len(&self) -> usize {
        self.bills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bills.is_empty()
    }
}

// ============================================================================
// DEDUP OUTCOME
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupOutcome {
    /// Surviving records, input order preserved
    pub kept: Vec<IncidentRecord>,

    /// Input rows dropped because their bill is already known
    pub removed: Vec<usize>,
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine;

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine
    }

    /// Remove every record whose bill number is in the reference set
    ///
    /// A missing or empty reference is a no-op.
    pub fn remove_known(
        &self,
        records: &[IncidentRecord],
        reference: Option<&ReferenceSet>,
    ) -> DedupOutcome {
        let reference = match reference {
            Some(r) if !r.is_empty() => r,
            _ => {
                debug!("No reference identifiers, deduplication skipped");
                return DedupOutcome {
                    kept: records.to_vec(),
                    removed: Vec::new(),
                };
            }
        };

        let (removed, kept): (Vec<&IncidentRecord>, Vec<&IncidentRecord>) = records
            .iter()
            .partition(|r| reference.contains(&r.bill_number));

        for record in &removed {
            debug!(row = record.row, bill = %record.bill_number, "Known bill removed");
        }
        info!(
            kept = kept.len(),
            removed = removed.len(),
            reference = reference.len(),
            "Deduplication done"
        );

        DedupOutcome {
            kept: kept.into_iter().cloned().collect(),
            removed: removed.iter().map(|r| r.row).collect(),
        }
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{Script, ViolationType};

    fn create_test_record(row: usize, bill: &str) -> IncidentRecord {
        IncidentRecord::new(row, Some("E1"), ViolationType::Verbal(Script::Han))
            .with_bill(bill)
            .with_quantity(1)
    }

    #[test]
    fn test_removes_known_bills() {
        let engine = DeduplicationEngine::new();
        let records = vec![
            create_test_record(0, "B1"),
            create_test_record(1, "B2"),
            create_test_record(2, "B3"),
        ];
        let reference = ReferenceSet::from_bills(["B2"]);

        let outcome = engine.remove_known(&records, Some(&reference));

        assert_eq!(outcome.removed, vec![1]);
        let rows: Vec<usize> = outcome.kept.iter().map(|r| r.row).collect();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn test_no_reference_is_noop() {
        let engine = DeduplicationEngine::new();
        let records = vec![create_test_record(0, "B1")];

        let outcome = engine.remove_known(&records, None);
        assert_eq!(outcome.kept, records);
        assert!(outcome.removed.is_empty());

        let empty = ReferenceSet::default();
        assert_eq!(engine.remove_known(&records, Some(&empty)).kept.len(), 1);
    }

    #[test]
    fn test_empty_bill_never_matches() {
        let engine = DeduplicationEngine::new();
        let records = vec![create_test_record(0, ""), create_test_record(1, "  ")];
        let reference = ReferenceSet::from_bills(["B1", ""]);

        let outcome = engine.remove_known(&records, Some(&reference));
        assert_eq!(outcome.kept.len(), 2);
    }

    #[test]
    fn test_bill_match_is_trimmed() {
        let engine = DeduplicationEngine::new();
        let records = vec![create_test_record(0, " B1 ")];
        let reference = ReferenceSet::from_bills(["B1"]);

        assert!(engine.remove_known(&records, Some(&reference)).kept.is_empty());
    }

    #[test]
    fn test_reference_from_table_without_column() {
        let table = Table::new("auxiliary", vec!["Employee ID".to_string()]);
        assert!(ReferenceSet::from_table(&table, "false_bill_num").is_none());

        let table = Table::new("auxiliary", vec!["false_bill_num".to_string()])
            .with_rows(vec![vec!["B9".to_string()], vec!["".to_string()]]);
        let set = ReferenceSet::from_table(&table, "false_bill_num").unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("B9"));
    }
}
