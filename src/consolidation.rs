// 🧩 Consolidation Engine - Merge repeated incidents per employee
// Two passes:
// 1. Exact: same employee, date and type (>= 2 records) → one record, bills joined
// 2. Partial: same employee and type (>= 3 leftover records) → one escalated record

use crate::config::Thresholds;
use crate::normalizer::{ViolationType, WarningCategory};
use crate::record::{IncidentRecord, MergeKind};
use crate::temporal::{extract_month_day, year_mode};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use tracing::{debug, info};

// ============================================================================
// ESCALATION
// ============================================================================

/// Exact groups: all-verbal → verbal, all-stern → stern, else first
pub fn escalate_exact(types: &[ViolationType]) -> ViolationType {
    match types.first() {
        Some(first) => first.clone(),
        None => ViolationType::Unknown,
    }
}

/// Partial groups: all-verbal → stern (same script), all-stern → stern,
/// mixed → first member's type unchanged
pub fn escalate_partial(types: &[ViolationType]) -> ViolationType {
    let first = match types.first() {
        Some(first) => first,
        None => return ViolationType::Unknown,
    };

    if types.iter().all(|t| t.category() == WarningCategory::Verbal) {
        first.escalated()
    } else {
        first.clone()
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeDecision {
    pub kind: MergeKind,
    pub employee_id: String,

    /// Input rows folded into the merged record
    pub rows: Vec<usize>,

    /// Resulting bill field
    pub bill_number: String,

    pub violation_type: ViolationType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consolidation {
    /// Exact merges, then partial merges, then untouched records
    pub records: Vec<IncidentRecord>,

    pub exact: usize,
    pub partial: usize,
    pub untouched: usize,

    pub decisions: Vec<MergeDecision>,
}

// ============================================================================
// CONSOLIDATOR
// ============================================================================

pub struct Consolidator {
    /// Minimum group size for the exact merge (default: 2)
    pub exact_min_group: usize,

    /// Minimum group size for the partial merge (default: 3)
    pub partial_min_group: usize,

    /// Fallback for the report month/day and the year of undated groups
    pub today: NaiveDate,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::from_thresholds(&Thresholds::default(), Local::now().date_naive())
    }

    pub fn from_thresholds(thresholds: &Thresholds, today: NaiveDate) -> Self {
        Consolidator {
            exact_min_group: thresholds.exact_min_group,
            partial_min_group: thresholds.partial_min_group,
            today,
        }
    }

    /// Run both passes; `source_name` supplies the month/day of partial merges
    pub fn consolidate(&self, records: &[IncidentRecord], source_name: &str) -> Consolidation {
        let mut consumed = vec![false; records.len()];
        let mut decisions = Vec::new();

        // Pass 1: exact
        let exact_groups = group_in_order(records.iter().enumerate().filter_map(|(i, r)| {
            let employee = r.employee_id.as_ref()?;
            let date = r.violation_date?;
            if r.violation_type.is_unknown() {
                return None;
            }
            Some(((employee.clone(), date, r.violation_type.clone()), i))
        }));

        let mut exact_records = Vec::new();
        for members in exact_groups.into_iter().filter(|g| g.len() >= self.exact_min_group) {
            let merged = self.merge_exact(records, &members);
            members.iter().for_each(|&i| consumed[i] = true);
            decisions.push(decision_for(&merged, MergeKind::Exact, records, &members));
            exact_records.push(merged);
        }

        // Pass 2: partial, leftovers only
        let partial_groups = group_in_order(records.iter().enumerate().filter_map(|(i, r)| {
            if consumed[i] || r.violation_type.is_unknown() {
                return None;
            }
            let employee = r.employee_id.as_ref()?;
            Some(((employee.clone(), r.violation_type.clone()), i))
        }));

        let month_day = extract_month_day(source_name, self.today);
        let mut partial_records = Vec::new();
        for members in partial_groups.into_iter().filter(|g| g.len() >= self.partial_min_group) {
            let mut merged = self.merge_partial(records, &members);
            let dates: Vec<NaiveDate> = members.iter().filter_map(|&i| records[i].violation_date).collect();
            merged.violation_date = Some(month_day.with_year(year_mode(dates.iter(), self.today.year())));
            members.iter().for_each(|&i| consumed[i] = true);
            decisions.push(decision_for(&merged, MergeKind::Partial, records, &members));
            partial_records.push(merged);
        }

        let untouched: Vec<IncidentRecord> = records
            .iter()
            .zip(&consumed)
            .filter(|(_, &used)| !used)
            .map(|(r, _)| r.clone())
            .collect();

        let exact = exact_records.len();
        let partial = partial_records.len();
        let untouched_count = untouched.len();

        info!(
            input = records.len(),
            exact,
            partial,
            untouched = untouched_count,
            "Consolidation done"
        );

        let mut merged_records = exact_records;
        merged_records.extend(partial_records);
        merged_records.extend(untouched);

        Consolidation {
            records: merged_records,
            exact,
            partial,
            untouched: untouched_count,
            decisions,
        }
    }

    fn merge_exact(&self, records: &[IncidentRecord], members: &[usize]) -> IncidentRecord {
        let bill_number = members
            .iter()
            .map(|&i| records[i].bill_number.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let types: Vec<ViolationType> = members.iter().map(|&i| records[i].violation_type.clone()).collect();

        let mut merged = fold_members(records, members);
        merged.bill_number = bill_number;
        merged.violation_type = escalate_exact(&types);
        merged.merge = MergeKind::Exact;
        merged
    }

    fn merge_partial(&self, records: &[IncidentRecord], members: &[usize]) -> IncidentRecord {
        let bill_number = members
            .iter()
            .map(|&i| {
                let r = &records[i];
                match r.violation_date {
                    Some(date) => format!("{}({})", r.bill_number, date.format("%Y-%m-%d")),
                    None => r.bill_number.clone(),
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        let types: Vec<ViolationType> = members.iter().map(|&i| records[i].violation_type.clone()).collect();

        let mut merged = fold_members(records, members);
        merged.bill_number = bill_number;
        merged.violation_type = escalate_partial(&types);
        merged.merge = MergeKind::Partial;
        merged
    }
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new()
    }
}

/// First member's fields, summed quantity, all sources
fn fold_members(records: &[IncidentRecord], members: &[usize]) -> IncidentRecord {
    let mut merged = records[members[0]].clone();
    merged.quantity = members.iter().map(|&i| records[i].quantity).sum();
    merged.sources = members.iter().flat_map(|&i| records[i].sources.iter().copied()).collect();
    merged
}

fn decision_for(
    merged: &IncidentRecord,
    kind: MergeKind,
    records: &[IncidentRecord],
    members: &[usize],
) -> MergeDecision {
    let decision = MergeDecision {
        kind,
        employee_id: merged.employee_id.clone().unwrap_or_default(),
        rows: members.iter().map(|&i| records[i].row).collect(),
        bill_number: merged.bill_number.clone(),
        violation_type: merged.violation_type.clone(),
    };
    debug!(
        kind = ?decision.kind,
        employee = %decision.employee_id,
        rows = ?decision.rows,
        bill = %decision.bill_number,
        "Records merged"
    );
    decision
}

/// Group indices by key, groups ordered by first appearance
fn group_in_order<K, I>(items: I) -> Vec<Vec<usize>>
where
    K: Eq + Hash,
    I: IntoIterator<Item = (K, usize)>,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (key, index) in items {
        match positions.get(&key) {
            Some(&pos) => groups[pos].push(index),
            None => {
                positions.insert(key, groups.len());
                groups.push(vec![index]);
            }
        }
    }

    groups
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::Script;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_record(
        row: usize,
        employee: Option<&str>,
        day: Option<NaiveDate>,
        violation_type: ViolationType,
        bill: &str,
        quantity: i64,
    ) -> IncidentRecord {
        let record = IncidentRecord::new(row, employee, violation_type)
            .with_bill(bill)
            .with_quantity(quantity)
            .with_detail("false_type", &format!("T{}", row));
        match day {
            Some(d) => record.with_date(d),
            None => record,
        }
    }

    fn consolidator() -> Consolidator {
        Consolidator::from_thresholds(&Thresholds::default(), date(2026, 1, 10))
    }

    const VERBAL: ViolationType = ViolationType::Verbal(Script::Han);
    const STERN: ViolationType = ViolationType::Stern(Script::Han);

    #[test]
    fn test_exact_merge_sums_quantity() {
        let records = vec![
            create_test_record(0, Some("E2"), Some(date(2025, 3, 1)), STERN, "B1", 1),
            create_test_record(1, Some("E2"), Some(date(2025, 3, 1)), STERN, "B2", 2),
        ];

        let result = consolidator().consolidate(&records, "details_0315.csv");

        assert_eq!(result.exact, 1);
        assert_eq!(result.records.len(), 1);
        let merged = &result.records[0];
        assert_eq!(merged.bill_number, "B1,B2");
        assert_eq!(merged.quantity, 3);
        assert_eq!(merged.violation_type, STERN);
        assert_eq!(merged.sources, vec![0, 1]);
        assert_eq!(merged.detail("false_type"), Some("T0"));
        assert_eq!(merged.merge, MergeKind::Exact);
    }

    #[test]
    fn test_partial_merge_escalates_verbal() {
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2025, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 2)), VERBAL, "A2", 1),
            create_test_record(2, Some("E1"), Some(date(2025, 3, 3)), VERBAL, "A3", 1),
        ];

        let result = consolidator().consolidate(&records, "details_0315.csv");

        assert_eq!(result.partial, 1);
        assert_eq!(result.records.len(), 1);
        let merged = &result.records[0];
        assert_eq!(merged.bill_number, "A1(2025-03-01),A2(2025-03-02),A3(2025-03-03)");
        assert_eq!(merged.violation_type, STERN);
        assert_eq!(merged.quantity, 3);
        assert_eq!(merged.violation_date, Some(date(2025, 3, 15)));
        assert_eq!(result.decisions[0].rows, vec![0, 1, 2]);
    }

    #[test]
    fn test_partial_merge_undated_member_keeps_bare_bill() {
        let records = vec![
            create_test_record(0, Some("E1"), None, VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), None, VERBAL, "A2", 1),
            create_test_record(2, Some("E1"), Some(date(2024, 5, 2)), VERBAL, "A3", 1),
        ];

        let result = consolidator().consolidate(&records, "no_date_here.csv");
        let merged = &result.records[0];

        assert_eq!(merged.bill_number, "A1,A2,A3(2024-05-02)");
        // month/day from today, year from the only dated member
        assert_eq!(merged.violation_date, Some(date(2024, 1, 10)));
    }

    #[test]
    fn test_partial_merge_year_tie_takes_latest() {
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2024, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 2)), VERBAL, "A2", 1),
            create_test_record(2, Some("E1"), Some(date(2024, 3, 3)), VERBAL, "A3", 1),
            create_test_record(3, Some("E1"), Some(date(2025, 3, 4)), VERBAL, "A4", 1),
        ];

        let result = consolidator().consolidate(&records, "details_0315.csv");

        assert_eq!(result.partial, 1);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].violation_date, Some(date(2025, 3, 15)));
    }

    #[test]
    fn test_two_leftovers_pass_through() {
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2025, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 2)), VERBAL, "A2", 1),
        ];

        let result = consolidator().consolidate(&records, "x.csv");
        assert_eq!(result.untouched, 2);
        assert_eq!(result.records, records);
    }

    #[test]
    fn test_exact_members_do_not_reenter_partial() {
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2025, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 1)), VERBAL, "A2", 1),
            create_test_record(2, Some("E1"), Some(date(2025, 3, 2)), VERBAL, "A3", 1),
            create_test_record(3, Some("E1"), Some(date(2025, 3, 3)), VERBAL, "A4", 1),
        ];

        let result = consolidator().consolidate(&records, "x_0301.csv");

        assert_eq!(result.exact, 1);
        assert_eq!(result.partial, 0);
        assert_eq!(result.untouched, 2);
        assert_eq!(result.records[0].bill_number, "A1,A2");
        assert_eq!(result.records[1].row, 2);
    }

    #[test]
    fn test_null_employee_never_grouped() {
        let records = vec![
            create_test_record(0, None, Some(date(2025, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, None, Some(date(2025, 3, 1)), VERBAL, "A2", 1),
            create_test_record(2, None, Some(date(2025, 3, 1)), VERBAL, "A3", 1),
        ];

        let result = consolidator().consolidate(&records, "x.csv");
        assert_eq!(result.untouched, 3);
        assert!(result.decisions.is_empty());
    }

    #[test]
    fn test_unknown_type_never_grouped() {
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2025, 3, 1)), ViolationType::Unknown, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 1)), ViolationType::Unknown, "A2", 1),
        ];

        let result = consolidator().consolidate(&records, "x.csv");
        assert_eq!(result.untouched, 2);
    }

    #[test]
    fn test_scripts_group_separately() {
        let latin = ViolationType::Verbal(Script::Latin);
        let records = vec![
            create_test_record(0, Some("E1"), Some(date(2025, 3, 1)), VERBAL, "A1", 1),
            create_test_record(1, Some("E1"), Some(date(2025, 3, 1)), latin, "A2", 1),
        ];

        let result = consolidator().consolidate(&records, "x.csv");
        assert_eq!(result.exact, 0);
    }

    #[test]
    fn test_output_order_exact_partial_untouched() {
        let records = vec![
            create_test_record(0, Some("U"), Some(date(2025, 1, 1)), VERBAL, "U1", 1),
            create_test_record(1, Some("P"), Some(date(2025, 1, 1)), STERN, "P1", 1),
            create_test_record(2, Some("X"), Some(date(2025, 1, 5)), VERBAL, "X1", 1),
            create_test_record(3, Some("P"), Some(date(2025, 1, 2)), STERN, "P2", 1),
            create_test_record(4, Some("X"), Some(date(2025, 1, 5)), VERBAL, "X2", 1),
            create_test_record(5, Some("P"), Some(date(2025, 1, 3)), STERN, "P3", 1),
        ];

        let result = consolidator().consolidate(&records, "x_0120.csv");
        let bills: Vec<&str> = result.records.iter().map(|r| r.bill_number.as_str()).collect();

        assert_eq!(
            bills,
            vec!["X1,X2", "P1(2025-01-01),P2(2025-01-02),P3(2025-01-03)", "U1"]
        );
        let total: i64 = result.records.iter().map(|r| r.quantity).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_escalation_rules() {
        let mixed = [VERBAL, STERN, VERBAL];
        assert_eq!(escalate_partial(&mixed), VERBAL);
        assert_eq!(escalate_partial(&[STERN, STERN, STERN]), STERN);
        assert_eq!(
            escalate_partial(&vec![ViolationType::Verbal(Script::Latin); 3]),
            ViolationType::Stern(Script::Latin)
        );
        assert_eq!(escalate_exact(&[VERBAL, VERBAL]), VERBAL);
        assert_eq!(escalate_partial(&[]), ViolationType::Unknown);
    }
}
