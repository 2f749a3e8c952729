// 📊 Risk Reports - Per-employee tallies, tiers and per-unit report tables
//
// Flow:
// 1. ColumnMap::detect finds the role columns by header keywords
// 2. tally_warnings counts stern/verbal rows per employee over the whole table
// 3. build_unit_report turns one unit's rows + global tallies into named tables
//    and a textual summary

use crate::config::{PipelineConfig, ReportColumns};
use crate::error::{PipelineError, PipelineResult};
use crate::normalizer::{normalize_sending_status, normalize_violation_type, WarningCategory};
use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub const BRANCH_RISK_TABLE: &str = "Branch_Staff_Risk_Alert";
pub const THREE_PLUS_TABLE: &str = "Staff_with_3x+_Stern_Reminders";
pub const TWO_X_TABLE: &str = "Staff_with_2x_Stern_Reminders";
pub const DETAILS_TABLE: &str = "details";

pub const STERN_COUNT_COLUMN: &str = "Stern Reminder";
pub const VERBAL_COUNT_COLUMN: &str = "Verbal Warning";
pub const TWO_X_COUNT_COLUMN: &str = "EmployeeCount_with_2x_Stern_Reminders";
pub const THREE_PLUS_COUNT_COLUMN: &str = "EmployeeCount_with_3x+_Stern_Reminders";

const UNKNOWN_STATUS: &str = "Unknown";

// ============================================================================
// COLUMN MAP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Id,
    Name,
    WarningType,
    Area,
    District,
    Branch,
    Ops,
    Position,
    Status,
    EmploymentType,
    SendingStatus,
}

impl Role {
    pub const ALL: [Role; 11] = [
        Role::Id,
        Role::Name,
        Role::WarningType,
        Role::Area,
        Role::District,
        Role::Branch,
        Role::Ops,
        Role::Position,
        Role::Status,
        Role::EmploymentType,
        Role::SendingStatus,
    ];

    /// Columns copied into the per-employee detail tables, in this order
    pub const BASE: [Role; 9] = [
        Role::Area,
        Role::District,
        Role::Branch,
        Role::Ops,
        Role::Position,
        Role::Id,
        Role::Name,
        Role::Status,
        Role::EmploymentType,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Role::Id => "id",
            Role::Name => "name",
            Role::WarningType => "warning_type",
            Role::Area => "area",
            Role::District => "district",
            Role::Branch => "branch",
            Role::Ops => "ops",
            Role::Position => "position",
            Role::Status => "status",
            Role::EmploymentType => "employment_type",
            Role::SendingStatus => "sending_status",
        }
    }

    fn keywords<'a>(&self, columns: &'a ReportColumns) -> &'a [String] {
        match self {
            Role::Id => &columns.id,
            Role::Name => &columns.name,
            Role::WarningType => &columns.warning_type,
            Role::Area => &columns.area,
            Role::District => &columns.district,
            Role::Branch => &columns.branch,
            Role::Ops => &columns.ops,
            Role::Position => &columns.position,
            Role::Status => &columns.status,
            Role::EmploymentType => &columns.employment_type,
            Role::SendingStatus => &columns.sending_status,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMap {
    indices: HashMap<Role, usize>,
    headers: Vec<String>,
}

impl ColumnMap {
    /// For each role, the first keyword contained in a lower-cased header wins
    pub fn detect(table: &Table, columns: &ReportColumns) -> PipelineResult<Self> {
        let lowered: Vec<String> = table.headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let mut indices = HashMap::new();

        for role in Role::ALL {
            let found = role.keywords(columns).iter().find_map(|keyword| {
                let keyword = keyword.to_lowercase();
                lowered.iter().position(|h| h.contains(&keyword))
            });
            if let Some(idx) = found {
                debug!(role = role.name(), header = %table.headers[idx], "Column mapped");
                indices.insert(role, idx);
            }
        }

        for critical in [Role::Id, Role::WarningType] {
            if !indices.contains_key(&critical) {
                return Err(PipelineError::missing_column(
                    &table.name,
                    &format!("{} ({})", critical.name(), critical.keywords(columns).join(" / ")),
                ));
            }
        }

        Ok(ColumnMap {
            indices,
            headers: table.headers.clone(),
        })
    }

    pub fn get(&self, role: Role) -> Option<usize> {
        self.indices.get(&role).copied()
    }

    pub fn header(&self, role: Role) -> Option<&str> {
        self.get(role).map(|i| self.headers[i].as_str())
    }

    fn value<'a>(&self, table: &'a Table, row: &'a [String], role: Role) -> Option<&'a str> {
        self.get(role).map(|i| table.cell(row, i))
    }

    fn employee<'a>(&self, table: &'a Table, row: &'a [String]) -> Option<&'a str> {
        self.value(table, row, Role::Id).map(str::trim).filter(|id| !id.is_empty())
    }
}

/// Unify warning-type labels and sending statuses before reporting
pub fn preprocess_report_table(table: &Table, map: &ColumnMap, config: &PipelineConfig) -> Table {
    let mut out = table.clone();
    let type_idx = map.get(Role::WarningType);
    let sending_idx = map.get(Role::SendingStatus);

    for row in out.rows.iter_mut() {
        if let Some(cell) = type_idx.and_then(|i| row.get_mut(i)) {
            let normalized = normalize_violation_type(Some(cell.as_str()), &config.keywords, &config.labels);
            if normalized.category() != WarningCategory::Other {
                *cell = normalized.label(&config.labels);
            }
        }
        if let Some(cell) = sending_idx.and_then(|i| row.get_mut(i)) {
            *cell = normalize_sending_status(cell.as_str());
        }
    }

    out
}

// ============================================================================
// TALLIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskTier {
    None,
    TwoX,
    ThreePlus,
}

impl RiskTier {
    pub fn from_stern(count: usize) -> Self {
        match count {
            2 => RiskTier::TwoX,
            n if n >= 3 => RiskTier::ThreePlus,
            _ => RiskTier::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeTally {
    pub stern: usize,
    pub verbal: usize,
}

impl EmployeeTally {
    pub fn tier(&self) -> RiskTier {
        RiskTier::from_stern(self.stern)
    }
}

/// Global per-employee counts
#[derive(Debug, Clone, Default)]
pub struct Tallies {
    by_employee: HashMap<String, EmployeeTally>,
    /// Employee ids in encounter order
    pub order: Vec<String>,
}

impl Tallies {
    pub fn get(&self, employee: &str) -> EmployeeTally {
        self.by_employee.get(employee).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Rows counted per employee by normalized category; Han and Latin labels count together
pub fn tally_warnings(table: &Table, map: &ColumnMap, config: &PipelineConfig) -> Tallies {
    let mut tallies = Tallies::default();

    for row in &table.rows {
        let employee = match map.employee(table, row) {
            Some(id) => id,
            None => continue,
        };
        if !tallies.by_employee.contains_key(employee) {
            tallies.order.push(employee.to_string());
        }
        let tally = tallies.by_employee.entry(employee.to_string()).or_default();

        let raw = map.value(table, row, Role::WarningType);
        match normalize_violation_type(raw, &config.keywords, &config.labels).category() {
            WarningCategory::Stern => tally.stern += 1,
            WarningCategory::Verbal => tally.verbal += 1,
            WarningCategory::Other => {}
        }
    }

    debug!(employees = tallies.len(), "Warnings tallied");
    tallies
}

// ============================================================================
// BRANCH RISK
// ============================================================================

/// Insertion-ordered status counts
pub type StatusBreakdown = Vec<(String, usize)>;

fn bump(breakdown: &mut StatusBreakdown, status: &str) {
    match breakdown.iter_mut().find(|(s, _)| s == status) {
        Some((_, n)) => *n += 1,
        None => breakdown.push((status.to_string(), 1)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRisk {
    pub branch: String,

    /// Context from the branch's first row
    pub area: String,
    pub district: String,
    pub ops: String,

    pub two_x: usize,
    pub three_plus: usize,
    pub status_two_x: StatusBreakdown,
    pub status_three_plus: StatusBreakdown,
}

impl BranchRisk {
    pub fn total_risk(&self) -> usize {
        self.two_x + self.three_plus
    }
}

// ============================================================================
// RISK SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub two_x: usize,
    pub three_plus: usize,
    pub status_two_x: StatusBreakdown,
    pub status_three_plus: StatusBreakdown,

    /// Branches with at least one tiered employee, ranked by total risk
    pub branches: Vec<BranchRisk>,

    pub top_n: usize,
}

fn format_breakdown(breakdown: &StatusBreakdown) -> String {
    if breakdown.is_empty() {
        return "- No data".to_string();
    }
    breakdown
        .iter()
        .map(|(status, n)| format!("- {}: {}", status, n))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_inline(breakdown: &StatusBreakdown) -> String {
    breakdown
        .iter()
        .map(|(status, n)| format!("{}: {}", status, n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl RiskSummary {
    pub fn render(&self) -> String {
        let top: Vec<String> = self
            .branches
            .iter()
            .take(self.top_n)
            .enumerate()
            .map(|(i, b)| {
                let mut line = format!("{}. {} - Total Risk: {}", i + 1, b.branch, b.total_risk());
                if b.three_plus > 0 {
                    line.push_str(&format!(
                        "\n   - Employees with 3+ Stern Reminders: {}; Status: {}",
                        b.three_plus,
                        format_inline(&b.status_three_plus)
                    ));
                }
                if b.two_x > 0 {
                    line.push_str(&format!(
                        "\n   - Employees with 2 Stern Reminders: {}; Status: {}",
                        b.two_x,
                        format_inline(&b.status_two_x)
                    ));
                }
                line
            })
            .collect();
        let top = if top.is_empty() {
            "- No data".to_string()
        } else {
            top.join("\n")
        };

        format!(
            "=== WARNING STATISTICS SUMMARY ===\n\n\
             Total Employees Analysis:\n\
             - Employees with exactly 2 Stern Reminders: {}\n\
             - Employees with 3+ Stern Reminders: {}\n\n\
             Work Status Distribution (2 Stern Reminders):\n{}\n\n\
             Work Status Distribution (3+ Stern Reminders):\n{}\n\n\
             Branches Involved: {}\n\n\
             Top {} High-Risk Branches:\n{}\n\
             ===============================",
            self.two_x,
            self.three_plus,
            format_breakdown(&self.status_two_x),
            format_breakdown(&self.status_three_plus),
            self.branches.len(),
            self.top_n,
            top
        )
    }
}

// ============================================================================
// UNIT REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub name: String,

    /// Branch risk, 3x+, 2x (each only when non-empty), then details
    pub tables: Vec<Table>,

    pub summary: RiskSummary,
}

impl UnitReport {
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }
}

fn blank_zero(n: usize) -> String {
    if n == 0 {
        String::new()
    } else {
        n.to_string()
    }
}

fn status_of(map: &ColumnMap, table: &Table, row: &[String]) -> String {
    map.value(table, row, Role::Status)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_STATUS)
        .to_string()
}

/// First row of every employee, in encounter order
fn first_rows<'a>(map: &ColumnMap, table: &'a Table, rows: impl Iterator<Item = &'a Vec<String>>) -> Vec<&'a Vec<String>> {
    let mut seen = HashSet::new();
    rows.filter(|row| match map.employee(table, row) {
        Some(id) => seen.insert(id.to_string()),
        None => false,
    })
    .collect()
}

pub fn build_unit_report(
    name: &str,
    unit: &Table,
    tallies: &Tallies,
    map: &ColumnMap,
    top_n: usize,
) -> UnitReport {
    let employees = first_rows(map, unit, unit.rows.iter());

    // Tier detail tables
    let base: Vec<(usize, String)> = Role::BASE
        .iter()
        .filter_map(|&role| map.get(role).map(|i| (i, unit.headers[i].clone())))
        .collect();
    let mut detail_headers: Vec<String> = base.iter().map(|(_, h)| h.clone()).collect();
    detail_headers.extend([STERN_COUNT_COLUMN.to_string(), VERBAL_COUNT_COLUMN.to_string()]);

    let mut two_x_rows: Vec<(usize, Vec<String>)> = Vec::new();
    let mut three_plus_rows: Vec<(usize, Vec<String>)> = Vec::new();
    let mut status_two_x = StatusBreakdown::new();
    let mut status_three_plus = StatusBreakdown::new();

    for row in &employees {
        let employee = map.employee(unit, row).unwrap_or_default();
        let tally = tallies.get(employee);
        let mut cells: Vec<String> = base.iter().map(|(i, _)| unit.cell(row, *i).to_string()).collect();
        cells.push(blank_zero(tally.stern));
        cells.push(blank_zero(tally.verbal));

        match tally.tier() {
            RiskTier::TwoX => {
                bump(&mut status_two_x, &status_of(map, unit, row));
                two_x_rows.push((tally.stern, cells));
            }
            RiskTier::ThreePlus => {
                bump(&mut status_three_plus, &status_of(map, unit, row));
                three_plus_rows.push((tally.stern, cells));
            }
            RiskTier::None => {}
        }
    }

    let detail_table = |table_name: &str, mut rows: Vec<(usize, Vec<String>)>| {
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Table::new(table_name, detail_headers.clone()).with_rows(rows.into_iter().map(|(_, r)| r).collect())
    };
    let two_x_count = two_x_rows.len();
    let three_plus_count = three_plus_rows.len();
    let two_x_table = detail_table(TWO_X_TABLE, two_x_rows);
    let three_plus_table = detail_table(THREE_PLUS_TABLE, three_plus_rows);

    // Branch risk
    let branches = branch_risks(unit, tallies, map);
    let branch_table = map.get(Role::Branch).map(|branch_idx| {
        let header = |role: Role, fallback: &str| map.header(role).unwrap_or(fallback).to_string();
        let headers = vec![
            header(Role::Area, "Area"),
            header(Role::District, "District"),
            unit.headers[branch_idx].clone(),
            header(Role::Ops, "OPS"),
            TWO_X_COUNT_COLUMN.to_string(),
            THREE_PLUS_COUNT_COLUMN.to_string(),
        ];
        let rows = branches
            .iter()
            .map(|b| {
                vec![
                    b.area.clone(),
                    b.district.clone(),
                    b.branch.clone(),
                    b.ops.clone(),
                    blank_zero(b.two_x),
                    blank_zero(b.three_plus),
                ]
            })
            .collect();
        Table::new(BRANCH_RISK_TABLE, headers).with_rows(rows)
    });

    let mut tables = Vec::new();
    if let Some(table) = branch_table.filter(|t| !t.is_empty()) {
        tables.push(table);
    }
    for table in [three_plus_table, two_x_table] {
        if !table.is_empty() {
            tables.push(table);
        }
    }
    let mut details = unit.clone();
    details.name = DETAILS_TABLE.to_string();
    tables.push(details);

    info!(
        unit = name,
        employees = employees.len(),
        two_x = two_x_count,
        three_plus = three_plus_count,
        branches = branches.len(),
        "Unit report built"
    );

    UnitReport {
        name: name.to_string(),
        tables,
        summary: RiskSummary {
            two_x: two_x_count,
            three_plus: three_plus_count,
            status_two_x,
            status_three_plus,
            branches,
            top_n,
        },
    }
}

/// Branches with tiered employees, stable-sorted by total risk desc
fn branch_risks(unit: &Table, tallies: &Tallies, map: &ColumnMap) -> Vec<BranchRisk> {
    let branch_idx = match map.get(Role::Branch) {
        Some(i) => i,
        None => return Vec::new(),
    };

    let mut order: Vec<&str> = Vec::new();
    for row in &unit.rows {
        let branch = unit.cell(row, branch_idx).trim();
        if !branch.is_empty() && !order.contains(&branch) {
            order.push(branch);
        }
    }

    let context = |row: &[String], role: Role| map.value(unit, row, role).unwrap_or("").to_string();

    let mut risks: Vec<BranchRisk> = order
        .into_iter()
        .filter_map(|branch| {
            let rows: Vec<&Vec<String>> = unit
                .rows
                .iter()
                .filter(|row| unit.cell(row, branch_idx).trim() == branch)
                .collect();
            let first = rows.first()?;

            let mut risk = BranchRisk {
                branch: branch.to_string(),
                area: context(first.as_slice(), Role::Area),
                district: context(first.as_slice(), Role::District),
                ops: context(first.as_slice(), Role::Ops),
                two_x: 0,
                three_plus: 0,
                status_two_x: StatusBreakdown::new(),
                status_three_plus: StatusBreakdown::new(),
            };

            for row in first_rows(map, unit, rows.iter().copied()) {
                let employee = map.employee(unit, row).unwrap_or_default();
                match tallies.get(employee).tier() {
                    RiskTier::TwoX => {
                        risk.two_x += 1;
                        bump(&mut risk.status_two_x, &status_of(map, unit, row));
                    }
                    RiskTier::ThreePlus => {
                        risk.three_plus += 1;
                        bump(&mut risk.status_three_plus, &status_of(map, unit, row));
                    }
                    RiskTier::None => {}
                }
            }

            (risk.total_risk() > 0).then_some(risk)
        })
        .collect();

    risks.sort_by(|a, b| b.total_risk().cmp(&a.total_risk()));
    risks
}

// ============================================================================
// UNIT SPLIT
// ============================================================================

/// Partition rows by the split column's non-empty values, in encounter order
pub fn split_units(table: &Table, column: &str) -> PipelineResult<Vec<(String, Table)>> {
    let idx = table.require_column(column)?;
    let mut units: Vec<(String, Table)> = Vec::new();

    for row in &table.rows {
        let value = table.cell(row, idx).trim();
        if value.is_empty() {
            continue;
        }
        match units.iter_mut().find(|(name, _)| name == value) {
            Some((_, unit)) => unit.push_row(row.clone()),
            None => {
                let mut unit = Table::new(value, table.headers.clone());
                unit.push_row(row.clone());
                units.push((value.to_string(), unit));
            }
        }
    }

    Ok(units)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table(rows: &[[&str; 6]]) -> Table {
        let headers = ["Staff ID", "Staff Name", "Warning Type", "Branch", "Area", "Work Status"];
        Table::new("source", headers.iter().map(|s| s.to_string()).collect()).with_rows(
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn stern_rows(id: &str, branch: &str, n: usize) -> Vec<[String; 6]> {
        (0..n)
            .map(|i| {
                let label = if i % 2 == 0 { "严厉警告" } else { "Stern Reminder" };
                [
                    id.to_string(),
                    format!("Name {}", id),
                    label.to_string(),
                    branch.to_string(),
                    "North".to_string(),
                    "在职".to_string(),
                ]
            })
            .collect()
    }

    fn table_from(rows: Vec<[String; 6]>) -> Table {
        let refs: Vec<[&str; 6]> = rows
            .iter()
            .map(|r| [r[0].as_str(), r[1].as_str(), r[2].as_str(), r[3].as_str(), r[4].as_str(), r[5].as_str()])
            .collect();
        create_test_table(&refs)
    }

    #[test]
    fn test_column_map_detection() {
        let config = PipelineConfig::default();
        let table = create_test_table(&[]);
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();

        assert_eq!(map.get(Role::Id), Some(0));
        assert_eq!(map.get(Role::Name), Some(1));
        assert_eq!(map.get(Role::WarningType), Some(2));
        assert_eq!(map.get(Role::Status), Some(5));
        assert_eq!(map.get(Role::Ops), None);
    }

    #[test]
    fn test_column_map_requires_critical_roles() {
        let config = PipelineConfig::default();
        let table = create_test_table(&[]).without_columns(&["Warning Type".to_string()]);

        let err = ColumnMap::detect(&table, &config.columns.report).unwrap_err();
        assert!(err.to_string().contains("warning_type"));
    }

    #[test]
    fn test_risk_tier_boundaries() {
        assert_eq!(RiskTier::from_stern(0), RiskTier::None);
        assert_eq!(RiskTier::from_stern(1), RiskTier::None);
        assert_eq!(RiskTier::from_stern(2), RiskTier::TwoX);
        assert_eq!(RiskTier::from_stern(3), RiskTier::ThreePlus);
        assert_eq!(RiskTier::from_stern(7), RiskTier::ThreePlus);
    }

    #[test]
    fn test_tally_counts_both_scripts() {
        let config = PipelineConfig::default();
        let mut rows = stern_rows("E1", "B1", 3);
        rows.push([
            "E1".to_string(),
            "Name E1".to_string(),
            "口述警告".to_string(),
            "B1".to_string(),
            "North".to_string(),
            "在职".to_string(),
        ]);
        let table = table_from(rows);
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();

        let tallies = tally_warnings(&table, &map, &config);
        assert_eq!(tallies.get("E1"), EmployeeTally { stern: 3, verbal: 1 });
        assert_eq!(tallies.get("missing"), EmployeeTally::default());
    }

    #[test]
    fn test_unit_report_tables_and_order() {
        let config = PipelineConfig::default();
        let mut rows = stern_rows("E1", "B1", 2);
        rows.extend(stern_rows("E2", "B2", 3));
        rows.extend(stern_rows("E3", "B2", 2));
        rows.extend(stern_rows("E4", "B3", 1));
        let table = table_from(rows);
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();
        let tallies = tally_warnings(&table, &map, &config);

        let report = build_unit_report("North", &table, &tallies, &map, 5);
        let names: Vec<&str> = report.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![BRANCH_RISK_TABLE, THREE_PLUS_TABLE, TWO_X_TABLE, DETAILS_TABLE]);

        let branch = report.table(BRANCH_RISK_TABLE).unwrap();
        // B2 (2 tiered employees) ranks above B1; B3 has none
        assert_eq!(branch.rows.len(), 2);
        assert_eq!(branch.rows[0][2], "B2");
        assert_eq!(branch.rows[0][4], "1");
        assert_eq!(branch.rows[0][5], "1");
        assert_eq!(branch.rows[1][2], "B1");
        assert_eq!(branch.rows[1][5], "");

        let two_x = report.table(TWO_X_TABLE).unwrap();
        assert_eq!(two_x.rows.len(), 2);
        assert_eq!(two_x.headers.last().map(|s| s.as_str()), Some(VERBAL_COUNT_COLUMN));
        // zero verbal counts are blanked
        assert_eq!(two_x.rows[0].last().map(|s| s.as_str()), Some(""));

        assert_eq!(report.table(DETAILS_TABLE).unwrap().len(), table.len());
        assert_eq!(report.summary.two_x, 2);
        assert_eq!(report.summary.three_plus, 1);
    }

    #[test]
    fn test_unit_report_without_tiers_only_details() {
        let config = PipelineConfig::default();
        let table = table_from(stern_rows("E1", "B1", 1));
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();
        let tallies = tally_warnings(&table, &map, &config);

        let report = build_unit_report("North", &table, &tallies, &map, 5);
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].name, DETAILS_TABLE);
    }

    #[test]
    fn test_tiers_use_global_tallies() {
        let config = PipelineConfig::default();
        let mut rows = stern_rows("E1", "B1", 2);
        rows[1][4] = "South".to_string();
        let table = table_from(rows);
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();
        let tallies = tally_warnings(&table, &map, &config);

        let units = split_units(&table, "Area").unwrap();
        assert_eq!(units.len(), 2);
        let south = build_unit_report(&units[1].0, &units[1].1, &tallies, &map, 5);
        // one stern row in the South unit, two overall
        assert_eq!(south.summary.two_x, 1);
    }

    #[test]
    fn test_summary_render() {
        let config = PipelineConfig::default();
        let mut rows = stern_rows("E1", "B1", 3);
        rows.extend(stern_rows("E2", "B1", 2));
        rows[3][5] = String::new();
        rows[4][5] = String::new();
        let table = table_from(rows);
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();
        let tallies = tally_warnings(&table, &map, &config);

        let text = build_unit_report("North", &table, &tallies, &map, 5).summary.render();

        assert!(text.starts_with("=== WARNING STATISTICS SUMMARY ==="));
        assert!(text.contains("- Employees with exactly 2 Stern Reminders: 1"));
        assert!(text.contains("- Employees with 3+ Stern Reminders: 1"));
        assert!(text.contains("Work Status Distribution (2 Stern Reminders):\n- Unknown: 1"));
        assert!(text.contains("Branches Involved: 1"));
        assert!(text.contains("1. B1 - Total Risk: 2"));
        assert!(text.contains("   - Employees with 3+ Stern Reminders: 1; Status: 在职: 1"));
        assert!(text.contains("   - Employees with 2 Stern Reminders: 1; Status: Unknown: 1"));
    }

    #[test]
    fn test_summary_render_empty() {
        let summary = RiskSummary {
            two_x: 0,
            three_plus: 0,
            status_two_x: Vec::new(),
            status_three_plus: Vec::new(),
            branches: Vec::new(),
            top_n: 5,
        };
        let text = summary.render();
        assert!(text.contains("Work Status Distribution (3+ Stern Reminders):\n- No data"));
        assert!(text.contains("Top 5 High-Risk Branches:\n- No data"));
    }

    #[test]
    fn test_preprocess_unifies_labels() {
        let config = PipelineConfig::default();
        let mut table = create_test_table(&[["E1", "A", "严重警告", "B1", "North", "在职"]]);
        table.headers.push("Sending Status".to_string());
        table.rows[0].push("pending".to_string());
        let map = ColumnMap::detect(&table, &config.columns.report).unwrap();

        let out = preprocess_report_table(&table, &map, &config);
        assert_eq!(out.rows[0][2], "严厉警告");
        assert_eq!(out.rows[0][6], "Has been sent");
    }

    #[test]
    fn test_split_units_encounter_order() {
        let table = create_test_table(&[
            ["E1", "A", "x", "B1", "South", ""],
            ["E2", "B", "x", "B1", "North", ""],
            ["E3", "C", "x", "B1", "", ""],
            ["E4", "D", "x", "B1", "South", ""],
        ]);

        let units = split_units(&table, "Area").unwrap();
        let names: Vec<&str> = units.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["South", "North"]);
        assert_eq!(units[0].1.len(), 2);
        assert!(split_units(&table, "Region").is_err());
    }
}
