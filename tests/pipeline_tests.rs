// Integration tests: whole runs over CSV inputs

use chrono::NaiveDate;
use std::fs;
use tempfile::tempdir;
use warning_consolidation::pipeline::consolidate_workbook_at;
use warning_consolidation::{
    build_risk_reports, confirm_warnings, load_table, read_csv, save_table, Disposition, MergeKind, PipelineConfig,
    Table,
};

const DETAILS_HEADER: &str = "Employee ID,Violation date,Violation type,false_type,false_num,false_bill_num,备注\n";

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
}

fn details_csv(body: &str) -> Table {
    read_csv("details", format!("{}{}", DETAILS_HEADER, body).as_bytes()).unwrap()
}

fn column<'a>(table: &'a Table, row: usize, header: &str) -> &'a str {
    let idx = table.column_index(header).unwrap();
    table.cell(&table.rows[row], idx)
}

#[test]
fn test_partial_merge_escalates_to_stern() {
    let config = PipelineConfig::default();
    let table = details_csv(
        "E1,2025-03-01,口头警告,虚假妥投,1,A1,\n\
         E1,2025-03-02,口头警告,虚假妥投,1,A2,\n\
         E1,2025-03-03,口头警告,虚假妥投,1,A3,\n",
    );

    let run = consolidate_workbook_at(&table, None, "警告信3月15日.csv", &config, today()).unwrap();

    assert_eq!(run.partial, 1);
    assert_eq!(run.exact, 0);
    assert_eq!(run.consolidated.len(), 1);
    assert_eq!(column(&run.consolidated, 0, "Violation type"), "严厉警告");
    assert_eq!(column(&run.consolidated, 0, "Violation date"), "2025-03-15");
    assert_eq!(column(&run.consolidated, 0, "false_num"), "3");
    assert_eq!(
        column(&run.consolidated, 0, "false_bill_num"),
        "A1(2025-03-01),A2(2025-03-02),A3(2025-03-03)"
    );
    assert_eq!(run.decisions[0].kind, MergeKind::Partial);
    assert_eq!(run.decisions[0].rows, vec![0, 1, 2]);
}

#[test]
fn test_undated_row_joins_partial_group() {
    let config = PipelineConfig::default();
    let table = details_csv(
        "E1,,口头警告,虚假妥投,1,A1,\n\
         E1,2025-03-02,口头警告,虚假妥投,1,A2,\n\
         E1,2025-03-03,口头警告,虚假妥投,1,A3,\n",
    );

    let run = consolidate_workbook_at(&table, None, "警告信3月15日.csv", &config, today()).unwrap();

    assert!(run.diagnostics.is_empty());
    assert_eq!(run.partial, 1);
    assert_eq!(run.consolidated.len(), 1);
    assert_eq!(column(&run.consolidated, 0, "false_bill_num"), "A1,A2(2025-03-02),A3(2025-03-03)");
    assert_eq!(column(&run.consolidated, 0, "Violation date"), "2025-03-15");
    assert_eq!(column(&run.consolidated, 0, "Violation type"), "严厉警告");
}

#[test]
fn test_exact_merge_sums_quantity() {
    let config = PipelineConfig::default();
    let table = details_csv(
        "E2,2025-03-02,Verbal Warning,虚假妥投,1,B1,\n\
         E2,2025-03-02,Verbal Warning,虚假妥投,2,B2,\n",
    );

    let run = consolidate_workbook_at(&table, None, "details.csv", &config, today()).unwrap();

    assert_eq!(run.exact, 1);
    assert_eq!(column(&run.consolidated, 0, "Violation type"), "Verbal Warning");
    assert_eq!(column(&run.consolidated, 0, "false_num"), "3");
    assert_eq!(column(&run.consolidated, 0, "false_bill_num"), "B1,B2");

    let payload: serde_json::Value = serde_json::from_str(column(&run.upload, 0, "Violation details")).unwrap();
    assert_eq!(payload["false_num"], 3);
    assert_eq!(payload["false_bill_num"], "B1,B2");
    assert!(payload.get("备注").is_none());
}

#[test]
fn test_known_bills_are_dropped_before_merging() {
    let config = PipelineConfig::default();
    let table = details_csv(
        "E3,2025-04-01,严厉警告,虚假妥投,1,C1,\n\
         E3,2025-04-01,严厉警告,虚假妥投,1,C2,\n",
    );
    let auxiliary = read_csv("aux", "false_bill_num\nC2\n".as_bytes()).unwrap();

    let run = consolidate_workbook_at(&table, Some(&auxiliary), "details.csv", &config, today()).unwrap();

    assert_eq!(run.removed, vec![1]);
    assert_eq!(run.exact, 0);
    assert_eq!(run.untouched, 1);
    assert_eq!(column(&run.consolidated, 0, "false_bill_num"), "C1");
}

#[test]
fn test_quantity_is_conserved_across_merges() {
    let config = PipelineConfig::default();
    let table = details_csv(
        "E1,2025-03-01,口头警告,虚假妥投,2,A1,\n\
         E1,2025-03-02,口头警告,虚假妥投,1,A2,\n\
         E1,2025-03-03,口头警告,虚假妥投,4,A3,\n\
         E2,2025-03-02,Stern Reminder,虚假妥投,1,B1,\n\
         E2,2025-03-02,Stern Reminder,虚假妥投,1,B2,\n\
         E4,,口头警告,虚假妥投,5,D1,\n",
    );

    let run = consolidate_workbook_at(&table, None, "0315.csv", &config, today()).unwrap();
    let idx = run.consolidated.column_index("false_num").unwrap();
    let total: i64 = run
        .consolidated
        .rows
        .iter()
        .map(|r| r[idx].parse::<i64>().unwrap())
        .sum();

    assert_eq!(total, 14);
    assert_eq!(run.consolidated.len(), 3);
}

#[test]
fn test_bad_cells_become_diagnostics() {
    let config = PipelineConfig::default();
    let table = details_csv("E5,not-a-date,口头警告,虚假妥投,many,E1,\n");

    let run = consolidate_workbook_at(&table, None, "details.csv", &config, today()).unwrap();

    let fields: Vec<&str> = run.diagnostics.iter().map(|d| d.field.as_str()).collect();
    assert_eq!(fields, vec!["Violation date", "false_num"]);
    assert_eq!(run.consolidated.len(), 1);
}

#[test]
fn test_csv_round_trip_through_files() {
    let dir = tempdir().unwrap();
    let details_path = dir.path().join("警告3月15日.csv");
    fs::write(
        &details_path,
        format!(
            "\u{feff}{}E2,2025-03-02,Verbal Warning,虚假妥投,1,B1,x\nE2,2025-03-02,Verbal Warning,虚假妥投,2,B2,y\n",
            DETAILS_HEADER
        ),
    )
    .unwrap();

    let config = PipelineConfig::default();
    let details = load_table(&details_path).unwrap();
    assert_eq!(details.headers[0], "Employee ID");

    let run = consolidate_workbook_at(&details, None, "警告3月15日.csv", &config, today()).unwrap();
    let upload_path = dir.path().join("upload.csv");
    save_table(&run.upload, &upload_path).unwrap();

    let reloaded = load_table(&upload_path).unwrap();
    assert_eq!(reloaded.name, "upload");
    assert_eq!(reloaded.headers, run.upload.headers);
    assert_eq!(reloaded.rows, run.upload.rows);
}

#[test]
fn test_resigned_employee_is_not_sent_in_bulk() {
    let config = PipelineConfig::default();
    let sheet = read_csv(
        "confirm",
        "违规类型,违规详情,在职状态,处理意见,处理备注,电话\n\
         虚假妥投,虚假单号:W100;,离职,员工未申诉，或态度不好,stern,13800000000\n\
         虚假妥投,虚假单号:W200;,在职,员工未申诉，或态度不好,stern,13900000000\n"
            .as_bytes(),
    )
    .unwrap();
    let reference = read_csv(
        "reference",
        "false_bill_num,Violation type\nW100,严厉Stern\nW200,严厉Stern\n".as_bytes(),
    )
    .unwrap();

    let run = confirm_warnings(&sheet, &reference, &config).unwrap();

    assert_eq!(run.records[0].disposition, Disposition::NotSent);
    assert_eq!(run.records[0].rule_id, "a1-resigned");
    assert_eq!(run.records[1].disposition, Disposition::SternManualRecheck);

    assert!(!run.table.has_column("电话"));
    assert_eq!(column(&run.table, 0, "警告信发出建议"), "不发出NotSent");
    assert_eq!(column(&run.table, 0, "发送方式"), "Bulk Send");
    assert_eq!(column(&run.table, 0, "辅助列-Waybill"), "W100");
    assert_eq!(column(&run.table, 1, "辅助1"), "严厉Stern");
}

#[test]
fn test_false_marking_remark_with_both_keywords_is_stern() {
    let config = PipelineConfig::default();
    let sheet = read_csv(
        "confirm",
        "违规类型,违规详情,在职状态,处理意见,处理备注\n\
         虚假标记,虚假单号:W300;,在职,员工未申诉，或态度不好,Verbal or Stern\n"
            .as_bytes(),
    )
    .unwrap();
    let reference = read_csv("reference", "false_bill_num,Violation type\n".as_bytes()).unwrap();

    let run = confirm_warnings(&sheet, &reference, &config).unwrap();

    assert_eq!(run.records[0].rule_id, "b2-stern");
    assert_eq!(run.records[0].disposition, Disposition::Stern);
}

#[test]
fn test_risk_reports_split_by_unit() {
    let config = PipelineConfig::default();
    let source = read_csv(
        "warnings",
        "Staff ID,Staff Name,Warning Type,Branch,Area,Work Status,Region\n\
         E1,Ann,严厉警告,B1,North,在职,R1\n\
         E1,Ann,Stern Reminder,B1,North,在职,R1\n\
         E1,Ann,严厉警告,B1,North,在职,R1\n\
         E2,Bo,严厉警告,B2,South,离职,R2\n\
         E2,Bo,严厉警告,B2,South,离职,R2\n\
         E3,Cy,口头警告,B2,South,在职,R2\n"
            .as_bytes(),
    )
    .unwrap();

    let reports = build_risk_reports(&source, "Region", &config).unwrap();
    assert_eq!(reports.len(), 2);

    let r1 = &reports[0];
    assert_eq!(r1.name, "R1");
    assert_eq!(r1.summary.three_plus, 1);
    assert_eq!(r1.summary.two_x, 0);

    let r2 = &reports[1];
    assert_eq!(r2.summary.two_x, 1);
    assert!(r2.summary.render().contains("Top 5 High-Risk Branches:"));
}
