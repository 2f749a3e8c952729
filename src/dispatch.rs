// 📬 Per-Unit Dispatch - write each unit's report and hand it to a transport
// Units are processed one at a time; a failing unit is recorded and the loop moves on.

use crate::config::{DispatchConfig, PipelineConfig};
use crate::error::PipelineResult;
use crate::pipeline::build_risk_reports;
use crate::report::UnitReport;
use crate::table::{save_table, Table};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SUMMARY_FILE: &str = "summary.txt";

/// Path-safe form of a unit or table name; empty and dot-only names get a `_` prefix
fn file_safe(name: &str) -> String {
    let safe: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect();

    if safe.chars().all(|c| c == '.') {
        format!("_{}", safe)
    } else {
        safe
    }
}

// ============================================================================
// RECIPIENTS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RecipientBook {
    addresses: HashMap<String, Vec<String>>,
}

impl RecipientBook {
    /// Build from a (unit, address) table; one cell may hold several addresses split by `;` or `,`
    pub fn from_table(table: &Table, unit_column: &str, address_column: &str) -> PipelineResult<Self> {
        let unit_idx = table.require_column(unit_column)?;
        let address_idx = table.require_column(address_column)?;

        let mut book = RecipientBook::default();
        for row in &table.rows {
            let unit = table.cell(row, unit_idx).trim();
            if unit.is_empty() {
                continue;
            }
            let addresses = table
                .cell(row, address_idx)
                .split([';', ','])
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from);
            book.addresses.entry(unit.to_string()).or_default().extend(addresses);
        }

        debug!(units = book.addresses.len(), "Recipient book loaded");
        Ok(book)
    }

    pub fn insert(&mut self, unit: &str, address: &str) {
        self.addresses
            .entry(unit.trim().to_string())
            .or_default()
            .push(address.trim().to_string());
    }

    /// Addresses for a unit; `None` when the unit is unknown or has no address
    pub fn lookup(&self, unit: &str) -> Option<&[String]> {
        self.addresses
            .get(unit.trim())
            .map(Vec::as_slice)
            .filter(|a| !a.is_empty())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub unit: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<PathBuf>,
}

impl OutboundMessage {
    pub fn compose(report: &UnitReport, to: &[String], attachments: Vec<PathBuf>, config: &DispatchConfig) -> Self {
        let body = format!(
            "{}\n\n{}\n\n{}",
            config.body_prefix,
            report.summary.render(),
            config.body_suffix
        );

        OutboundMessage {
            unit: report.name.clone(),
            to: to.to_vec(),
            cc: config.cc.clone(),
            subject: format!("{}_{}", config.subject_prefix, report.name),
            body: body.trim().to_string(),
            attachments,
        }
    }
}

// ============================================================================
// SINKS AND TRANSPORTS
// ============================================================================

/// Persists a unit's report tables; returns the written paths
pub trait ReportSink {
    fn write_unit(&mut self, report: &UnitReport) -> Result<Vec<PathBuf>>;
}

/// Delivers one composed message
pub trait MessageTransport {
    fn send(&mut self, message: &OutboundMessage) -> Result<()>;
}

/// Writes `<root>/<unit>/<table>.csv` plus the summary text
///
/// Units whose safe names collide (`A/B` and `A_B`) get numbered directories
/// (`A_B`, `A_B_2`) so no report overwrites another.
pub struct CsvDirectorySink {
    root: PathBuf,
    /// unit → directory name
    assigned: HashMap<String, String>,
    taken: HashSet<String>,
}

impl CsvDirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CsvDirectorySink {
            root: root.into(),
            assigned: HashMap::new(),
            taken: HashSet::new(),
        }
    }

    /// Directory of a unit already written, or the one it would get
    pub fn unit_dir(&self, unit: &str) -> PathBuf {
        match self.assigned.get(unit) {
            Some(name) => self.root.join(name),
            None => self.root.join(file_safe(unit)),
        }
    }

    fn assign_dir(&mut self, unit: &str) -> PathBuf {
        if let Some(name) = self.assigned.get(unit) {
            return self.root.join(name);
        }

        let base = file_safe(unit);
        let mut name = base.clone();
        let mut n = 1;
        while self.taken.contains(&name) {
            n += 1;
            name = format!("{}_{}", base, n);
        }

        self.taken.insert(name.clone());
        self.assigned.insert(unit.to_string(), name.clone());
        self.root.join(name)
    }
}

impl ReportSink for CsvDirectorySink {
    fn write_unit(&mut self, report: &UnitReport) -> Result<Vec<PathBuf>> {
        let dir = self.assign_dir(&report.name);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let mut written = Vec::with_capacity(report.tables.len() + 1);
        for table in &report.tables {
            let path = dir.join(format!("{}.csv", file_safe(&table.name)));
            save_table(table, &path)?;
            written.push(path);
        }

        let summary_path = dir.join(SUMMARY_FILE);
        fs::write(&summary_path, report.summary.render())
            .with_context(|| format!("Failed to write summary: {}", summary_path.display()))?;
        written.push(summary_path);

        Ok(written)
    }
}

/// Stores each message as a JSON file instead of sending it
pub struct OutboxTransport {
    dir: PathBuf,
    sent: usize,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create outbox: {}", dir.display()))?;
        Ok(OutboxTransport { dir, sent: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl MessageTransport for OutboxTransport {
    fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let path = self
            .dir
            .join(format!("{:03}_{}.json", self.sent + 1, file_safe(&message.unit)));
        let json = serde_json::to_string_pretty(message)?;
        fs::write(&path, json).with_context(|| format!("Failed to write message: {}", path.display()))?;
        self.sent += 1;
        Ok(())
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Delivered { attachments: usize },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub delivered: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,

    /// Every unit in processing order
    pub outcomes: Vec<(String, UnitOutcome)>,
}

impl DispatchSummary {
    fn record(&mut self, unit: &str, outcome: UnitOutcome) {
        match &outcome {
            UnitOutcome::Delivered { .. } => self.delivered.push(unit.to_string()),
            UnitOutcome::Skipped { .. } => self.skipped.push(unit.to_string()),
            UnitOutcome::Failed { error } => self.failed.push((unit.to_string(), error.clone())),
        }
        self.outcomes.push((unit.to_string(), outcome));
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

pub struct Dispatcher<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Dispatcher<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Dispatcher { config }
    }

    /// Build, persist and send every unit's report
    ///
    /// Column errors in the source table are fatal; sink and transport
    /// errors only fail the unit they happen in.
    pub fn run(
        &self,
        table: &Table,
        split_column: &str,
        recipients: &RecipientBook,
        sink: &mut dyn ReportSink,
        transport: &mut dyn MessageTransport,
    ) -> PipelineResult<DispatchSummary> {
        let reports = build_risk_reports(table, split_column, self.config)?;
        let mut summary = DispatchSummary::default();

        for report in &reports {
            let outcome = self.dispatch_unit(report, recipients, sink, transport);
            match &outcome {
                UnitOutcome::Delivered { attachments } => {
                    debug!(unit = %report.name, attachments, "Unit delivered")
                }
                UnitOutcome::Skipped { reason } => warn!(unit = %report.name, %reason, "Unit skipped"),
                UnitOutcome::Failed { error } => warn!(unit = %report.name, %error, "Unit failed"),
            }
            summary.record(&report.name, outcome);
        }

        info!(
            units = summary.total(),
            delivered = summary.delivered.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Dispatch complete"
        );
        Ok(summary)
    }

    fn dispatch_unit(
        &self,
        report: &UnitReport,
        recipients: &RecipientBook,
        sink: &mut dyn ReportSink,
        transport: &mut dyn MessageTransport,
    ) -> UnitOutcome {
        let attachments = match sink.write_unit(report) {
            Ok(paths) => paths,
            Err(e) => return UnitOutcome::Failed { error: format!("{:#}", e) },
        };

        let Some(to) = recipients.lookup(&report.name) else {
            return UnitOutcome::Skipped {
                reason: "no recipient".to_string(),
            };
        };

        let message = OutboundMessage::compose(report, to, attachments, &self.config.dispatch);
        let count = message.attachments.len();
        match transport.send(&message) {
            Ok(()) => UnitOutcome::Delivered { attachments: count },
            Err(e) => UnitOutcome::Failed { error: format!("{:#}", e) },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
