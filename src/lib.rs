// Warning Consolidation - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod error;
pub mod logging;
pub mod table;
pub mod normalizer;     // Vocabulary: types, statuses, families, notes
pub mod temporal;       // Month/day codes and year inference
pub mod record;         // Typed incident rows + row diagnostics
pub mod deduplication;  // Known-bill removal
pub mod consolidation;  // Exact / partial merges
pub mod rules;          // Disposition cascades
pub mod report;         // Per-unit risk reports
pub mod export;         // Upload + original-type sheets
pub mod dispatch;       // Per-unit sinks and transports
pub mod pipeline;       // End-to-end runs
pub mod worker;         // Background jobs
pub mod db;             // Audit store

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use table::{load_table, read_csv, save_table, write_csv, Table};
pub use normalizer::{
    normalize_employment_status, normalize_violation_type, EmploymentStatus, Script,
    ViolationFamily, ViolationType, WarningCategory,
};
pub use record::{Diagnostic, IncidentRecord, MergeKind, ReferenceRecord};
pub use deduplication::{DeduplicationEngine, ReferenceSet};
pub use consolidation::{Consolidation, Consolidator, MergeDecision};
pub use rules::{
    CascadeSet, ClassificationRun, DeliveryMode, Disposition, DispositionEngine, PriorTypeLookup,
};
pub use report::{RiskSummary, RiskTier, UnitReport};
pub use export::{ExportRow, OutputSuffix};
pub use dispatch::{
    CsvDirectorySink, DispatchSummary, Dispatcher, MessageTransport, OutboundMessage,
    OutboxTransport, RecipientBook, ReportSink, UnitOutcome,
};
pub use pipeline::{build_risk_reports, confirm_warnings, consolidate_workbook, ConsolidationRun};
pub use worker::{spawn_job, JobHandle};
pub use db::{open_audit_db, setup_database, Event, Run, RunStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
