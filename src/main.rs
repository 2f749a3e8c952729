// Warning Consolidation - CLI
// consolidate / confirm / report, each run on a background job with an optional audit trail

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

use warning_consolidation::db::{
    compute_input_digest, finish_run, insert_events, open_audit_db, record_run, Event, Run, RunStatus,
};
use warning_consolidation::export::{confirmation_file_name, original_type_file_name, upload_file_name};
use warning_consolidation::logging::init_tracing;
use warning_consolidation::pipeline::{
    classification_events, classification_summary_json, confirm_warnings_with, consolidate_workbook,
};
use warning_consolidation::{
    load_table, save_table, spawn_job, CascadeSet, CsvDirectorySink, Dispatcher, DispositionEngine,
    OutboxTransport, OutputSuffix, PipelineConfig, RecipientBook, UnitOutcome,
};

#[derive(Parser)]
#[command(
    name = "warning-consolidation",
    version,
    about = "Warning-letter consolidation, disposition and risk reports"
)]
struct Cli {
    /// Pipeline config JSON (default: built-in vocabulary)
    #[arg(long, global = true, env = "WARNING_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite audit store; runs and decisions are recorded when set
    #[arg(long, global = true, env = "WARNING_AUDIT_DB", value_name = "PATH")]
    audit_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge repeated incidents and build the upload sheets
    Consolidate(ConsolidateArgs),
    /// Recommend a disposition for every confirmation row
    Confirm(ConfirmArgs),
    /// Build per-unit risk reports and write them to the outbox
    Report(ReportArgs),
}

#[derive(Args)]
struct ConsolidateArgs {
    /// Incident details CSV
    #[arg(long)]
    details: PathBuf,
    /// Already-issued bills; matching rows are dropped
    #[arg(long)]
    auxiliary: Option<PathBuf>,
    #[arg(long)]
    out_dir: PathBuf,
    /// Output file prefix (overrides config)
    #[arg(long)]
    prefix: Option<String>,
    /// Output suffix (default: month/day from the details file name)
    #[arg(long)]
    suffix: Option<String>,
    /// Violation type code written to the upload sheet
    #[arg(long)]
    type_code: Option<i64>,
}

#[derive(Args)]
struct ConfirmArgs {
    /// Confirmation sheet CSV
    #[arg(long)]
    details: PathBuf,
    /// Original-type reference CSV
    #[arg(long)]
    reference: PathBuf,
    #[arg(long)]
    out_dir: PathBuf,
    /// Output suffix (default: today's month/day)
    #[arg(long)]
    suffix: Option<String>,
    /// Rule cascades JSON (default: built-in cascades)
    #[arg(long, value_name = "PATH")]
    rules: Option<PathBuf>,
}

#[derive(Args)]
struct ReportArgs {
    /// Warning records CSV
    #[arg(long)]
    source: PathBuf,
    /// Column whose values define the units
    #[arg(long)]
    split_column: String,
    /// Recipients CSV (unit, address)
    #[arg(long)]
    recipients: PathBuf,
    #[arg(long, default_value = "unit")]
    unit_column: String,
    #[arg(long, default_value = "address")]
    address_column: String,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long)]
    subject_prefix: Option<String>,
    /// Cc addresses separated by `;`
    #[arg(long)]
    cc: Option<String>,
}

/// What a finished job hands back to the main thread
struct CommandOutput {
    summary: Value,
    events: Vec<Event>,
    written: Vec<PathBuf>,
    lines: Vec<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Consolidate(args) => run_consolidate(args, config, cli.audit_db.as_deref()),
        Commands::Confirm(args) => run_confirm(args, config, cli.audit_db.as_deref()),
        Commands::Report(args) => run_report(args, config, cli.audit_db.as_deref()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn read_inputs(paths: &[PathBuf]) -> Result<String> {
    let mut contents = Vec::with_capacity(paths.len());
    for path in paths {
        contents.push(fs::read(path).with_context(|| format!("Failed to read input: {}", path.display()))?);
    }
    Ok(compute_input_digest(&contents))
}

/// Record the run, execute the job in the background, then finish the run
fn execute<F>(command: &str, inputs: &[PathBuf], audit_db: Option<&Path>, job: F) -> Result<()>
where
    F: FnOnce(String) -> Result<CommandOutput> + Send + 'static,
{
    println!("📋 {}", command);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let run = Run::new(command, &read_inputs(inputs)?);
    let mut audit = match audit_db {
        Some(path) => {
            let conn = open_audit_db(path)?;
            record_run(&conn, &run)?;
            Some(conn)
        }
        None => None,
    };

    let run_id = run.run_id.clone();
    let result = spawn_job(command, move || job(run_id))?.wait();

    match result {
        Ok(output) => {
            if let Some(conn) = audit.as_mut() {
                let stored = insert_events(conn, &output.events)?;
                finish_run(conn, &run.run_id, RunStatus::Succeeded, &output.summary)?;
                println!("🗄️  Audit: run {} ({} events)", run.run_id, stored);
            }

            for line in &output.lines {
                println!("✓ {}", line);
            }
            for path in &output.written {
                println!("💾 {}", path.display());
            }
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("✅ {} complete", command);
            Ok(())
        }
        Err(e) => {
            if let Some(conn) = audit.as_ref() {
                finish_run(conn, &run.run_id, RunStatus::Failed, &json!({ "error": format!("{:#}", e) }))?;
            }
            eprintln!("❌ {} failed: {:#}", command, e);
            Err(e)
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn run_consolidate(args: ConsolidateArgs, mut config: PipelineConfig, audit_db: Option<&Path>) -> Result<()> {
    if let Some(prefix) = &args.prefix {
        config.export.prefix = prefix.clone();
    }
    if let Some(code) = args.type_code {
        config.export.violation_type_code = code;
    }

    let mut inputs = vec![args.details.clone()];
    inputs.extend(args.auxiliary.clone());

    execute("consolidate", &inputs, audit_db, move |run_id| {
        let details = load_table(&args.details)?;
        let auxiliary = args.auxiliary.as_deref().map(load_table).transpose()?;
        let source_name = file_name(&args.details);

        let run = consolidate_workbook(&details, auxiliary.as_ref(), &source_name, &config)?;

        let suffix = match args.suffix {
            Some(s) => OutputSuffix::Custom(s),
            None => OutputSuffix::FromFileName,
        }
        .resolve(&source_name, Local::now().date_naive());

        let out_dir = args.out_dir;
        fs::create_dir_all(&out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
        let prefix = &config.export.prefix;
        let outputs = [
            (&run.consolidated, out_dir.join(format!("{}-{}_consolidated.csv", prefix, suffix))),
            (&run.upload, out_dir.join(upload_file_name(prefix, &suffix))),
            (&run.original_type, out_dir.join(original_type_file_name(prefix, &suffix))),
        ];
        for (table, path) in &outputs {
            save_table(table, path)?;
        }

        Ok(CommandOutput {
            lines: vec![
                format!("Input rows: {}", run.input_rows),
                format!("Known bills removed: {}", run.removed.len()),
                format!("Exact merges: {}, partial merges: {}", run.exact, run.partial),
                format!("Output rows: {}", run.consolidated.len()),
                format!("Row diagnostics: {}", run.diagnostics.len()),
            ],
            summary: run.summary_json(),
            events: run.audit_events(&run_id),
            written: outputs.into_iter().map(|(_, p)| p).collect(),
        })
    })
}

fn run_confirm(args: ConfirmArgs, config: PipelineConfig, audit_db: Option<&Path>) -> Result<()> {
    let inputs = [args.details.clone(), args.reference.clone()];

    execute("confirm", &inputs, audit_db, move |run_id| {
        let details = load_table(&args.details)?;
        let reference = load_table(&args.reference)?;

        let engine = match &args.rules {
            Some(path) => DispositionEngine::with_cascades(&config, CascadeSet::from_file(path)?)?,
            None => DispositionEngine::new(&config)?,
        };
        let run = confirm_warnings_with(&engine, &details, &reference, &config)?;

        let suffix = OutputSuffix::Custom(args.suffix.unwrap_or_default())
            .resolve(&file_name(&args.details), Local::now().date_naive());
        fs::create_dir_all(&args.out_dir).with_context(|| format!("Failed to create {}", args.out_dir.display()))?;
        let path = args.out_dir.join(confirmation_file_name(&config.export.confirm_prefix, &suffix));
        save_table(&run.table, &path)?;

        let mut lines = vec![format!("Rows classified: {}", run.records.len())];
        lines.extend(run.rule_hits.iter().map(|(rule, n)| format!("Rule {}: {}", rule, n)));
        lines.push(format!("Prior-type lookup misses: {}", run.lookup_misses));

        Ok(CommandOutput {
            lines,
            summary: classification_summary_json(&run),
            events: classification_events(&run_id, &run),
            written: vec![path],
        })
    })
}

fn run_report(args: ReportArgs, mut config: PipelineConfig, audit_db: Option<&Path>) -> Result<()> {
    if let Some(prefix) = &args.subject_prefix {
        config.dispatch.subject_prefix = prefix.clone();
    }
    if let Some(cc) = &args.cc {
        config.dispatch.cc = cc
            .split(';')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();
    }

    let inputs = [args.source.clone(), args.recipients.clone()];

    execute("report", &inputs, audit_db, move |run_id| {
        let source = load_table(&args.source)?;
        let recipients_table = load_table(&args.recipients)?;
        let recipients = RecipientBook::from_table(&recipients_table, &args.unit_column, &args.address_column)?;

        let mut sink = CsvDirectorySink::new(args.out_dir.join("reports"));
        let mut outbox = OutboxTransport::new(args.out_dir.join("outbox"))?;
        let summary = Dispatcher::new(&config).run(&source, &args.split_column, &recipients, &mut sink, &mut outbox)?;

        let events = summary
            .outcomes
            .iter()
            .map(|(unit, outcome)| {
                Event::new(&run_id, "dispatch", unit, serde_json::to_value(outcome).unwrap_or(Value::Null))
            })
            .collect();

        let mut lines = vec![
            format!("Units: {}", summary.total()),
            format!("Delivered: {}", summary.delivered.len()),
            format!("Skipped (no recipient): {}", summary.skipped.len()),
        ];
        for (unit, outcome) in &summary.outcomes {
            if let UnitOutcome::Failed { error } = outcome {
                lines.push(format!("Failed {}: {}", unit, error));
            }
        }

        Ok(CommandOutput {
            lines,
            summary: json!({
                "units": summary.total(),
                "delivered": summary.delivered,
                "skipped": summary.skipped,
                "failed": summary.failed,
            }),
            events,
            written: vec![args.out_dir.join("reports"), outbox.dir().to_path_buf()],
        })
    })
}
