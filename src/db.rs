// 🗄️ Audit Store - Every pipeline run and its decisions, as events
// SQLite (WAL) with two tables: runs (one row per command) and events (append-only).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One CLI/server command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub command: String,

    /// SHA-256 over the input bytes
    pub input_digest: String,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,

    /// Stage totals, filled in by `finish_run`
    pub summary: serde_json::Value,
}

impl Run {
    pub fn new(command: &str, input_digest: &str) -> Self {
        Run {
            run_id: uuid::Uuid::new_v4().to_string(),
            command: command.to_string(),
            input_digest: input_digest.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            summary: serde_json::Value::Null,
        }
    }
}

/// Hex SHA-256 of the concatenated inputs
pub fn compute_input_digest<I, B>(inputs: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(input.as_ref());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// EVENT
// ============================================================================

/// Decision or milestone inside a run (merge, removal, disposition, dispatch)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(run_id: &str, event_type: &str, entity_id: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            command TEXT NOT NULL,
            input_digest TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at)",
        [],
    )?;

    Ok(())
}

/// Open (or create) the audit database and ensure the schema
pub fn open_audit_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open audit database: {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// WRITES
// ============================================================================

pub fn record_run(conn: &Connection, run: &Run) -> Result<()> {
    conn.execute(
        "INSERT INTO runs (run_id, command, input_digest, started_at, finished_at, status, summary)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run.run_id,
            run.command,
            run.input_digest,
            run.started_at.to_rfc3339(),
            run.finished_at.map(|dt| dt.to_rfc3339()),
            run.status.as_str(),
            serde_json::to_string(&run.summary)?,
        ],
    )?;
    Ok(())
}

pub fn finish_run(
    conn: &Connection,
    run_id: &str,
    status: RunStatus,
    summary: &serde_json::Value,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE runs SET finished_at = ?1, status = ?2, summary = ?3 WHERE run_id = ?4",
        params![
            Utc::now().to_rfc3339(),
            status.as_str(),
            serde_json::to_string(summary)?,
            run_id
        ],
    )?;

    if updated == 0 {
        anyhow::bail!("Unknown run: {}", run_id);
    }
    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, run_id, timestamp, event_type, entity_id, data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.event_id,
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_id,
            data_json,
        ],
    )?;

    Ok(())
}

/// Insert a batch of events in one transaction
pub fn insert_events(conn: &mut Connection, events: &[Event]) -> Result<usize> {
    let tx = conn.transaction()?;
    for event in events {
        insert_event(&tx, event)?;
    }
    tx.commit()?;
    Ok(events.len())
}

// ============================================================================
// READS
// ============================================================================

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json(idx: usize, value: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let started_at: String = row.get(3)?;
    let finished_at: Option<String> = row.get(4)?;
    let status: String = row.get(5)?;
    let summary: String = row.get(6)?;

    Ok(Run {
        run_id: row.get(0)?,
        command: row.get(1)?,
        input_digest: row.get(2)?,
        started_at: parse_timestamp(3, &started_at)?,
        finished_at: finished_at.as_deref().map(|s| parse_timestamp(4, s)).transpose()?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        summary: parse_json(6, &summary)?,
    })
}

/// Most recent runs first
pub fn get_runs(conn: &Connection, limit: usize) -> Result<Vec<Run>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, command, input_digest, started_at, finished_at, status, summary
         FROM runs
         ORDER BY started_at DESC, id DESC
         LIMIT ?1",
    )?;

    let runs = stmt
        .query_map(params![limit as i64], run_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<Run>> {
    let run = conn
        .query_row(
            "SELECT run_id, command, input_digest, started_at, finished_at, status, summary
             FROM runs WHERE run_id = ?1",
            params![run_id],
            run_from_row,
        )
        .optional()?;
    Ok(run)
}

/// Events of one run, in insertion order
pub fn get_events_for_run(conn: &Connection, run_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, run_id, timestamp, event_type, entity_id, data
         FROM events
         WHERE run_id = ?1
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![run_id], |row| {
            let timestamp_str: String = row.get(2)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                run_id: row.get(1)?,
                timestamp: parse_timestamp(2, &timestamp_str)?,
                event_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: parse_json(5, &data_json)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================
