// Warning Consolidation - Web Server
// REST API with Axum: consolidation over HTTP plus read access to the audit store

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use warning_consolidation::db::{
    compute_input_digest, finish_run, get_events_for_run, get_run, get_runs, insert_events, open_audit_db, record_run,
};
use warning_consolidation::logging::init_tracing;
use warning_consolidation::{
    consolidate_workbook, read_csv, write_csv, Diagnostic, Event, PipelineConfig, Run, RunStatus, Table,
};

const SOURCE_FILE_HEADER: &str = "x-source-file";

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    config: Arc<PipelineConfig>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    error!(status = %status, "{}", message);
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

fn lock_db(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, String> {
    db.lock().map_err(|_| "Audit database lock poisoned".to_string())
}

/// Consolidation result returned to the caller
#[derive(Serialize)]
struct ConsolidateResponse {
    run_id: String,
    summary: Value,
    consolidated_csv: String,
    upload_csv: String,
    original_type_csv: String,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<usize>,
}

fn table_to_csv(table: &Table) -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    write_csv(table, &mut buffer)?;
    String::from_utf8(buffer).context("CSV output is not UTF-8")
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// POST /api/consolidate - CSV body; X-Source-File carries the url-encoded file name
async fn consolidate(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let source_name = headers
        .get(SOURCE_FILE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|raw| {
            urlencoding::decode(raw)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| raw.to_string())
        })
        .unwrap_or_default();

    let task = tokio::task::spawn_blocking(move || run_consolidation(&state, &source_name, body));

    match task.await {
        Ok(Ok(response)) => ApiResponse::ok(response),
        Ok(Err(e)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("{:#}", e)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Consolidation task failed: {}", e)),
    }
}

fn run_consolidation(state: &AppState, source_name: &str, body: String) -> anyhow::Result<ConsolidateResponse> {
    let run = Run::new("consolidate", &compute_input_digest([body.as_bytes()]));
    {
        let conn = lock_db(&state.db).map_err(anyhow::Error::msg)?;
        record_run(&conn, &run)?;
    }

    let result = read_csv("details", body.as_bytes())
        .map_err(anyhow::Error::from)
        .and_then(|details| Ok(consolidate_workbook(&details, None, source_name, &state.config)?));

    let mut conn = lock_db(&state.db).map_err(anyhow::Error::msg)?;
    match result {
        Ok(outcome) => {
            let events: Vec<Event> = outcome.audit_events(&run.run_id);
            insert_events(&mut conn, &events)?;
            finish_run(&conn, &run.run_id, RunStatus::Succeeded, &outcome.summary_json())?;
            info!(run_id = %run.run_id, source = %source_name, "Consolidation served");

            Ok(ConsolidateResponse {
                run_id: run.run_id,
                summary: outcome.summary_json(),
                consolidated_csv: table_to_csv(&outcome.consolidated)?,
                upload_csv: table_to_csv(&outcome.upload)?,
                original_type_csv: table_to_csv(&outcome.original_type)?,
                diagnostics: outcome.diagnostics,
            })
        }
        Err(e) => {
            finish_run(
                &conn,
                &run.run_id,
                RunStatus::Failed,
                &serde_json::json!({ "error": format!("{:#}", e) }),
            )?;
            Err(e)
        }
    }
}

/// GET /api/runs - Most recent runs first
async fn list_runs(State(state): State<AppState>, Query(query): Query<RunsQuery>) -> Response {
    let conn = match lock_db(&state.db) {
        Ok(conn) => conn,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    match get_runs(&conn, query.limit.unwrap_or(50)) {
        Ok(runs) => ApiResponse::ok(runs),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error getting runs: {}", e)),
    }
}

/// GET /api/runs/:run_id - One run with its status and summary
async fn run_detail(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let conn = match lock_db(&state.db) {
        Ok(conn) => conn,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    match get_run(&conn, &run_id) {
        Ok(Some(run)) => ApiResponse::ok(run),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Run not found: {}", run_id)),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error getting run {}: {}", run_id, e),
        ),
    }
}

/// GET /api/runs/:run_id/events - Audit trail of one run
async fn run_events(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let conn = match lock_db(&state.db) {
        Ok(conn) => conn,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    match get_events_for_run(&conn, &run_id) {
        Ok(events) => ApiResponse::ok(events),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error getting events for run {}: {}", run_id, e),
        ),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    println!("🌐 Warning Consolidation - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = match std::env::var("WARNING_CONFIG") {
        Ok(path) => PipelineConfig::from_file(&path)?,
        Err(_) => PipelineConfig::default(),
    };

    let db_path = std::env::var("WARNING_AUDIT_DB").unwrap_or_else(|_| "warning-audit.db".to_string());
    let conn = open_audit_db(std::path::Path::new(&db_path))?;
    println!("✓ Audit database opened: {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        config: Arc::new(config),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/consolidate", post(consolidate))
        .route("/runs", get(list_runs))
        .route("/runs/:run_id", get(run_detail))
        .route("/runs/:run_id/events", get(run_events))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("WARNING_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/runs", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server stopped with an error")?;
    Ok(())
}
