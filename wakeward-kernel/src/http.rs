/**
 * HTTP API - control surface of the panel
 *
 * ROUTES :
 * - GET  /health        liveness, always open
 * - GET  /api/status    reconciled device state + pending schedule + policy window
 * - POST /api/control   {"action": "turn_on" | "turn_off" | "schedule_off" | "cancel_schedule"}
 * - GET  /api/logs      ?type=activity|system&limit=N
 *
 * SECURITY :
 * When WAKEWARD_API_KEY is set, every /api route needs a matching x-api-key header.
 * Without it the API is open to anyone who can reach the bind address.
 *
 * Control outcomes always answer 200 with a `success` field.
 */

use crate::activity::JsonlActivityLog;
use crate::control::{ControlAction, ControlPanel, ControlResponse, StatusReport};
use crate::diagnostics::recent_system_lines;
use axum::body::Bytes;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub panel: ControlPanel,
    pub activity: Arc<JsonlActivityLog>,
    pub system_log: PathBuf,
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogParams {
    #[serde(rename = "type", default = "default_log_type")]
    log_type: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_log_type() -> String {
    "activity".into()
}

fn default_limit() -> usize {
    100
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if !req.uri().path().starts_with("/api") {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("rejected {} without valid API key", req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/status", get(get_status))
        .route("/api/control", post(control))
        .route("/api/logs", get(get_logs))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /api/status
async fn get_status(State(app): State<AppState>) -> Json<StatusReport> {
    Json(app.panel.status().await)
}

// POST /api/control
async fn control(State(app): State<AppState>, body: Bytes) -> Json<ControlResponse> {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let action_name = body
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    info!("control action '{action_name}' requested");

    match serde_json::from_value::<ControlAction>(body) {
        Ok(action) => Json(app.panel.dispatch(action).await),
        Err(_) => Json(app.panel.reject_invalid(&action_name)),
    }
}

// GET /api/logs
async fn get_logs(State(app): State<AppState>, Query(params): Query<LogParams>) -> Json<Value> {
    match params.log_type.as_str() {
        "activity" => match app.activity.recent(params.limit) {
            Ok(records) => Json(json!(records)),
            Err(e) => {
                error!("error reading activity logs: {e}");
                Json(json!({ "error": e.to_string() }))
            }
        },
        "system" => match recent_system_lines(&app.system_log, params.limit) {
            Ok(lines) => Json(json!(lines)),
            Err(e) => {
                error!("error reading system logs: {e}");
                Json(json!({ "error": e.to_string() }))
            }
        },
        _ => Json(json!({ "error": "Invalid log type" })),
    }
}
