use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use common::SchedulerCommand;

use crate::{auth::require_auth, AppState};

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/timeframes", get(list_timeframes))
        .route("/api/timeframes/:name", get(get_timeframe))
        .route("/api/timeframes/:name/tick", post(tick))
        .route("/api/timeframes/:name/activate", post(activate))
        .route("/api/timeframes/:name/deactivate", post(deactivate))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Results ──────────────────────────────────────────────────────────────────

/// Every declared timeframe with its latest snapshot, `null` before the first tick.
async fn list_timeframes(State(state): State<AppState>) -> Json<Value> {
    let board = state.scheduler.board();
    let mut timeframes = Vec::with_capacity(state.scheduler.timeframes().len());
    for name in state.scheduler.timeframes() {
        timeframes.push(json!({
            "name": name,
            "snapshot": board.get(name).await,
        }));
    }
    Json(json!({ "timeframes": timeframes }))
}

async fn get_timeframe(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !is_declared(&state, &name) {
        return not_found(&name);
    }
    let snapshot = state.scheduler.board().get(&name).await;
    (StatusCode::OK, Json(json!({ "name": name, "snapshot": snapshot })))
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn tick(state: State<AppState>, name: Path<String>) -> (StatusCode, Json<Value>) {
    command(state, name, SchedulerCommand::Tick).await
}

async fn activate(state: State<AppState>, name: Path<String>) -> (StatusCode, Json<Value>) {
    command(state, name, SchedulerCommand::Activate).await
}

async fn deactivate(state: State<AppState>, name: Path<String>) -> (StatusCode, Json<Value>) {
    command(state, name, SchedulerCommand::Deactivate).await
}

async fn command(
    State(state): State<AppState>,
    Path(name): Path<String>,
    make: fn(String) -> SchedulerCommand,
) -> (StatusCode, Json<Value>) {
    if !is_declared(&state, &name) {
        return not_found(&name);
    }
    let cmd = make(name);
    info!(?cmd, "Command received via API");
    state.scheduler.send(cmd).await;
    (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
}

fn is_declared(state: &AppState, name: &str) -> bool {
    state.scheduler.timeframes().iter().any(|t| t == name)
}

fn not_found(name: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown timeframe '{name}'") })),
    )
}
