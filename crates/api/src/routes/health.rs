use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let ticked = state.scheduler.board().all().await.len();
    Json(json!({
        "status": "ok",
        "timeframes": state.scheduler.timeframes().len(),
        "ticked": ticked,
    }))
}
