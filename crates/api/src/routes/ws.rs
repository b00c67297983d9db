use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use common::{ResultsBoard, TimeframeResult};

use crate::{auth::token_matches, AppState};

pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/signals", get(ws_signals_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket endpoint that streams every result-ready event with its snapshot.
/// Auth via query param `?token=<DASHBOARD_TOKEN>` (header auth not supported
/// in browser WebSocket API).
async fn ws_signals_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> Response {
    if !token_matches(q.token.as_deref(), &state.dashboard_token) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let board = state.scheduler.board().clone();
    let results_rx = state.scheduler.subscribe_results();
    ws.on_upgrade(move |socket| handle_ws(socket, results_rx, board))
}

async fn handle_ws(
    mut socket: WebSocket,
    mut results_rx: broadcast::Receiver<TimeframeResult>,
    board: ResultsBoard,
) {
    // Current state first so the client does not wait for the next tick
    for snapshot in board.all().await {
        let line = json!({ "snapshot": snapshot }).to_string();
        if socket.send(Message::Text(line)).await.is_err() {
            return;
        }
    }

    loop {
        match results_rx.recv().await {
            Ok(event) => {
                let snapshot = board.get(&event.timeframe).await;
                let line = json!({ "event": event, "snapshot": snapshot }).to_string();
                if socket.send(Message::Text(line)).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                warn!(dropped = n, "WebSocket signal client lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
