use crate::server::SharedState;
use crate::session::Session;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::instrument;

/// Upgrades the request and hands the socket to a dedicated session loop.
/// Each connection runs on its own task; a failing session never affects
/// another.
#[instrument(skip(ws, state))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        Session::new(state.pipeline.clone(), state.metrics.clone()).run(socket)
    })
}
