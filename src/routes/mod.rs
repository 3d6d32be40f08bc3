mod health;
mod metrics;
mod ws;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthcheck", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
