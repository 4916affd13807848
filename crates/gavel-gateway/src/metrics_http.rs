//! Metrics exposition and liveness.

use std::sync::Arc;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use gavel_core::metrics;

use crate::GatewayState;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .route("/healthz", get(healthz))
}

async fn serve_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}

async fn healthz() -> &'static str {
    "ok"
}
