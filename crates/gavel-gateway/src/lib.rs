//! WebSocket gateway and admin control surface.
//!
//! Token-verified room membership, bid ingress with fail-closed rate
//! limiting, engine-event broadcast via the pub/sub fabric, and the
//! admin-role HTTP surface (manifests, retries, finance, reconciliation).

pub mod admin;
pub mod auth;
pub mod metrics_http;
pub mod rooms;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use gavel_core::error::GavelError;
use gavel_core::Config;
use gavel_engine::BidService;
use gavel_kv::{EventPublisher, KvStore};
use gavel_settlement::SettlementService;

use auth::AuthVerifier;
use rooms::RoomRegistry;

pub struct GatewayState {
    pub pool: PgPool,
    pub kv: KvStore,
    pub bids: BidService,
    pub settlement: Arc<SettlementService>,
    pub publisher: EventPublisher,
    pub rooms: Arc<RoomRegistry>,
    pub auth: AuthVerifier,
}

/// Build the full HTTP surface: WebSocket ingress, admin routes, metrics and
/// liveness, with CORS pinned to the configured origin.
pub fn router(state: Arc<GatewayState>, config: &Config) -> Result<Router, GavelError> {
    let cors = if config.cors_origin.trim() == "*" {
        // Refused at startup in production; permissive only for local dev.
        CorsLayer::new().allow_methods(Any).allow_origin(Any).allow_headers(Any)
    } else {
        let origin: HeaderValue = config
            .cors_origin
            .parse()
            .map_err(|_| GavelError::Config(format!("invalid CORS origin {}", config.cors_origin)))?;
        CorsLayer::new().allow_origin(origin)
    };

    Ok(Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(admin::router())
        .merge(metrics_http::router())
        .layer(cors)
        .with_state(state))
}
