//! Admin control surface: manifests, escalation retries, finance summary and
//! reconciliation. Every route requires a bearer token with the admin role.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use gavel_core::error::GavelError;
use gavel_core::types::{AuctionId, ManifestId};

use gavel_settlement::reconcile;
use gavel_store::{manifests, ManifestRow};

use crate::auth::{bearer_token, AuthedUser};
use crate::GatewayState;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/admin/manifests", get(list_manifests))
        .route("/admin/manifests/{id}", get(get_manifest))
        .route("/admin/manifests/{id}/retry", post(retry_manifest))
        .route("/admin/finance", get(finance))
        .route("/admin/reconciliation/{auction_id}", get(reconciliation))
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AdminManifest {
    id: String,
    auction_id: String,
    status: gavel_core::status::ManifestStatus,
    items: serde_json::Value,
    items_total: i32,
    items_acknowledged: i32,
    expires_at: gavel_core::types::Timestamp,
    created_at: gavel_core::types::Timestamp,
    completed_at: Option<gavel_core::types::Timestamp>,
    escalation_reason: Option<String>,
}

impl From<ManifestRow> for AdminManifest {
    fn from(row: ManifestRow) -> Self {
        Self {
            id: row.id.to_string(),
            auction_id: row.auction_id.to_string(),
            status: row.status,
            items: row.items,
            items_total: row.items_total,
            items_acknowledged: row.items_acknowledged,
            expires_at: row.expires_at,
            created_at: row.created_at,
            completed_at: row.completed_at,
            escalation_reason: row.escalation_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

// ── Error mapping ────────────────────────────────────────────────────────────

fn error_response(e: GavelError) -> Response {
    let status = match &e {
        GavelError::Auth(_) => StatusCode::UNAUTHORIZED,
        GavelError::Forbidden => StatusCode::FORBIDDEN,
        GavelError::AuctionNotFound | GavelError::ManifestNotFound => StatusCode::NOT_FOUND,
        GavelError::IllegalTransition { .. } | GavelError::ManifestExists => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

fn require_admin(state: &GatewayState, headers: &HeaderMap) -> Result<AuthedUser, GavelError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GavelError::Auth("missing authorization header".into()))?;
    let token = bearer_token(header).ok_or_else(|| GavelError::Auth("malformed bearer token".into()))?;
    state.auth.verify_admin(token)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn list_manifests(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(page): Query<PageParams>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return error_response(e);
    }
    match manifests::list(&state.pool, page.limit, page.offset).await {
        Ok(rows) => {
            let out: Vec<AdminManifest> = rows.into_iter().map(Into::into).collect();
            Json(out).into_response()
        }
        Err(e) => error_response(e.into()),
    }
}

async fn get_manifest(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return error_response(e);
    }
    let Ok(id) = id.parse::<ManifestId>() else {
        return error_response(GavelError::ManifestNotFound);
    };
    match manifests::get(&state.pool, id).await {
        Ok(Some(row)) => Json(AdminManifest::from(row)).into_response(),
        Ok(None) => error_response(GavelError::ManifestNotFound),
        Err(e) => error_response(e.into()),
    }
}

async fn retry_manifest(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return error_response(e);
    }
    let Ok(id) = id.parse::<ManifestId>() else {
        return error_response(GavelError::ManifestNotFound);
    };
    match state.settlement.retry_escalated(id).await {
        Ok(row) => Json(AdminManifest::from(row)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn finance(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return error_response(e);
    }
    match reconcile::finance_summary(&state.pool).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reconciliation(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Path(auction_id): Path<String>,
) -> Response {
    if let Err(e) = require_admin(&state, &headers) {
        return error_response(e);
    }
    let Ok(auction_id) = auction_id.parse::<AuctionId>() else {
        return error_response(GavelError::AuctionNotFound);
    };
    match reconcile::reconcile_auction(&state.pool, auction_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}
