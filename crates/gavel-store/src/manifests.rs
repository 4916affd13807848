//! Settlement manifest persistence. The items document is opaque here:
//! whole-document writes under the per-auction settlement lock, which is the
//! only writer.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use gavel_core::status::ManifestStatus;
use gavel_core::types::{AuctionId, ManifestId};

use crate::models::ManifestRow;

/// Create the manifest. UNIQUE (auction_id) is the ultimate duplicate guard;
/// callers should check [`exists_tx`] first for a clean error.
pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
    items: &serde_json::Value,
    items_total: i32,
    expires_at: DateTime<Utc>,
) -> Result<ManifestRow, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>(
        r#"
        INSERT INTO settlement_manifests (auction_id, items, items_total, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(auction_id)
    .bind(items)
    .bind(items_total)
    .bind(expires_at)
    .fetch_one(&mut **tx)
    .await
}

pub async fn exists_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settlement_manifests WHERE auction_id = $1)")
        .bind(auction_id)
        .fetch_one(&mut **tx)
        .await
}

pub async fn get_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: ManifestId,
) -> Result<Option<ManifestRow>, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>("SELECT * FROM settlement_manifests WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn get(pool: &PgPool, id: ManifestId) -> Result<Option<ManifestRow>, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>("SELECT * FROM settlement_manifests WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_by_auction(
    pool: &PgPool,
    auction_id: AuctionId,
) -> Result<Option<ManifestRow>, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>("SELECT * FROM settlement_manifests WHERE auction_id = $1")
        .bind(auction_id)
        .fetch_optional(pool)
        .await
}

pub async fn find_active(pool: &PgPool) -> Result<Vec<ManifestRow>, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>(
        "SELECT * FROM settlement_manifests WHERE status = 'ACTIVE' ORDER BY created_at",
    )
    .fetch_all(pool)
    .await
}

pub async fn list(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<ManifestRow>, sqlx::Error> {
    sqlx::query_as::<_, ManifestRow>(
        "SELECT * FROM settlement_manifests ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit.min(200))
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Whole-document item write; crash safety between items depends on this
/// being called after every processed item.
pub async fn persist_items(
    pool: &PgPool,
    id: ManifestId,
    items: &serde_json::Value,
    items_acknowledged: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE settlement_manifests SET items = $1, items_acknowledged = $2 WHERE id = $3",
    )
    .bind(items)
    .bind(items_acknowledged)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn complete_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: ManifestId,
    items: &serde_json::Value,
    items_acknowledged: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE settlement_manifests
        SET status = 'COMPLETED', items = $1, items_acknowledged = $2, completed_at = now()
        WHERE id = $3 AND status = 'ACTIVE'
        "#,
    )
    .bind(items)
    .bind(items_acknowledged)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Terminal failure branches: ESCALATED (three strikes, memory safety) or
/// EXPIRED (48-hour horizon).
pub async fn finalize_failure_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: ManifestId,
    status: ManifestStatus,
    items: &serde_json::Value,
    items_acknowledged: i32,
    reason: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE settlement_manifests
        SET status = $1, items = $2, items_acknowledged = $3, escalation_reason = $4
        WHERE id = $5 AND status = 'ACTIVE'
        "#,
    )
    .bind(status)
    .bind(items)
    .bind(items_acknowledged)
    .bind(reason)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Admin retry: ESCALATED back to ACTIVE with the reset item document.
pub async fn reactivate_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: ManifestId,
    items: &serde_json::Value,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE settlement_manifests
        SET status = 'ACTIVE', items = $1, escalation_reason = NULL
        WHERE id = $2 AND status = 'ESCALATED'
        "#,
    )
    .bind(items)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Manifest count for one auction; the UNIQUE constraint makes >1 a schema
/// breach, which reconciliation still asserts.
pub async fn count_for_auction(pool: &PgPool, auction_id: AuctionId) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT count(*) FROM settlement_manifests WHERE auction_id = $1")
        .bind(auction_id)
        .fetch_one(pool)
        .await
}

/// Count of ACTIVE manifests, reported as the backlog gauge.
pub async fn count_active(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT count(*) FROM settlement_manifests WHERE status = 'ACTIVE'")
        .fetch_one(pool)
        .await
}
