//! Deposit access. Status writers must hold `FOR UPDATE` and state the
//! expected source status; the schema trigger rejects anything illegal that
//! slips through.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use gavel_core::status::DepositStatus;
use gavel_core::types::DepositId;

use crate::models::DepositRow;

pub async fn get(pool: &PgPool, id: DepositId) -> Result<Option<DepositRow>, sqlx::Error> {
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: DepositId,
) -> Result<Option<DepositRow>, sqlx::Error> {
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn get_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: DepositId,
) -> Result<Option<DepositRow>, sqlx::Error> {
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

/// Batch read for manifest construction.
pub async fn batch_get(
    pool: &PgPool,
    ids: &[DepositId],
) -> Result<Vec<DepositRow>, sqlx::Error> {
    let raw: Vec<Uuid> = ids.iter().map(|d| d.0).collect();
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = ANY($1)")
        .bind(&raw)
        .fetch_all(pool)
        .await
}

/// Batch read inside the settlement-initiation transaction.
pub async fn batch_get_tx(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[DepositId],
) -> Result<Vec<DepositRow>, sqlx::Error> {
    let raw: Vec<Uuid> = ids.iter().map(|d| d.0).collect();
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE id = ANY($1)")
        .bind(&raw)
        .fetch_all(&mut **tx)
        .await
}

/// Source-state-checked transition: `WHERE id = $1 AND status = from`.
/// Returns rows updated; zero means the deposit was not in `from` anymore.
pub async fn transition_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: DepositId,
    from: DepositStatus,
    to: DepositStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE deposits SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// All deposits attached to one auction (reconciliation and finance views).
pub async fn for_auction(
    pool: &PgPool,
    auction_id: gavel_core::types::AuctionId,
) -> Result<Vec<DepositRow>, sqlx::Error> {
    sqlx::query_as::<_, DepositRow>("SELECT * FROM deposits WHERE auction_id = $1")
        .bind(auction_id)
        .fetch_all(pool)
        .await
}
