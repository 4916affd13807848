//! Append-only audit trails and refund records. Every deposit status change
//! writes exactly one transition and one ledger event in the same
//! transaction as the deposit UPDATE; amending an entry is not an API that
//! exists.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use gavel_core::status::DepositStatus;
use gavel_core::types::DepositId;

use crate::models::RefundRow;

pub async fn insert_transition_tx(
    tx: &mut Transaction<'_, Postgres>,
    deposit_id: DepositId,
    from: DepositStatus,
    to: DepositStatus,
    event: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO deposit_transitions (deposit_id, from_status, to_status, event)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(deposit_id)
    .bind(from)
    .bind(to)
    .bind(event)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_ledger_tx(
    tx: &mut Transaction<'_, Postgres>,
    deposit_id: DepositId,
    event: &str,
    amount: Decimal,
    currency: &str,
    metadata: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_ledger (deposit_id, event, amount, currency, metadata)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(deposit_id)
    .bind(event)
    .bind(amount)
    .bind(currency)
    .bind(metadata)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Count of ledger events of one kind for one deposit (reconciliation).
pub async fn count_events(
    pool: &PgPool,
    deposit_id: DepositId,
    event: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT count(*) FROM payment_ledger WHERE deposit_id = $1 AND event = $2")
        .bind(deposit_id)
        .bind(event)
        .fetch_one(pool)
        .await
}

/// Event ordering check input: created_at of the first event of each kind.
pub async fn first_event_at(
    pool: &PgPool,
    deposit_id: DepositId,
    event: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT min(created_at) FROM payment_ledger
        WHERE deposit_id = $1 AND event = $2
        "#,
    )
    .bind(deposit_id)
    .bind(event)
    .fetch_one(pool)
    .await
}

pub async fn any_negative_amount(
    pool: &PgPool,
    auction_deposits: &[DepositId],
) -> Result<bool, sqlx::Error> {
    let raw: Vec<uuid::Uuid> = auction_deposits.iter().map(|d| d.0).collect();
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM payment_ledger WHERE deposit_id = ANY($1) AND amount < 0)",
    )
    .bind(&raw)
    .fetch_one(pool)
    .await
}

// ── Refunds ──────────────────────────────────────────────────────────────────

/// One record per refund idempotency key; a replayed initiation is a no-op.
pub async fn insert_refund_tx(
    tx: &mut Transaction<'_, Postgres>,
    deposit_id: DepositId,
    idempotency_key: &str,
    amount: Decimal,
    currency: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO refunds (deposit_id, idempotency_key, amount, currency)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(deposit_id)
    .bind(idempotency_key)
    .bind(amount)
    .bind(currency)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn complete_refund_tx(
    tx: &mut Transaction<'_, Postgres>,
    idempotency_key: &str,
    pos_refund_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE refunds
        SET status = 'completed', completed_at = now(), pos_refund_id = $1
        WHERE idempotency_key = $2
        "#,
    )
    .bind(pos_refund_id)
    .bind(idempotency_key)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_refund(
    pool: &PgPool,
    idempotency_key: &str,
) -> Result<Option<RefundRow>, sqlx::Error> {
    sqlx::query_as::<_, RefundRow>("SELECT * FROM refunds WHERE idempotency_key = $1")
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await
}
