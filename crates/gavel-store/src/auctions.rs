//! Auction row access. Lifecycle and settlement writers go through the
//! `_tx` functions, which take `FOR UPDATE`; the bid path additionally
//! relies on the optimistic `version` column.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use gavel_core::status::AuctionStatus;
use gavel_core::types::{AuctionId, BidId, UserId};

use crate::models::AuctionRow;

pub async fn get(pool: &PgPool, id: AuctionId) -> Result<Option<AuctionRow>, sqlx::Error> {
    sqlx::query_as::<_, AuctionRow>("SELECT * FROM auctions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Pessimistic read; must run inside a transaction.
pub async fn get_for_update_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
) -> Result<Option<AuctionRow>, sqlx::Error> {
    sqlx::query_as::<_, AuctionRow>("SELECT * FROM auctions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

/// Auctions whose effective end has passed and that still need ending.
pub async fn find_due_for_ending(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<AuctionRow>, sqlx::Error> {
    sqlx::query_as::<_, AuctionRow>(
        r#"
        SELECT * FROM auctions
        WHERE status IN ('LIVE', 'ENDING')
          AND $1 >= COALESCE(extended_until, scheduled_end)
        ORDER BY scheduled_end
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
}

/// Auctions awaiting settlement initiation.
pub async fn find_ended(pool: &PgPool) -> Result<Vec<AuctionRow>, sqlx::Error> {
    sqlx::query_as::<_, AuctionRow>("SELECT * FROM auctions WHERE status = 'ENDED' ORDER BY ended_at")
        .fetch_all(pool)
        .await
}

/// Bid acceptance price bump: optimistic `WHERE version = prior`. Returns the
/// number of rows updated; zero means a concurrent writer won.
pub async fn apply_bid_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
    amount: Decimal,
    prior_version: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE auctions
        SET current_price = $1,
            bid_count = bid_count + 1,
            version = version + 1,
            updated_at = now()
        WHERE id = $2 AND version = $3
        "#,
    )
    .bind(amount)
    .bind(id)
    .bind(prior_version)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Anti-sniping clock restart.
pub async fn extend_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
    until: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE auctions SET extended_until = $1, updated_at = now() WHERE id = $2")
        .bind(until)
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Guarded status move: `WHERE status = from`. Returns rows updated.
pub async fn set_status_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
    from: AuctionStatus,
    to: AuctionStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE auctions SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

/// Freeze the terminal auction result. After this commit, final_price,
/// winner_id, winner_bid_id and ended_at never change.
pub async fn mark_ended_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
    ended_at: DateTime<Utc>,
    final_price: Option<Decimal>,
    winner_id: Option<UserId>,
    winner_bid_id: Option<BidId>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE auctions
        SET status = 'ENDED',
            ended_at = $1,
            final_price = $2,
            winner_id = $3,
            winner_bid_id = $4,
            updated_at = now()
        WHERE id = $5 AND status = 'ENDING'
        "#,
    )
    .bind(ended_at)
    .bind(final_price)
    .bind(winner_id)
    .bind(winner_bid_id)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Merge a settlement audit blob into settlement_metadata.
pub async fn set_settlement_metadata_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: AuctionId,
    metadata: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE auctions
        SET settlement_metadata = COALESCE(settlement_metadata, '{}'::jsonb) || $1,
            updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(metadata)
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
