//! Bids are append-only: this module exposes inserts and reads, nothing
//! else, and the schema trigger backs that up.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use gavel_core::status::RejectReason;
use gavel_core::types::{AuctionId, UserId};

use crate::models::BidRow;

pub struct NewBid {
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub reference_price: Decimal,
    pub idempotency_key: String,
    pub client_sent_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
}

/// Idempotency fast-path lookup (no lock held).
pub async fn find_by_idempotency_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<BidRow>, sqlx::Error> {
    sqlx::query_as::<_, BidRow>("SELECT * FROM bids WHERE idempotency_key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// In-transaction idempotency re-check, guarding the race where two retries
/// both pass the fast-path.
pub async fn find_by_idempotency_key_tx(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> Result<Option<BidRow>, sqlx::Error> {
    sqlx::query_as::<_, BidRow>("SELECT * FROM bids WHERE idempotency_key = $1")
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
}

/// (auction_id, amount) uniqueness pre-check. The UNIQUE constraint remains
/// the ultimate guard at insert.
pub async fn amount_exists_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
    amount: Decimal,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM bids WHERE auction_id = $1 AND amount = $2)")
        .bind(auction_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await
}

/// Append the accepted bid. `server_ts` is assigned by the database and is
/// authoritative for ordering.
pub async fn insert_tx(
    tx: &mut Transaction<'_, Postgres>,
    bid: &NewBid,
) -> Result<BidRow, sqlx::Error> {
    sqlx::query_as::<_, BidRow>(
        r#"
        INSERT INTO bids (auction_id, user_id, amount, reference_price,
                          idempotency_key, client_sent_at, ip)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(bid.auction_id)
    .bind(bid.user_id)
    .bind(bid.amount)
    .bind(bid.reference_price)
    .bind(&bid.idempotency_key)
    .bind(bid.client_sent_at)
    .bind(&bid.ip)
    .fetch_one(&mut **tx)
    .await
}

/// The winning bid: highest amount, earliest server_ts at equal amount. The
/// amount tie cannot occur given insert uniqueness; the server_ts tie-break
/// is defensive.
pub async fn winning_bid_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
) -> Result<Option<BidRow>, sqlx::Error> {
    sqlx::query_as::<_, BidRow>(
        r#"
        SELECT * FROM bids
        WHERE auction_id = $1
        ORDER BY amount DESC, server_ts ASC
        LIMIT 1
        "#,
    )
    .bind(auction_id)
    .fetch_optional(&mut **tx)
    .await
}

/// Every accepted bid for one auction in server-timestamp order
/// (reconciliation input).
pub async fn for_auction(
    pool: &PgPool,
    auction_id: AuctionId,
) -> Result<Vec<BidRow>, sqlx::Error> {
    sqlx::query_as::<_, BidRow>("SELECT * FROM bids WHERE auction_id = $1 ORDER BY server_ts")
        .bind(auction_id)
        .fetch_all(pool)
        .await
}

/// Accepted bids up to and including one server timestamp, in order. Input
/// for rebuilding the acceptance response of an idempotent replay.
pub async fn for_auction_up_to(
    pool: &PgPool,
    auction_id: AuctionId,
    server_ts: DateTime<Utc>,
) -> Result<Vec<BidRow>, sqlx::Error> {
    sqlx::query_as::<_, BidRow>(
        "SELECT * FROM bids WHERE auction_id = $1 AND server_ts <= $2 ORDER BY server_ts",
    )
    .bind(auction_id)
    .bind(server_ts)
    .fetch_all(pool)
    .await
}

/// Append-only audit of a refused bid, written in the same transaction as
/// the refusal decision.
#[allow(clippy::too_many_arguments)]
pub async fn insert_rejection_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
    user_id: UserId,
    amount: Option<Decimal>,
    reference_price: Option<Decimal>,
    reason: RejectReason,
    detail: Option<String>,
    ip: Option<String>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO bid_rejections (auction_id, user_id, amount, reference_price,
                                    reason, detail, ip)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(auction_id)
    .bind(user_id)
    .bind(amount)
    .bind(reference_price)
    .bind(reason.as_str())
    .bind(detail)
    .bind(ip)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// True when a unique-constraint violation came from the (auction, amount)
/// or idempotency-key constraint.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }
}
