//! Participant eligibility and consent reads. Registration itself belongs to
//! the listing subsystem; the engine only checks.

use sqlx::{PgPool, Postgres, Transaction};

use gavel_core::types::{AuctionId, UserId};

use crate::models::ParticipantRow;

pub async fn get_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
    user_id: UserId,
) -> Result<Option<ParticipantRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM auction_participants WHERE auction_id = $1 AND user_id = $2",
    )
    .bind(auction_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn get(
    pool: &PgPool,
    auction_id: AuctionId,
    user_id: UserId,
) -> Result<Option<ParticipantRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM auction_participants WHERE auction_id = $1 AND user_id = $2",
    )
    .bind(auction_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn has_consent_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
    user_id: UserId,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM auction_consents WHERE auction_id = $1 AND user_id = $2)",
    )
    .bind(auction_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
}

/// Eligible participants for settlement manifest construction.
pub async fn eligible_for_auction(
    pool: &PgPool,
    auction_id: AuctionId,
) -> Result<Vec<ParticipantRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM auction_participants WHERE auction_id = $1 AND eligible ORDER BY created_at",
    )
    .bind(auction_id)
    .fetch_all(pool)
    .await
}

/// Same read inside the settlement-initiation transaction.
pub async fn eligible_for_auction_tx(
    tx: &mut Transaction<'_, Postgres>,
    auction_id: AuctionId,
) -> Result<Vec<ParticipantRow>, sqlx::Error> {
    sqlx::query_as::<_, ParticipantRow>(
        "SELECT * FROM auction_participants WHERE auction_id = $1 AND eligible ORDER BY created_at",
    )
    .bind(auction_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn count(pool: &PgPool, auction_id: AuctionId) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT count(*) FROM auction_participants WHERE auction_id = $1")
        .bind(auction_id)
        .fetch_one(pool)
        .await
}
