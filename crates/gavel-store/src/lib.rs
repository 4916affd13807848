//! Postgres persistence layer.
//!
//! Thin repository functions over sqlx, split by aggregate. Functions with a
//! `_tx` suffix require an open transaction and are the only way to touch
//! rows that demand `SELECT ... FOR UPDATE`. Append-only tables expose
//! insert-only APIs; the schema triggers are the second line of defense.

pub mod auctions;
pub mod bids;
pub mod deposits;
pub mod ledger;
pub mod manifests;
pub mod models;
pub mod participants;
pub mod retry;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub use models::{AuctionRow, BidRow, DepositRow, ManifestRow, ParticipantRow, RefundRow};
pub use retry::with_db_retry;

/// Connect with bounded pool and connect timeouts.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

/// Apply embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
