//! Auction lifecycle worker.
//!
//! Every instance runs one of these on a 1-second tick; the single task
//! serializes ticks per process and the per-auction KV lock serializes
//! across instances. An auction whose effective end has passed is moved
//! LIVE→ENDING and then, in a second transaction, ENDING→ENDED with the
//! winner frozen.

use sqlx::PgPool;
use tracing::{debug, info, warn};

use chrono::Utc;

use gavel_core::constants::{ENDING_LOCK_TTL, LIFECYCLE_TICK};
use gavel_core::error::GavelError;
use gavel_core::keys;
use gavel_core::metrics;
use gavel_core::money::format_amount;
use gavel_core::protocol::ServerMessage;
use gavel_core::status::AuctionStatus;
use gavel_core::types::AuctionId;

use gavel_kv::{EventPublisher, KvStore};
use gavel_store::{auctions, bids};

pub struct LifecycleWorker {
    pool: PgPool,
    kv: KvStore,
    publisher: EventPublisher,
}

impl LifecycleWorker {
    pub fn new(pool: PgPool, kv: KvStore, publisher: EventPublisher) -> Self {
        Self { pool, kv, publisher }
    }

    /// Run forever. The interval skips missed ticks, so a slow tick is never
    /// overlapped by the next one.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LIFECYCLE_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = self.run_tick().await {
                    warn!(error = %e, "lifecycle tick failed");
                }
            }
        })
    }

    pub async fn run_tick(&self) -> Result<(), GavelError> {
        let now = Utc::now();
        let due = auctions::find_due_for_ending(&self.pool, now).await?;
        for auction in due {
            let lock_key = keys::ending_lock_key(auction.id);
            let Some(guard) = self.kv.acquire(&lock_key, ENDING_LOCK_TTL).await? else {
                metrics::LOCK_FAILURES.with_label_values(&["ending"]).inc();
                continue;
            };
            let result = self.end_auction(auction.id).await;
            if let Err(e) = self.kv.release(&guard).await {
                warn!(key = %lock_key, error = %e, "ending lock release failed");
            }
            if let Err(e) = result {
                warn!(auction_id = %auction.id, error = %e, "ending pass failed");
            }
        }
        Ok(())
    }

    async fn end_auction(&self, id: AuctionId) -> Result<(), GavelError> {
        // First transaction: re-check under FOR UPDATE — a bid may have
        // extended the clock between the poll and this lock — then
        // LIVE→ENDING.
        let mut tx = self.pool.begin().await?;
        let Some(auction) = auctions::get_for_update_tx(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(());
        };
        let now = Utc::now();
        if now < auction.effective_end() {
            debug!(auction_id = %id, "extension won the race; not ending");
            tx.rollback().await?;
            return Ok(());
        }
        match auction.status {
            AuctionStatus::Live => {
                auctions::set_status_tx(&mut tx, id, AuctionStatus::Live, AuctionStatus::Ending).await?;
                tx.commit().await?;
                metrics::STATE_TRANSITIONS.with_label_values(&["LIVE", "ENDING"]).inc();
                self.broadcast(id, &ServerMessage::AuctionEnding { auction_id: id.to_string() })
                    .await;
            }
            AuctionStatus::Ending => {
                // Crashed after the first transaction on a previous pass.
                tx.rollback().await?;
            }
            _ => {
                tx.rollback().await?;
                return Ok(());
            }
        }

        // Second transaction: freeze the result.
        let mut tx = self.pool.begin().await?;
        let Some(auction) = auctions::get_for_update_tx(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(());
        };
        if auction.status != AuctionStatus::Ending {
            tx.rollback().await?;
            return Ok(());
        }
        let winner = bids::winning_bid_tx(&mut tx, id).await?;
        let ended_at = Utc::now();
        auctions::mark_ended_tx(
            &mut tx,
            id,
            ended_at,
            winner.as_ref().map(|b| b.amount),
            winner.as_ref().map(|b| b.user_id),
            winner.as_ref().map(|b| b.id),
        )
        .await?;
        tx.commit().await?;
        metrics::STATE_TRANSITIONS.with_label_values(&["ENDING", "ENDED"]).inc();

        match &winner {
            Some(bid) => info!(
                auction_id = %id,
                winner = %bid.user_id.masked(),
                final_price = %format_amount(bid.amount),
                "auction ended"
            ),
            None => info!(auction_id = %id, "auction ended with no bids"),
        }

        self.broadcast(
            id,
            &ServerMessage::AuctionEnded {
                winner_id_masked: winner.as_ref().map(|b| b.user_id.masked()),
                final_price: winner.as_ref().map(|b| format_amount(b.amount)),
            },
        )
        .await;
        Ok(())
    }

    async fn broadcast(&self, id: AuctionId, msg: &ServerMessage) {
        if let Err(e) = self.publisher.publish(id, msg).await {
            warn!(auction_id = %id, error = %e, "lifecycle broadcast failed");
        }
    }
}
