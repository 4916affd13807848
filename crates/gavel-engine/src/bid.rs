//! Bid acceptance pipeline.
//!
//! A bid passes fourteen phases in order: idempotency fast-path, distributed
//! lock, transaction, in-transaction idempotency re-check, auction read under
//! `FOR UPDATE`, status/eligibility/consent validation, reference-price and
//! increment arithmetic, amount uniqueness, append-only insert with
//! authoritative server timestamp, optimistic version bump, anti-sniping
//! extension, commit, lock release. Refused bids write an append-only
//! BidRejection in the same transaction and commit it.

use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{info, warn};

use gavel_core::constants::BID_LOCK_TTL;
use gavel_core::error::GavelError;
use gavel_core::keys;
use gavel_core::metrics;
use gavel_core::money::format_amount;
use gavel_core::status::{AuctionStatus, DepositStatus, RejectReason};
use gavel_core::types::{AuctionId, BidId, Timestamp, UserId};

use gavel_kv::KvStore;
use gavel_store::bids::{self, NewBid};
use gavel_store::{auctions, deposits, participants, BidRow};

#[derive(Debug, Clone)]
pub struct PlaceBidRequest {
    pub auction_id: AuctionId,
    pub amount: Decimal,
    pub reference_price: Decimal,
    pub idempotency_key: String,
    pub client_sent_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct AcceptedBid {
    pub bid_id: BidId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub server_ts: Timestamp,
    pub new_bid_count: i32,
    /// New effective end, when this bid restarted the sniper clock.
    pub extended_until: Option<Timestamp>,
}

/// Discriminated pipeline result. Retryable refusals (lock contention,
/// version conflict) carry a retryable reason code; the caller distinguishes
/// them via [`RejectReason::is_retryable`].
#[derive(Debug, Clone)]
pub enum BidOutcome {
    Accepted(AcceptedBid),
    Rejected {
        reason: RejectReason,
        current_price: Option<String>,
        message: String,
    },
}

impl BidOutcome {
    fn rejected(reason: RejectReason, current_price: Option<Decimal>, message: impl Into<String>) -> Self {
        BidOutcome::Rejected {
            reason,
            current_price: current_price.map(format_amount),
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct BidService {
    pool: PgPool,
    kv: KvStore,
    sniper_window: Duration,
}

impl BidService {
    pub fn new(pool: PgPool, kv: KvStore, sniper_window: Duration) -> Self {
        Self { pool, kv, sniper_window }
    }

    /// Run the full pipeline for one bid attempt.
    pub async fn place_bid(
        &self,
        req: PlaceBidRequest,
        user_id: UserId,
        ip: Option<String>,
    ) -> Result<BidOutcome, GavelError> {
        // P0: idempotency fast-path, authoritative for client retries.
        if let Some(existing) = bids::find_by_idempotency_key(&self.pool, &req.idempotency_key).await? {
            return self.stored_result(existing).await;
        }

        // P1: distributed lock on the auction.
        let lock_key = keys::bid_lock_key(req.auction_id);
        let Some(guard) = self.kv.acquire(&lock_key, BID_LOCK_TTL).await? else {
            metrics::LOCK_FAILURES.with_label_values(&["bid"]).inc();
            metrics::BID_REJECTIONS
                .with_label_values(&[RejectReason::LockContention.as_str()])
                .inc();
            return Ok(BidOutcome::rejected(
                RejectReason::LockContention,
                None,
                "another bid is in flight for this auction; retry",
            ));
        };

        // P2–P13 under the lock; P14 releases on every path. A crashed
        // process is covered by the lock TTL.
        let outcome = self.place_bid_locked(&req, user_id, ip).await;
        if let Err(e) = self.kv.release(&guard).await {
            warn!(key = %lock_key, error = %e, "bid lock release failed");
        }
        outcome
    }

    /// Replay of a previously accepted bid: phase 0 must return the same
    /// acceptance response as the original attempt, not today's auction
    /// state. Both fields that could drift are rebuilt from stored data:
    /// the bid count at acceptance is the number of bids at or before this
    /// one's server_ts, and the sniper extension is recomputed by replaying
    /// the clock over exactly those bids.
    async fn stored_result(&self, bid: BidRow) -> Result<BidOutcome, GavelError> {
        let auction = auctions::get(&self.pool, bid.auction_id)
            .await?
            .ok_or(GavelError::AuctionNotFound)?;
        let bids_so_far = bids::for_auction_up_to(&self.pool, bid.auction_id, bid.server_ts).await?;
        let window = chrono::Duration::from_std(self.sniper_window)
            .map_err(|e| GavelError::Config(e.to_string()))?;
        let extended_until = replay_extension(auction.scheduled_end, window, &bids_so_far);
        Ok(BidOutcome::Accepted(AcceptedBid {
            bid_id: bid.id,
            auction_id: bid.auction_id,
            user_id: bid.user_id,
            amount: bid.amount,
            server_ts: bid.server_ts,
            new_bid_count: bids_so_far.len() as i32,
            extended_until,
        }))
    }

    async fn place_bid_locked(
        &self,
        req: &PlaceBidRequest,
        user_id: UserId,
        ip: Option<String>,
    ) -> Result<BidOutcome, GavelError> {
        let mut tx = self.pool.begin().await?;

        // P3: re-check idempotency now that we hold the lock; two racers can
        // both have passed P0.
        if let Some(existing) = bids::find_by_idempotency_key_tx(&mut tx, &req.idempotency_key).await? {
            tx.commit().await?;
            return self.stored_result(existing).await;
        }

        // P4: read the auction under FOR UPDATE.
        let Some(auction) = auctions::get_for_update_tx(&mut tx, req.auction_id).await? else {
            return self
                .reject(tx, req, user_id, ip, RejectReason::AuctionNotLive, None, "auction not found")
                .await;
        };

        // P5: must be LIVE.
        if auction.status != AuctionStatus::Live {
            let msg = format!("auction is not live (status {})", auction.status);
            return self
                .reject(tx, req, user_id, ip, RejectReason::AuctionNotLive, Some(auction.current_price), msg)
                .await;
        }

        // P6: eligible participant with a HELD deposit.
        let participant = participants::get_tx(&mut tx, req.auction_id, user_id).await?;
        let Some(participant) = participant.filter(|p| p.eligible) else {
            return self
                .reject(
                    tx,
                    req,
                    user_id,
                    ip,
                    RejectReason::UserNotEligible,
                    Some(auction.current_price),
                    "user is not an eligible participant",
                )
                .await;
        };
        let deposit = deposits::get_tx(&mut tx, participant.deposit_id).await?;
        if deposit.map(|d| d.status) != Some(DepositStatus::Held) {
            return self
                .reject(
                    tx,
                    req,
                    user_id,
                    ip,
                    RejectReason::InsufficientDeposit,
                    Some(auction.current_price),
                    "deposit is not held",
                )
                .await;
        }

        // P7: consent must be on file.
        if !participants::has_consent_tx(&mut tx, req.auction_id, user_id).await? {
            return self
                .reject(
                    tx,
                    req,
                    user_id,
                    ip,
                    RejectReason::ConsentMissing,
                    Some(auction.current_price),
                    "auction consent not granted",
                )
                .await;
        }

        // P8: the client bid against the price it saw.
        if req.reference_price != auction.current_price {
            let msg = format!("price changed: current price is {}", format_amount(auction.current_price));
            return self
                .reject(tx, req, user_id, ip, RejectReason::PriceChanged, Some(auction.current_price), msg)
                .await;
        }

        // P9: minimum-increment arithmetic, exact decimal.
        let need = auction.current_price + auction.minimum_increment;
        if req.amount < need {
            let msg = format!("bid below minimum increment: need at least {}", format_amount(need));
            return self
                .reject(
                    tx,
                    req,
                    user_id,
                    ip,
                    RejectReason::BelowMinimumIncrement,
                    Some(auction.current_price),
                    msg,
                )
                .await;
        }

        // P10: one accepted bid per price per auction.
        if bids::amount_exists_tx(&mut tx, req.auction_id, req.amount).await? {
            let msg = format!("amount {} already bid in this auction", format_amount(req.amount));
            return self
                .reject(tx, req, user_id, ip, RejectReason::AmountAlreadyBid, Some(auction.current_price), msg)
                .await;
        }

        // P11: append the bid; server_ts is assigned by the database.
        let new_bid = NewBid {
            auction_id: req.auction_id,
            user_id,
            amount: req.amount,
            reference_price: req.reference_price,
            idempotency_key: req.idempotency_key.clone(),
            client_sent_at: req.client_sent_at,
            ip: ip.clone(),
        };
        let bid = match bids::insert_tx(&mut tx, &new_bid).await {
            Ok(bid) => bid,
            Err(e) if bids::is_unique_violation(&e) => {
                // Lost the constraint race despite the pre-check.
                tx.rollback().await?;
                metrics::BID_REJECTIONS
                    .with_label_values(&[RejectReason::AmountAlreadyBid.as_str()])
                    .inc();
                return Ok(BidOutcome::rejected(
                    RejectReason::AmountAlreadyBid,
                    Some(auction.current_price),
                    format!("amount {} already bid in this auction", format_amount(req.amount)),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        // P12: optimistic version bump.
        let updated = auctions::apply_bid_tx(&mut tx, req.auction_id, req.amount, auction.version).await?;
        if updated == 0 {
            tx.rollback().await?;
            metrics::BID_REJECTIONS
                .with_label_values(&[RejectReason::PriceChanged.as_str()])
                .inc();
            return Ok(BidOutcome::rejected(
                RejectReason::PriceChanged,
                Some(auction.current_price),
                "auction changed concurrently; re-read and retry",
            ));
        }

        // P12b: anti-sniping — a bid inside the final window restarts the
        // clock by exactly one window. The bid's server_ts is the clock
        // basis, so an idempotent replay can rebuild this decision from
        // stored rows alone.
        let effective_end = auction.effective_end();
        let remaining = effective_end - bid.server_ts;
        let window = chrono::Duration::from_std(self.sniper_window)
            .map_err(|e| GavelError::Config(e.to_string()))?;
        let extended_until = if remaining > chrono::Duration::zero() && remaining <= window {
            let until = bid.server_ts + window;
            auctions::extend_tx(&mut tx, req.auction_id, until).await?;
            Some(until)
        } else {
            None
        };

        // P13: commit.
        tx.commit().await?;

        metrics::BIDS_ACCEPTED.inc();
        info!(
            auction_id = %req.auction_id,
            bid_id = %bid.id,
            amount = %format_amount(bid.amount),
            extended = extended_until.is_some(),
            "bid accepted"
        );

        Ok(BidOutcome::Accepted(AcceptedBid {
            bid_id: bid.id,
            auction_id: req.auction_id,
            user_id,
            amount: bid.amount,
            server_ts: bid.server_ts,
            new_bid_count: auction.bid_count + 1,
            extended_until,
        }))
    }

    /// Write the append-only rejection audit row, commit it, and map to the
    /// wire outcome.
    #[allow(clippy::too_many_arguments)]
    async fn reject(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        req: &PlaceBidRequest,
        user_id: UserId,
        ip: Option<String>,
        reason: RejectReason,
        current_price: Option<Decimal>,
        message: impl Into<String>,
    ) -> Result<BidOutcome, GavelError> {
        let message = message.into();
        bids::insert_rejection_tx(
            &mut tx,
            req.auction_id,
            user_id,
            Some(req.amount),
            Some(req.reference_price),
            reason,
            Some(message.clone()),
            ip,
        )
        .await?;
        tx.commit().await?;
        metrics::BID_REJECTIONS.with_label_values(&[reason.as_str()]).inc();
        Ok(BidOutcome::rejected(reason, current_price, message))
    }
}

/// Recompute the anti-sniping clock over the accepted bids of one auction in
/// server-timestamp order. Returns the extension produced by the final bid
/// in the slice, if it landed inside the closing window. Because acceptance
/// bases the extension on server_ts, this rebuilds the original decision
/// exactly.
fn replay_extension(
    scheduled_end: Timestamp,
    window: chrono::Duration,
    bids: &[BidRow],
) -> Option<Timestamp> {
    let mut effective_end = scheduled_end;
    let mut last = None;
    for bid in bids {
        let remaining = effective_end - bid.server_ts;
        if remaining > chrono::Duration::zero() && remaining <= window {
            effective_end = bid.server_ts + window;
            last = Some(effective_end);
        } else {
            last = None;
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use gavel_core::types::{BidId, Timestamp};

    fn ts(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sec).unwrap()
    }

    fn bid_at(server_ts: Timestamp) -> BidRow {
        BidRow {
            id: BidId::new(),
            auction_id: AuctionId::new(),
            user_id: UserId::new(),
            amount: Decimal::new(105000, 2),
            reference_price: Decimal::new(100000, 2),
            idempotency_key: format!("k-{server_ts}"),
            server_ts,
            client_sent_at: None,
            ip: None,
        }
    }

    fn window() -> chrono::Duration {
        chrono::Duration::seconds(60)
    }

    #[test]
    fn bid_well_before_the_window_does_not_extend() {
        // scheduled_end two minutes out, bid now: remaining > window.
        let bids = vec![bid_at(ts(0))];
        assert_eq!(replay_extension(ts(120) + window(), window(), &bids), None);
    }

    #[test]
    fn bid_inside_the_window_extends_by_one_window() {
        // scheduled_end 30s out, bid now: extension to now + 60s.
        let bids = vec![bid_at(ts(0))];
        assert_eq!(replay_extension(ts(30), window(), &bids), Some(ts(0) + window()));
    }

    #[test]
    fn bid_after_the_effective_end_does_not_extend() {
        let bids = vec![bid_at(ts(31))];
        assert_eq!(replay_extension(ts(30), window(), &bids), None);
    }

    #[test]
    fn chained_extensions_track_the_moving_end() {
        // First bid extends 30s-out end to t0+60; second bid at t0+50 is
        // inside the extended window and restarts the clock again.
        let bids = vec![bid_at(ts(0)), bid_at(ts(50))];
        assert_eq!(replay_extension(ts(30), window(), &bids), Some(ts(50) + window()));
    }

    #[test]
    fn only_the_final_bid_decides_the_replayed_signal() {
        // First bid extended, but the replayed (final) bid landed outside
        // any window: the replay reports no extension for it.
        let far_end = ts(30);
        let bids = vec![bid_at(ts(0)), bid_at(ts(2))];
        let extended = replay_extension(far_end, window(), &bids);
        assert_eq!(extended, Some(ts(2) + window()));

        let bids = vec![bid_at(ts(0)), bid_at(ts(0) + window() + chrono::Duration::seconds(5))];
        assert_eq!(replay_extension(far_end, window(), &bids), None);
    }
}
