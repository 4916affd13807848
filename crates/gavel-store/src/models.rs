use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use gavel_core::status::{AuctionStatus, DepositStatus, ManifestStatus, RefundStatus};
use gavel_core::types::{AuctionId, BidId, DepositId, ManifestId, UserId};

// ── Auction ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct AuctionRow {
    pub id: AuctionId,
    pub status: AuctionStatus,
    pub starting_price: Decimal,
    pub minimum_increment: Decimal,
    pub current_price: Decimal,
    pub required_deposit: Decimal,
    pub currency: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: DateTime<Utc>,
    pub extended_until: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_price: Option<Decimal>,
    pub winner_id: Option<UserId>,
    pub winner_bid_id: Option<BidId>,
    pub bid_count: i32,
    pub settlement_metadata: Option<serde_json::Value>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuctionRow {
    /// The end the clock runs against: `extended_until ?? scheduled_end`.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.extended_until.unwrap_or(self.scheduled_end)
    }

    pub fn time_remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.effective_end() - now).num_milliseconds().max(0)
    }
}

// ── Bid ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct BidRow {
    pub id: BidId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub reference_price: Decimal,
    pub idempotency_key: String,
    pub server_ts: DateTime<Utc>,
    pub client_sent_at: Option<DateTime<Utc>>,
    pub ip: Option<String>,
}

// ── Deposit ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct DepositRow {
    pub id: DepositId,
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub currency: String,
    pub status: DepositStatus,
    pub pos_transaction_id: Option<String>,
    pub pos_provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Participant ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub auction_id: AuctionId,
    pub user_id: UserId,
    pub deposit_id: DepositId,
    pub eligible: bool,
    pub created_at: DateTime<Utc>,
}

// ── Refund ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct RefundRow {
    pub id: uuid::Uuid,
    pub deposit_id: DepositId,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: RefundStatus,
    pub pos_refund_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Settlement manifest ──────────────────────────────────────────────────────

#[derive(Debug, Clone, FromRow)]
pub struct ManifestRow {
    pub id: ManifestId,
    pub auction_id: AuctionId,
    pub status: ManifestStatus,
    /// Opaque item document; decoded by the settlement crate.
    pub items: serde_json::Value,
    pub items_total: i32,
    pub items_acknowledged: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub escalation_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn auction(scheduled_end: DateTime<Utc>, extended: Option<DateTime<Utc>>) -> AuctionRow {
        AuctionRow {
            id: AuctionId::new(),
            status: AuctionStatus::Live,
            starting_price: Decimal::new(100000, 2),
            minimum_increment: Decimal::new(5000, 2),
            current_price: Decimal::new(100000, 2),
            required_deposit: Decimal::new(50000, 2),
            currency: "EUR".into(),
            scheduled_start: None,
            scheduled_end,
            extended_until: extended,
            actual_start: None,
            ended_at: None,
            final_price: None,
            winner_id: None,
            winner_bid_id: None,
            bid_count: 0,
            settlement_metadata: None,
            version: 0,
            created_at: scheduled_end,
            updated_at: scheduled_end,
        }
    }

    #[test]
    fn effective_end_prefers_extension() {
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let ext = Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap();
        assert_eq!(auction(end, None).effective_end(), end);
        assert_eq!(auction(end, Some(ext)).effective_end(), ext);
    }

    #[test]
    fn time_remaining_clamps_at_zero() {
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let a = auction(end, None);
        let before = Utc.with_ymd_and_hms(2026, 3, 1, 11, 59, 30).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 30).unwrap();
        assert_eq!(a.time_remaining_ms(before), 30_000);
        assert_eq!(a.time_remaining_ms(after), 0);
    }
}
