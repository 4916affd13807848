use serde::{Deserialize, Serialize};
use std::fmt;

// ── Auction lifecycle ────────────────────────────────────────────────────────

/// Lifecycle states of the auction aggregate.
///
/// DRAFT exists in the database enum and must be decoded even though the
/// engine never transitions an auction into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "auction_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionStatus {
    Draft,
    Scheduled,
    DepositOpen,
    Live,
    Ending,
    Ended,
    Settling,
    Settled,
    SettlementFailed,
    Cancelled,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Draft => "DRAFT",
            AuctionStatus::Scheduled => "SCHEDULED",
            AuctionStatus::DepositOpen => "DEPOSIT_OPEN",
            AuctionStatus::Live => "LIVE",
            AuctionStatus::Ending => "ENDING",
            AuctionStatus::Ended => "ENDED",
            AuctionStatus::Settling => "SETTLING",
            AuctionStatus::Settled => "SETTLED",
            AuctionStatus::SettlementFailed => "SETTLEMENT_FAILED",
            AuctionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Deposit lifecycle ────────────────────────────────────────────────────────

/// Monetary states of a pre-posted deposit. Legal transitions are
/// HELD→CAPTURED and HELD→REFUND_PENDING→REFUNDED; the storage layer
/// rejects everything else with a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "deposit_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepositStatus {
    Collected,
    Held,
    Captured,
    RefundPending,
    Refunded,
    Expired,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Collected => "COLLECTED",
            DepositStatus::Held => "HELD",
            DepositStatus::Captured => "CAPTURED",
            DepositStatus::RefundPending => "REFUND_PENDING",
            DepositStatus::Refunded => "REFUNDED",
            DepositStatus::Expired => "EXPIRED",
        }
    }

    /// Terminal monetary states: no further transition may occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositStatus::Captured | DepositStatus::Refunded | DepositStatus::Expired
        )
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Settlement manifest ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "manifest_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestStatus {
    Active,
    Completed,
    Expired,
    Escalated,
}

impl ManifestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestStatus::Active => "ACTIVE",
            ManifestStatus::Completed => "COMPLETED",
            ManifestStatus::Expired => "EXPIRED",
            ManifestStatus::Escalated => "ESCALATED",
        }
    }
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monetary action a manifest item performs against the POS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Capture,
    Refund,
}

impl ItemAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemAction::Capture => "capture",
            ItemAction::Refund => "refund",
        }
    }
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item dispatch state inside the manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

// ── Refund record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "refund_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RefundStatus {
    Pending,
    Completed,
}

// ── Bid rejection reason codes ───────────────────────────────────────────────

/// Wire reason codes for refused bids. Serialized lowercase snake_case, e.g.
/// `price_changed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AuctionNotLive,
    UserNotEligible,
    ConsentMissing,
    PriceChanged,
    BelowMinimumIncrement,
    AmountAlreadyBid,
    RateLimited,
    InsufficientDeposit,
    InvalidAmount,
    LockContention,
    ServiceUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::AuctionNotLive => "auction_not_live",
            RejectReason::UserNotEligible => "user_not_eligible",
            RejectReason::ConsentMissing => "consent_missing",
            RejectReason::PriceChanged => "price_changed",
            RejectReason::BelowMinimumIncrement => "below_minimum_increment",
            RejectReason::AmountAlreadyBid => "amount_already_bid",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::InsufficientDeposit => "insufficient_deposit",
            RejectReason::InvalidAmount => "invalid_amount",
            RejectReason::LockContention => "lock_contention",
            RejectReason::ServiceUnavailable => "service_unavailable",
        }
    }

    /// Concurrency-bucket reasons: the client should simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::LockContention | RejectReason::PriceChanged)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_serialize_lowercase() {
        let json = serde_json::to_string(&RejectReason::PriceChanged).unwrap();
        assert_eq!(json, "\"price_changed\"");
        let json = serde_json::to_string(&RejectReason::BelowMinimumIncrement).unwrap();
        assert_eq!(json, "\"below_minimum_increment\"");
    }

    #[test]
    fn auction_status_round_trips_screaming_snake() {
        let json = serde_json::to_string(&AuctionStatus::SettlementFailed).unwrap();
        assert_eq!(json, "\"SETTLEMENT_FAILED\"");
        let back: AuctionStatus = serde_json::from_str("\"DEPOSIT_OPEN\"").unwrap();
        assert_eq!(back, AuctionStatus::DepositOpen);
    }

    #[test]
    fn draft_decodes() {
        let s: AuctionStatus = serde_json::from_str("\"DRAFT\"").unwrap();
        assert_eq!(s, AuctionStatus::Draft);
    }

    #[test]
    fn deposit_terminal_states() {
        assert!(DepositStatus::Captured.is_terminal());
        assert!(DepositStatus::Refunded.is_terminal());
        assert!(DepositStatus::Expired.is_terminal());
        assert!(!DepositStatus::Held.is_terminal());
        assert!(!DepositStatus::RefundPending.is_terminal());
    }

    #[test]
    fn retryable_reasons() {
        assert!(RejectReason::LockContention.is_retryable());
        assert!(RejectReason::PriceChanged.is_retryable());
        assert!(!RejectReason::AuctionNotLive.is_retryable());
        assert!(!RejectReason::ServiceUnavailable.is_retryable());
    }
}
