use thiserror::Error;

use crate::status::{AuctionStatus, DepositStatus, RejectReason};

#[derive(Debug, Error)]
pub enum GavelError {
    // ── Bid validation / business ────────────────────────────────────────────
    #[error("auction not found")]
    AuctionNotFound,

    #[error("auction is not live (status {0})")]
    AuctionNotLive(AuctionStatus),

    #[error("user is not an eligible participant")]
    UserNotEligible,

    #[error("auction consent not granted")]
    ConsentMissing,

    #[error("price changed: current price is {current}")]
    PriceChanged { current: String },

    #[error("bid below minimum increment: need at least {need}")]
    BelowMinimumIncrement { need: String },

    #[error("amount {0} already bid in this auction")]
    AmountAlreadyBid(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("deposit not in HELD state (status {0})")]
    InsufficientDeposit(DepositStatus),

    #[error("malformed amount: {0}")]
    InvalidAmount(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    // ── Concurrency ──────────────────────────────────────────────────────────
    #[error("lock contention on {0}")]
    LockContention(String),

    #[error("optimistic version conflict on auction")]
    VersionConflict,

    // ── Settlement ───────────────────────────────────────────────────────────
    #[error("settlement manifest already exists for auction")]
    ManifestExists,

    #[error("settlement manifest not found")]
    ManifestNotFound,

    #[error("illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("kv store error: {0}")]
    Kv(String),

    #[error("kv store unavailable")]
    KvUnavailable,

    #[error("serialization error: {0}")]
    Serialization(String),

    // ── Auth / config ────────────────────────────────────────────────────────
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("admin role required")]
    Forbidden,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl GavelError {
    /// Map to the wire reason code, where one exists. Infrastructure errors
    /// on the bid path all surface as `service_unavailable` (fail closed).
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            GavelError::AuctionNotFound | GavelError::AuctionNotLive(_) => {
                Some(RejectReason::AuctionNotLive)
            }
            GavelError::UserNotEligible => Some(RejectReason::UserNotEligible),
            GavelError::ConsentMissing => Some(RejectReason::ConsentMissing),
            GavelError::PriceChanged { .. } | GavelError::VersionConflict => {
                Some(RejectReason::PriceChanged)
            }
            GavelError::BelowMinimumIncrement { .. } => Some(RejectReason::BelowMinimumIncrement),
            GavelError::AmountAlreadyBid(_) => Some(RejectReason::AmountAlreadyBid),
            GavelError::RateLimited => Some(RejectReason::RateLimited),
            GavelError::InsufficientDeposit(_) => Some(RejectReason::InsufficientDeposit),
            GavelError::InvalidAmount(_) => Some(RejectReason::InvalidAmount),
            GavelError::LockContention(_) => Some(RejectReason::LockContention),
            GavelError::Kv(_) | GavelError::KvUnavailable | GavelError::Db(_) => {
                Some(RejectReason::ServiceUnavailable)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infra_errors_fail_closed() {
        assert_eq!(
            GavelError::KvUnavailable.reject_reason(),
            Some(RejectReason::ServiceUnavailable)
        );
        assert_eq!(
            GavelError::Kv("boom".into()).reject_reason(),
            Some(RejectReason::ServiceUnavailable)
        );
    }

    #[test]
    fn version_conflict_maps_to_price_changed() {
        assert_eq!(
            GavelError::VersionConflict.reject_reason(),
            Some(RejectReason::PriceChanged)
        );
    }

    #[test]
    fn auth_errors_have_no_reason_code() {
        assert_eq!(GavelError::Forbidden.reject_reason(), None);
        assert_eq!(GavelError::Config("x".into()).reject_reason(), None);
    }
}
