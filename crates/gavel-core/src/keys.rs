//! KV key namespaces and deterministic idempotency keys.

use crate::status::ItemAction;
use crate::types::{AuctionId, DepositId, UserId};

pub fn bid_lock_key(auction_id: AuctionId) -> String {
    format!("bid:lock:auction:{auction_id}")
}

pub fn ending_lock_key(auction_id: AuctionId) -> String {
    format!("auction:ending:lock:{auction_id}")
}

pub fn settlement_lock_key(auction_id: AuctionId) -> String {
    format!("auction:settlement:lock:{auction_id}")
}

pub fn rate_user_key(user_id: UserId) -> String {
    format!("ws:bid:rate:user:{user_id}")
}

pub fn rate_auction_key(auction_id: AuctionId) -> String {
    format!("ws:bid:rate:auction:{auction_id}")
}

/// Pub/sub channel carrying engine events for one auction room.
pub fn auction_channel(auction_id: AuctionId) -> String {
    format!("gavel:auction:{auction_id}")
}

/// Pattern matching every auction channel (`PSUBSCRIBE`).
pub const AUCTION_CHANNEL_PATTERN: &str = "gavel:auction:*";

/// Deterministic settlement idempotency key. The POS provider and the
/// refunds table both deduplicate on this exact string.
pub fn settlement_idempotency_key(
    auction_id: AuctionId,
    deposit_id: DepositId,
    action: ItemAction,
) -> String {
    format!("settlement:{auction_id}:{deposit_id}:{action}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuctionId;

    #[test]
    fn key_namespaces_match_contract() {
        let a: AuctionId = "11111111-2222-3333-4444-555555555555".parse().unwrap();
        let u: UserId = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".parse().unwrap();
        assert_eq!(
            bid_lock_key(a),
            "bid:lock:auction:11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(
            ending_lock_key(a),
            "auction:ending:lock:11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(
            settlement_lock_key(a),
            "auction:settlement:lock:11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(
            rate_user_key(u),
            "ws:bid:rate:user:aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"
        );
        assert!(rate_auction_key(a).starts_with("ws:bid:rate:auction:"));
    }

    #[test]
    fn settlement_key_is_deterministic() {
        let a: AuctionId = "11111111-2222-3333-4444-555555555555".parse().unwrap();
        let d: DepositId = "99999999-8888-7777-6666-555555555555".parse().unwrap();
        let k = settlement_idempotency_key(a, d, ItemAction::Capture);
        assert_eq!(
            k,
            "settlement:11111111-2222-3333-4444-555555555555:99999999-8888-7777-6666-555555555555:capture"
        );
        assert_eq!(k, settlement_idempotency_key(a, d, ItemAction::Capture));
        assert_ne!(k, settlement_idempotency_key(a, d, ItemAction::Refund));
    }
}
