//! WebSocket wire protocol.
//!
//! Snake_case JSON with a `type` tag. Client identifiers arrive as raw
//! strings and are shape-checked before any lookup; user ids leaving the
//! engine are always masked.

use serde::{Deserialize, Serialize};

use crate::status::AuctionStatus;
use crate::types::Timestamp;

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "JOIN_AUCTION")]
    JoinAuction { auction_id: String },

    #[serde(rename = "LEAVE_AUCTION")]
    LeaveAuction { auction_id: String },

    #[serde(rename = "PLACE_BID")]
    PlaceBid {
        auction_id: String,
        amount: String,
        reference_price: String,
        idempotency_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_sent_at: Option<Timestamp>,
    },
}

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "AUCTION_STATE")]
    AuctionState {
        auction_id: String,
        status: AuctionStatus,
        current_price: String,
        bid_count: i32,
        participant_count: i64,
        watcher_count: i64,
        time_remaining_ms: i64,
        extended_until: Option<Timestamp>,
    },

    #[serde(rename = "BID_ACCEPTED")]
    BidAccepted {
        bid_id: String,
        user_id_masked: String,
        amount: String,
        server_timestamp: Timestamp,
        new_bid_count: i32,
    },

    #[serde(rename = "BID_REJECTED")]
    BidRejected {
        reason_code: crate::status::RejectReason,
        current_price: Option<String>,
        message: String,
    },

    #[serde(rename = "AUCTION_ENDING")]
    AuctionEnding { auction_id: String },

    #[serde(rename = "AUCTION_EXTENDED")]
    AuctionExtended {
        auction_id: String,
        new_end_time: Timestamp,
        triggered_by_bid_id: String,
    },

    #[serde(rename = "AUCTION_ENDED")]
    AuctionEnded {
        winner_id_masked: Option<String>,
        final_price: Option<String>,
    },

    #[serde(rename = "AUCTION_SETTLEMENT_PENDING")]
    SettlementPending { auction_id: String },

    #[serde(rename = "AUCTION_SETTLEMENT_PROGRESS")]
    SettlementProgress {
        auction_id: String,
        items_total: i32,
        items_acknowledged: i32,
    },

    #[serde(rename = "AUCTION_SETTLED")]
    AuctionSettled { auction_id: String },

    #[serde(rename = "AUCTION_SETTLEMENT_FAILED")]
    SettlementFailed {
        auction_id: String,
        reason: Option<String>,
    },

    /// Deliberately opaque: join failures use one message whether the
    /// auction does not exist or the caller is not a participant.
    #[serde(rename = "ERROR")]
    Error { message: String },
}

impl ServerMessage {
    /// JSON for the socket and for the pub/sub fabric.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage serialization is infallible")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn place_bid_parses_snake_case() {
        let raw = r#"{
            "type": "PLACE_BID",
            "auction_id": "11111111-2222-3333-4444-555555555555",
            "amount": "1050.00",
            "reference_price": "1000.00",
            "idempotency_key": "k1"
        }"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::PlaceBid {
                amount,
                reference_price,
                idempotency_key,
                client_sent_at,
                ..
            } => {
                assert_eq!(amount, "1050.00");
                assert_eq!(reference_price, "1000.00");
                assert_eq!(idempotency_key, "k1");
                assert!(client_sent_at.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn bid_accepted_wire_shape() {
        let ts = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let msg = ServerMessage::BidAccepted {
            bid_id: "b-1".into(),
            user_id_masked: "a1b2c3d4***".into(),
            amount: "1050.00".into(),
            server_timestamp: ts,
            new_bid_count: 4,
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(v["type"], "BID_ACCEPTED");
        assert_eq!(v["user_id_masked"], "a1b2c3d4***");
        assert_eq!(v["amount"], "1050.00");
        assert_eq!(v["new_bid_count"], 4);
        // ISO-8601 timestamp on the wire.
        assert!(v["server_timestamp"].as_str().unwrap().starts_with("2026-03-01T12:00:00"));
    }

    #[test]
    fn bid_rejected_carries_reason_code() {
        let msg = ServerMessage::BidRejected {
            reason_code: crate::status::RejectReason::PriceChanged,
            current_price: Some("1100.00".into()),
            message: "price changed: current price is 1100.00".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(v["type"], "BID_REJECTED");
        assert_eq!(v["reason_code"], "price_changed");
        assert_eq!(v["current_price"], "1100.00");
    }

    #[test]
    fn auction_extended_uses_new_end_time() {
        let ts = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap();
        let msg = ServerMessage::AuctionExtended {
            auction_id: "a".into(),
            new_end_time: ts,
            triggered_by_bid_id: "b".into(),
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(v["type"], "AUCTION_EXTENDED");
        assert!(v.get("new_end_time").is_some());
        assert!(v.get("extended_until").is_none());
    }

    #[test]
    fn ended_message_masks_winner() {
        let msg = ServerMessage::AuctionEnded {
            winner_id_masked: Some("deadbeef***".into()),
            final_price: Some("1100.00".into()),
        };
        let v: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(v["winner_id_masked"], "deadbeef***");
        assert_eq!(v["final_price"], "1100.00");
    }
}
