//! Manifest item document.
//!
//! Items live as one JSON document inside the manifest row; updates are
//! whole-document writes under the per-auction settlement lock, which is the
//! only writer. The decision helpers here are pure so the branchy settlement
//! logic tests without a database.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gavel_core::constants::{MAX_RETRIES, MEMORY_SAFETY_ITEMS_LIMIT};
use gavel_core::error::GavelError;
use gavel_core::keys::settlement_idempotency_key;
use gavel_core::status::{DepositStatus, ItemAction, ItemStatus};
use gavel_core::types::{AuctionId, DepositId, UserId};

use gavel_store::{AuctionRow, DepositRow, ParticipantRow};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub deposit_id: DepositId,
    pub user_id: UserId,
    pub action: ItemAction,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ManifestItem {
    /// Still owed work: pending, or failed with retry budget left.
    pub fn processable(&self) -> bool {
        match self.status {
            ItemStatus::Pending => true,
            ItemStatus::Failed => self.retry_count < MAX_RETRIES,
            ItemStatus::Sent | ItemStatus::Acknowledged => false,
        }
    }

    pub fn mark_sent(&mut self) {
        self.status = ItemStatus::Sent;
        self.sent_at = Some(Utc::now());
    }

    pub fn mark_acknowledged(&mut self, pos_reference: Option<String>) {
        self.status = ItemStatus::Acknowledged;
        self.acknowledged_at = Some(Utc::now());
        if pos_reference.is_some() {
            self.pos_reference = pos_reference;
        }
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.retry_count += 1;
        self.failed_at = Some(Utc::now());
        self.last_error = Some(error.into());
    }
}

/// Build the work plan at initiation: one item per eligible participant
/// whose deposit is HELD — capture for the winner, refund for everyone else.
pub fn build_items(
    auction: &AuctionRow,
    participants: &[ParticipantRow],
    deposits: &[DepositRow],
) -> Vec<ManifestItem> {
    participants
        .iter()
        .filter(|p| p.eligible)
        .filter_map(|p| {
            let deposit = deposits.iter().find(|d| d.id == p.deposit_id)?;
            if deposit.status != DepositStatus::Held {
                return None;
            }
            let action = if auction.winner_id == Some(p.user_id) {
                ItemAction::Capture
            } else {
                ItemAction::Refund
            };
            Some(ManifestItem {
                deposit_id: deposit.id,
                user_id: p.user_id,
                action,
                status: ItemStatus::Pending,
                retry_count: 0,
                idempotency_key: settlement_idempotency_key(auction.id, deposit.id, action),
                amount: deposit.amount,
                currency: deposit.currency.clone(),
                pos_reference: None,
                sent_at: None,
                acknowledged_at: None,
                failed_at: None,
                last_error: None,
            })
        })
        .collect()
}

// ── Finalize decision ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeDecision {
    /// Every item acknowledged (vacuously true for a no-bid manifest).
    Complete,
    /// Three strikes on at least one item.
    Escalate,
    /// Work remains.
    Continue,
}

pub fn finalize_decision(items: &[ManifestItem]) -> FinalizeDecision {
    if items.iter().all(|i| i.status == ItemStatus::Acknowledged) {
        FinalizeDecision::Complete
    } else if items
        .iter()
        .any(|i| i.status == ItemStatus::Failed && i.retry_count >= MAX_RETRIES)
    {
        FinalizeDecision::Escalate
    } else {
        FinalizeDecision::Continue
    }
}

pub fn acknowledged_count(items: &[ManifestItem]) -> i32 {
    items.iter().filter(|i| i.status == ItemStatus::Acknowledged).count() as i32
}

pub fn exceeds_memory_safety(items: &[ManifestItem]) -> bool {
    items.len() > MEMORY_SAFETY_ITEMS_LIMIT
}

/// Admin retry of an escalated manifest: failed items back to pending;
/// exhausted retry counters additionally reset to zero. Acknowledged items
/// are untouched.
pub fn reset_failed(items: &mut [ManifestItem]) {
    for item in items.iter_mut() {
        if item.status == ItemStatus::Failed {
            item.status = ItemStatus::Pending;
            if item.retry_count >= MAX_RETRIES {
                item.retry_count = 0;
            }
            item.last_error = None;
        }
    }
}

// ── Document codec ───────────────────────────────────────────────────────────

pub fn items_from_json(value: &serde_json::Value) -> Result<Vec<ManifestItem>, GavelError> {
    serde_json::from_value(value.clone()).map_err(|e| GavelError::Serialization(e.to_string()))
}

pub fn items_to_json(items: &[ManifestItem]) -> serde_json::Value {
    serde_json::to_value(items).expect("manifest items serialize infallibly")
}

/// Summary blob recorded on the auction at finalization.
pub fn settlement_summary(auction_id: AuctionId, items: &[ManifestItem]) -> serde_json::Value {
    let captured: Vec<_> = items
        .iter()
        .filter(|i| i.action == ItemAction::Capture && i.status == ItemStatus::Acknowledged)
        .map(|i| i.deposit_id.to_string())
        .collect();
    let refunded: Vec<_> = items
        .iter()
        .filter(|i| i.action == ItemAction::Refund && i.status == ItemStatus::Acknowledged)
        .map(|i| i.deposit_id.to_string())
        .collect();
    let failed: Vec<_> = items
        .iter()
        .filter(|i| i.status == ItemStatus::Failed)
        .map(|i| {
            serde_json::json!({
                "deposit_id": i.deposit_id.to_string(),
                "action": i.action.as_str(),
                "retry_count": i.retry_count,
                "last_error": i.last_error,
            })
        })
        .collect();
    serde_json::json!({
        "auction_id": auction_id.to_string(),
        "items_total": items.len(),
        "captured": captured,
        "refunded": refunded,
        "failed": failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gavel_core::status::AuctionStatus;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn item(action: ItemAction, status: ItemStatus, retry_count: u32) -> ManifestItem {
        ManifestItem {
            deposit_id: DepositId::new(),
            user_id: UserId::new(),
            action,
            status,
            retry_count,
            idempotency_key: "settlement:a:d:capture".into(),
            amount: Decimal::new(50000, 2),
            currency: "EUR".into(),
            pos_reference: None,
            sent_at: None,
            acknowledged_at: None,
            failed_at: None,
            last_error: None,
        }
    }

    fn auction(winner: Option<UserId>) -> AuctionRow {
        AuctionRow {
            id: AuctionId::new(),
            status: AuctionStatus::Ended,
            starting_price: Decimal::new(100000, 2),
            minimum_increment: Decimal::new(5000, 2),
            current_price: Decimal::new(110000, 2),
            required_deposit: Decimal::new(50000, 2),
            currency: "EUR".into(),
            scheduled_start: None,
            scheduled_end: ts(),
            extended_until: None,
            actual_start: None,
            ended_at: Some(ts()),
            final_price: None,
            winner_id: winner,
            winner_bid_id: None,
            bid_count: 2,
            settlement_metadata: None,
            version: 3,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn participant(auction_id: AuctionId, user: UserId, deposit: DepositId, eligible: bool) -> ParticipantRow {
        ParticipantRow {
            auction_id,
            user_id: user,
            deposit_id: deposit,
            eligible,
            created_at: ts(),
        }
    }

    fn deposit(id: DepositId, auction_id: AuctionId, user: UserId, status: DepositStatus) -> DepositRow {
        DepositRow {
            id,
            auction_id,
            user_id: user,
            amount: Decimal::new(50000, 2),
            currency: "EUR".into(),
            status,
            pos_transaction_id: Some("pos-tx".into()),
            pos_provider: Some("mock".into()),
            created_at: ts(),
            updated_at: ts(),
        }
    }

    #[test]
    fn build_assigns_capture_to_winner_and_refund_to_losers() {
        let winner = UserId::new();
        let loser = UserId::new();
        let a = auction(Some(winner));
        let (d1, d2) = (DepositId::new(), DepositId::new());
        let parts = vec![
            participant(a.id, winner, d1, true),
            participant(a.id, loser, d2, true),
        ];
        let deps = vec![
            deposit(d1, a.id, winner, DepositStatus::Held),
            deposit(d2, a.id, loser, DepositStatus::Held),
        ];
        let items = build_items(&a, &parts, &deps);
        assert_eq!(items.len(), 2);
        let win_item = items.iter().find(|i| i.user_id == winner).unwrap();
        let lose_item = items.iter().find(|i| i.user_id == loser).unwrap();
        assert_eq!(win_item.action, ItemAction::Capture);
        assert_eq!(lose_item.action, ItemAction::Refund);
        assert!(win_item
            .idempotency_key
            .ends_with(&format!("{}:capture", d1)));
    }

    #[test]
    fn build_skips_non_held_and_ineligible() {
        let winner = UserId::new();
        let revoked = UserId::new();
        let captured_user = UserId::new();
        let a = auction(Some(winner));
        let (d1, d2, d3) = (DepositId::new(), DepositId::new(), DepositId::new());
        let parts = vec![
            participant(a.id, winner, d1, true),
            participant(a.id, revoked, d2, false),
            participant(a.id, captured_user, d3, true),
        ];
        let deps = vec![
            deposit(d1, a.id, winner, DepositStatus::Held),
            deposit(d2, a.id, revoked, DepositStatus::Held),
            deposit(d3, a.id, captured_user, DepositStatus::Captured),
        ];
        let items = build_items(&a, &parts, &deps);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].user_id, winner);
    }

    #[test]
    fn empty_manifest_completes() {
        assert_eq!(finalize_decision(&[]), FinalizeDecision::Complete);
    }

    #[test]
    fn all_acknowledged_completes() {
        let items = vec![
            item(ItemAction::Capture, ItemStatus::Acknowledged, 0),
            item(ItemAction::Refund, ItemStatus::Acknowledged, 1),
        ];
        assert_eq!(finalize_decision(&items), FinalizeDecision::Complete);
    }

    #[test]
    fn three_strikes_escalates() {
        let items = vec![
            item(ItemAction::Capture, ItemStatus::Acknowledged, 0),
            item(ItemAction::Refund, ItemStatus::Failed, MAX_RETRIES),
        ];
        assert_eq!(finalize_decision(&items), FinalizeDecision::Escalate);
    }

    #[test]
    fn failed_under_budget_continues() {
        let items = vec![
            item(ItemAction::Capture, ItemStatus::Acknowledged, 0),
            item(ItemAction::Refund, ItemStatus::Failed, MAX_RETRIES - 1),
        ];
        assert_eq!(finalize_decision(&items), FinalizeDecision::Continue);
        assert!(items[1].processable());
    }

    #[test]
    fn sent_items_are_not_processable() {
        assert!(!item(ItemAction::Capture, ItemStatus::Sent, 0).processable());
        assert!(item(ItemAction::Capture, ItemStatus::Pending, 0).processable());
        assert!(!item(ItemAction::Capture, ItemStatus::Failed, MAX_RETRIES).processable());
    }

    #[test]
    fn reset_failed_restores_pending_and_clears_exhausted_counters() {
        let mut items = vec![
            item(ItemAction::Capture, ItemStatus::Acknowledged, 0),
            item(ItemAction::Refund, ItemStatus::Failed, MAX_RETRIES),
            item(ItemAction::Refund, ItemStatus::Failed, 1),
        ];
        reset_failed(&mut items);
        assert_eq!(items[0].status, ItemStatus::Acknowledged);
        assert_eq!(items[1].status, ItemStatus::Pending);
        assert_eq!(items[1].retry_count, 0);
        assert_eq!(items[2].status, ItemStatus::Pending);
        assert_eq!(items[2].retry_count, 1, "unexhausted counter kept");
    }

    #[test]
    fn memory_safety_boundary() {
        let items: Vec<_> = (0..MEMORY_SAFETY_ITEMS_LIMIT)
            .map(|_| item(ItemAction::Refund, ItemStatus::Pending, 0))
            .collect();
        assert!(!exceeds_memory_safety(&items));
        let mut over = items;
        over.push(item(ItemAction::Refund, ItemStatus::Pending, 0));
        assert!(exceeds_memory_safety(&over));
    }

    #[test]
    fn document_round_trips() {
        let items = vec![
            item(ItemAction::Capture, ItemStatus::Pending, 0),
            item(ItemAction::Refund, ItemStatus::Failed, 2),
        ];
        let doc = items_to_json(&items);
        let back = items_from_json(&doc).unwrap();
        assert_eq!(items, back);
    }

    #[test]
    fn amounts_survive_the_document_as_exact_decimals() {
        let mut i = item(ItemAction::Capture, ItemStatus::Pending, 0);
        i.amount = "123.45".parse().unwrap();
        let back = items_from_json(&items_to_json(&[i.clone()])).unwrap();
        assert_eq!(back[0].amount, i.amount);
    }

    #[test]
    fn mark_failed_increments_retry() {
        let mut i = item(ItemAction::Capture, ItemStatus::Pending, 0);
        i.mark_failed("pos down");
        assert_eq!(i.status, ItemStatus::Failed);
        assert_eq!(i.retry_count, 1);
        assert_eq!(i.last_error.as_deref(), Some("pos down"));
        i.mark_acknowledged(Some("ref-1".into()));
        assert_eq!(i.status, ItemStatus::Acknowledged);
        assert!(i.last_error.is_none());
    }
}
