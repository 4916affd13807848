//! Settlement service: manifest lifecycle and the per-item monetary state
//! machine.
//!
//! Every deposit mutation happens under `FOR UPDATE` with a source-state
//! check, writes its transition and ledger rows in the same transaction, and
//! is wrapped by the transient-infra retry. POS failures never escape as
//! raw errors: they become item state, bounded by the three-strike rule.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use gavel_core::constants::MANIFEST_EXPIRY;
use gavel_core::error::GavelError;
use gavel_core::metrics;
use gavel_core::status::{AuctionStatus, DepositStatus, ItemAction, ManifestStatus};
use gavel_core::types::{AuctionId, ManifestId};

use gavel_pos::{CaptureRequest, PosError, PosProvider, RefundRequest};
use gavel_store::{auctions, deposits, ledger, manifests, participants, with_db_retry, ManifestRow};

use crate::manifest::{
    self, acknowledged_count, build_items, finalize_decision, items_from_json, items_to_json,
    reset_failed, settlement_summary, FinalizeDecision, ManifestItem,
};

/// Result of a finalize pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Completed,
    Escalated,
    Active,
}

/// Outcome of one guarded monetary transaction.
enum CommitOutcome {
    /// This run performed the transition and wrote the audit rows.
    Done,
    /// A previous (crashed) run already reached the target state; nothing
    /// was written.
    AlreadyDone,
    /// The deposit was not in the expected source state.
    WrongState(DepositStatus),
}

pub struct SettlementService {
    pool: PgPool,
    pos: Arc<dyn PosProvider>,
}

impl SettlementService {
    pub fn new(pool: PgPool, pos: Arc<dyn PosProvider>) -> Self {
        Self { pool, pos }
    }

    // ── Initiation ───────────────────────────────────────────────────────────

    /// Create the per-auction work plan and move the auction into SETTLING.
    /// One transaction, auction row pessimistically locked; the UNIQUE
    /// constraint on auction_id is the ultimate duplicate guard.
    pub async fn initiate_settlement(&self, auction_id: AuctionId) -> Result<ManifestRow, GavelError> {
        let mut tx = self.pool.begin().await?;
        let Some(auction) = auctions::get_for_update_tx(&mut tx, auction_id).await? else {
            return Err(GavelError::AuctionNotFound);
        };
        if auction.status != AuctionStatus::Ended {
            return Err(GavelError::IllegalTransition {
                from: auction.status.to_string(),
                to: AuctionStatus::Settling.to_string(),
            });
        }
        if manifests::exists_tx(&mut tx, auction_id).await? {
            return Err(GavelError::ManifestExists);
        }

        let parts = participants::eligible_for_auction_tx(&mut tx, auction_id).await?;
        let deposit_ids: Vec<_> = parts.iter().map(|p| p.deposit_id).collect();
        let deps = deposits::batch_get_tx(&mut tx, &deposit_ids).await?;
        let items = build_items(&auction, &parts, &deps);

        let expires_at = Utc::now()
            + chrono::Duration::from_std(MANIFEST_EXPIRY)
                .map_err(|e| GavelError::Config(e.to_string()))?;
        let manifest =
            manifests::insert_tx(&mut tx, auction_id, &items_to_json(&items), items.len() as i32, expires_at)
                .await?;
        auctions::set_status_tx(&mut tx, auction_id, AuctionStatus::Ended, AuctionStatus::Settling)
            .await?;
        tx.commit().await?;

        metrics::SETTLEMENT_INITIATED.inc();
        metrics::STATE_TRANSITIONS.with_label_values(&["ENDED", "SETTLING"]).inc();
        info!(
            auction_id = %auction_id,
            manifest_id = %manifest.id,
            items = items.len(),
            "settlement initiated"
        );
        Ok(manifest)
    }

    // ── Item dispatch ────────────────────────────────────────────────────────

    /// Dispatch one manifest item. Every failure becomes item state — this
    /// never returns an error.
    pub async fn process_item(&self, item: &mut ManifestItem) {
        match item.action {
            ItemAction::Capture => self.process_capture(item).await,
            ItemAction::Refund => self.process_refund(item).await,
        }
    }

    fn fail_item(&self, item: &mut ManifestItem, error: impl Into<String>) {
        let error = error.into();
        metrics::SETTLEMENT_ITEM_FAILURES
            .with_label_values(&[item.action.as_str()])
            .inc();
        warn!(
            deposit_id = %item.deposit_id,
            action = %item.action,
            retry_count = item.retry_count + 1,
            error = %error,
            "manifest item failed"
        );
        item.mark_failed(error);
    }

    async fn process_capture(&self, item: &mut ManifestItem) {
        // Fresh read outside any transaction.
        let deposit = match deposits::get(&self.pool, item.deposit_id).await {
            Ok(Some(d)) => d,
            Ok(None) => return self.fail_item(item, "deposit not found"),
            Err(e) => return self.fail_item(item, e.to_string()),
        };
        match deposit.status {
            // Crash-recovery: the money already moved; acknowledge without
            // touching the POS.
            DepositStatus::Captured => {
                item.mark_acknowledged(None);
                return;
            }
            DepositStatus::Held => {}
            other => return self.fail_item(item, format!("deposit not HELD ({other})")),
        }

        item.mark_sent();
        let req = CaptureRequest {
            deposit_id: item.deposit_id,
            pos_transaction_id: deposit.pos_transaction_id.clone().unwrap_or_default(),
            pos_provider: deposit.pos_provider.clone().unwrap_or_default(),
            amount: item.amount,
            currency: item.currency.clone(),
            idempotency_key: item.idempotency_key.clone(),
            metadata: serde_json::json!({ "auction_id": deposit.auction_id.to_string() }),
        };

        match self.pos.capture(&req).await {
            // Breaker open: POS never invoked, plain safe retry.
            Err(PosError::CircuitOpen) => self.fail_item(item, "pos circuit open"),
            // POS reached, outcome unknown — re-read before counting the
            // failure so a crash-after-POS-success acknowledges instead.
            Err(e) => match deposits::get(&self.pool, item.deposit_id).await {
                Ok(Some(d)) if d.status == DepositStatus::Captured => {
                    item.mark_acknowledged(None);
                }
                _ => self.fail_item(item, e.to_string()),
            },
            Ok(resp) if !resp.success => {
                let msg = resp.message.unwrap_or_else(|| "pos declined capture".into());
                self.fail_item(item, msg);
            }
            Ok(resp) => match self.commit_capture(item, resp.pos_reference.as_deref()).await {
                Ok(CommitOutcome::Done) | Ok(CommitOutcome::AlreadyDone) => {
                    item.mark_acknowledged(resp.pos_reference.clone());
                    metrics::SETTLEMENT_CAPTURES.inc();
                }
                Ok(CommitOutcome::WrongState(s)) => {
                    self.fail_item(item, format!("deposit in {s} after pos capture"))
                }
                // POS succeeded but the DB write failed; the next tick's
                // fresh read will acknowledge once the state is visible.
                Err(e) => self.fail_item(item, e.to_string()),
            },
        }
    }

    /// HELD→CAPTURED with transition + ledger rows, transient errors retried.
    async fn commit_capture(
        &self,
        item: &ManifestItem,
        pos_reference: Option<&str>,
    ) -> Result<CommitOutcome, GavelError> {
        let pool = self.pool.clone();
        let deposit_id = item.deposit_id;
        let amount = item.amount;
        let currency = item.currency.clone();
        let key = item.idempotency_key.clone();
        let pos_reference = pos_reference.map(str::to_owned);

        let outcome = with_db_retry("capture_commit", || {
            let pool = pool.clone();
            let currency = currency.clone();
            let key = key.clone();
            let pos_reference = pos_reference.clone();
            async move {
                let mut tx = pool.begin().await?;
                let Some(dep) = deposits::get_for_update_tx(&mut tx, deposit_id).await? else {
                    return Err(sqlx::Error::RowNotFound);
                };
                match dep.status {
                    DepositStatus::Captured => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::AlreadyDone)
                    }
                    DepositStatus::Held => {
                        deposits::transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::Held,
                            DepositStatus::Captured,
                        )
                        .await?;
                        ledger::insert_transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::Held,
                            DepositStatus::Captured,
                            "deposit_captured",
                        )
                        .await?;
                        ledger::insert_ledger_tx(
                            &mut tx,
                            deposit_id,
                            "deposit_captured",
                            amount,
                            &currency,
                            serde_json::json!({
                                "idempotency_key": key,
                                "pos_reference": pos_reference,
                            }),
                        )
                        .await?;
                        tx.commit().await?;
                        Ok(CommitOutcome::Done)
                    }
                    other => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::WrongState(other))
                    }
                }
            }
        })
        .await?;
        Ok(outcome)
    }

    async fn process_refund(&self, item: &mut ManifestItem) {
        let deposit = match deposits::get(&self.pool, item.deposit_id).await {
            Ok(Some(d)) => d,
            Ok(None) => return self.fail_item(item, "deposit not found"),
            Err(e) => return self.fail_item(item, e.to_string()),
        };
        match deposit.status {
            DepositStatus::Refunded => {
                item.mark_acknowledged(None);
                return;
            }
            // Crashed between initiation and the POS call on a previous run:
            // skip initiation and go straight to the POS.
            DepositStatus::RefundPending => {
                debug!(deposit_id = %item.deposit_id, "refund already initiated; resuming");
            }
            DepositStatus::Held => match self.initiate_refund(item).await {
                Ok(CommitOutcome::Done) | Ok(CommitOutcome::AlreadyDone) => {}
                Ok(CommitOutcome::WrongState(s)) => {
                    return self.fail_item(item, format!("deposit in {s} at refund initiation"))
                }
                Err(e) => return self.fail_item(item, e.to_string()),
            },
            other => return self.fail_item(item, format!("deposit not refundable ({other})")),
        }

        item.mark_sent();
        let req = RefundRequest {
            deposit_id: item.deposit_id,
            pos_transaction_id: deposit.pos_transaction_id.clone().unwrap_or_default(),
            pos_provider: deposit.pos_provider.clone().unwrap_or_default(),
            amount: item.amount,
            currency: item.currency.clone(),
            idempotency_key: item.idempotency_key.clone(),
            metadata: serde_json::json!({ "auction_id": deposit.auction_id.to_string() }),
        };

        match self.pos.refund(&req).await {
            Err(PosError::CircuitOpen) => self.fail_item(item, "pos circuit open"),
            Err(e) => match deposits::get(&self.pool, item.deposit_id).await {
                Ok(Some(d)) if d.status == DepositStatus::Refunded => {
                    item.mark_acknowledged(None);
                }
                _ => self.fail_item(item, e.to_string()),
            },
            Ok(resp) if !resp.success => {
                let msg = resp.message.unwrap_or_else(|| "pos declined refund".into());
                self.fail_item(item, msg);
            }
            Ok(resp) => match self.commit_refund(item, resp.pos_refund_id.as_deref()).await {
                Ok(CommitOutcome::Done) | Ok(CommitOutcome::AlreadyDone) => {
                    item.mark_acknowledged(resp.pos_refund_id.clone());
                    metrics::SETTLEMENT_REFUNDS.inc();
                }
                Ok(CommitOutcome::WrongState(s)) => {
                    self.fail_item(item, format!("deposit in {s} after pos refund"))
                }
                Err(e) => self.fail_item(item, e.to_string()),
            },
        }
    }

    /// First refund stage: HELD→REFUND_PENDING plus the pending Refund
    /// record, so a crash between POS initiation and the DB update is
    /// recoverable.
    async fn initiate_refund(&self, item: &ManifestItem) -> Result<CommitOutcome, GavelError> {
        let pool = self.pool.clone();
        let deposit_id = item.deposit_id;
        let amount = item.amount;
        let currency = item.currency.clone();
        let key = item.idempotency_key.clone();

        let outcome = with_db_retry("refund_initiate", || {
            let pool = pool.clone();
            let currency = currency.clone();
            let key = key.clone();
            async move {
                let mut tx = pool.begin().await?;
                let Some(dep) = deposits::get_for_update_tx(&mut tx, deposit_id).await? else {
                    return Err(sqlx::Error::RowNotFound);
                };
                match dep.status {
                    DepositStatus::RefundPending => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::AlreadyDone)
                    }
                    DepositStatus::Held => {
                        deposits::transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::Held,
                            DepositStatus::RefundPending,
                        )
                        .await?;
                        ledger::insert_transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::Held,
                            DepositStatus::RefundPending,
                            "deposit_refund_initiated",
                        )
                        .await?;
                        ledger::insert_ledger_tx(
                            &mut tx,
                            deposit_id,
                            "deposit_refund_initiated",
                            amount,
                            &currency,
                            serde_json::json!({ "idempotency_key": key }),
                        )
                        .await?;
                        ledger::insert_refund_tx(&mut tx, deposit_id, &key, amount, &currency).await?;
                        tx.commit().await?;
                        Ok(CommitOutcome::Done)
                    }
                    other => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::WrongState(other))
                    }
                }
            }
        })
        .await?;
        Ok(outcome)
    }

    /// Second refund stage: REFUND_PENDING→REFUNDED plus refund completion.
    async fn commit_refund(
        &self,
        item: &ManifestItem,
        pos_refund_id: Option<&str>,
    ) -> Result<CommitOutcome, GavelError> {
        let pool = self.pool.clone();
        let deposit_id = item.deposit_id;
        let amount = item.amount;
        let currency = item.currency.clone();
        let key = item.idempotency_key.clone();
        let pos_refund_id = pos_refund_id.map(str::to_owned);

        let outcome = with_db_retry("refund_commit", || {
            let pool = pool.clone();
            let currency = currency.clone();
            let key = key.clone();
            let pos_refund_id = pos_refund_id.clone();
            async move {
                let mut tx = pool.begin().await?;
                let Some(dep) = deposits::get_for_update_tx(&mut tx, deposit_id).await? else {
                    return Err(sqlx::Error::RowNotFound);
                };
                match dep.status {
                    DepositStatus::Refunded => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::AlreadyDone)
                    }
                    DepositStatus::RefundPending => {
                        deposits::transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::RefundPending,
                            DepositStatus::Refunded,
                        )
                        .await?;
                        ledger::insert_transition_tx(
                            &mut tx,
                            deposit_id,
                            DepositStatus::RefundPending,
                            DepositStatus::Refunded,
                            "deposit_refunded",
                        )
                        .await?;
                        ledger::insert_ledger_tx(
                            &mut tx,
                            deposit_id,
                            "deposit_refunded",
                            amount,
                            &currency,
                            serde_json::json!({
                                "idempotency_key": key,
                                "pos_refund_id": pos_refund_id,
                            }),
                        )
                        .await?;
                        ledger::complete_refund_tx(&mut tx, &key, pos_refund_id.as_deref()).await?;
                        tx.commit().await?;
                        Ok(CommitOutcome::Done)
                    }
                    other => {
                        tx.rollback().await?;
                        Ok(CommitOutcome::WrongState(other))
                    }
                }
            }
        })
        .await?;
        Ok(outcome)
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    pub async fn finalize_manifest(
        &self,
        row: &ManifestRow,
        items: &[ManifestItem],
    ) -> Result<FinalizeOutcome, GavelError> {
        match finalize_decision(items) {
            FinalizeDecision::Complete => {
                let mut tx = self.pool.begin().await?;
                auctions::set_status_tx(
                    &mut tx,
                    row.auction_id,
                    AuctionStatus::Settling,
                    AuctionStatus::Settled,
                )
                .await?;
                auctions::set_settlement_metadata_tx(
                    &mut tx,
                    row.auction_id,
                    settlement_summary(row.auction_id, items),
                )
                .await?;
                manifests::complete_tx(&mut tx, row.id, &items_to_json(items), acknowledged_count(items))
                    .await?;
                tx.commit().await?;
                metrics::SETTLEMENT_COMPLETED.inc();
                metrics::STATE_TRANSITIONS
                    .with_label_values(&["SETTLING", "SETTLED"])
                    .inc();
                info!(auction_id = %row.auction_id, "settlement completed");
                Ok(FinalizeOutcome::Completed)
            }
            FinalizeDecision::Escalate => {
                self.escalate(row, items, ManifestStatus::Escalated, "item retry budget exhausted")
                    .await?;
                Ok(FinalizeOutcome::Escalated)
            }
            FinalizeDecision::Continue => {
                manifests::persist_items(&self.pool, row.id, &items_to_json(items), acknowledged_count(items))
                    .await?;
                Ok(FinalizeOutcome::Active)
            }
        }
    }

    /// Terminal failure branch: three strikes, 48-hour expiry or memory
    /// safety. Auction goes SETTLING→SETTLEMENT_FAILED with the failed items
    /// recorded for the operator.
    pub async fn escalate(
        &self,
        row: &ManifestRow,
        items: &[ManifestItem],
        status: ManifestStatus,
        reason: &str,
    ) -> Result<(), GavelError> {
        let mut tx = self.pool.begin().await?;
        auctions::set_status_tx(
            &mut tx,
            row.auction_id,
            AuctionStatus::Settling,
            AuctionStatus::SettlementFailed,
        )
        .await?;
        auctions::set_settlement_metadata_tx(
            &mut tx,
            row.auction_id,
            serde_json::json!({
                "escalation_reason": reason,
                "summary": settlement_summary(row.auction_id, items),
            }),
        )
        .await?;
        manifests::finalize_failure_tx(
            &mut tx,
            row.id,
            status,
            &items_to_json(items),
            acknowledged_count(items),
            reason,
        )
        .await?;
        tx.commit().await?;
        match status {
            ManifestStatus::Expired => metrics::SETTLEMENT_EXPIRED.inc(),
            _ => metrics::SETTLEMENT_FAILED.inc(),
        }
        metrics::STATE_TRANSITIONS
            .with_label_values(&["SETTLING", "SETTLEMENT_FAILED"])
            .inc();
        warn!(auction_id = %row.auction_id, reason, status = %status, "settlement escalated");
        Ok(())
    }

    // ── Admin retry ──────────────────────────────────────────────────────────

    /// Operator restart of an escalated manifest: failed items back to
    /// pending (exhausted counters reset to zero), manifest back to ACTIVE,
    /// auction back to SETTLING.
    pub async fn retry_escalated(&self, manifest_id: ManifestId) -> Result<ManifestRow, GavelError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = manifests::get_for_update_tx(&mut tx, manifest_id).await? else {
            return Err(GavelError::ManifestNotFound);
        };
        if row.status != ManifestStatus::Escalated {
            return Err(GavelError::IllegalTransition {
                from: row.status.to_string(),
                to: ManifestStatus::Active.to_string(),
            });
        }
        let mut items = items_from_json(&row.items)?;
        reset_failed(&mut items);
        manifests::reactivate_tx(&mut tx, manifest_id, &items_to_json(&items)).await?;
        auctions::set_status_tx(
            &mut tx,
            row.auction_id,
            AuctionStatus::SettlementFailed,
            AuctionStatus::Settling,
        )
        .await?;
        tx.commit().await?;
        metrics::ADMIN_RETRIES.inc();
        metrics::STATE_TRANSITIONS
            .with_label_values(&["SETTLEMENT_FAILED", "SETTLING"])
            .inc();
        info!(manifest_id = %manifest_id, auction_id = %row.auction_id, "escalated manifest retried");
        manifests::get(&self.pool, manifest_id)
            .await?
            .ok_or(GavelError::ManifestNotFound)
    }

    pub(crate) fn decode_items(row: &ManifestRow) -> Result<Vec<ManifestItem>, GavelError> {
        manifest::items_from_json(&row.items)
    }
}
