//! Single-auction reconciliation: nine checks over the terminal settlement
//! invariants, plus the finance summary for the admin surface.
//!
//! The refund-balance check preserves the historical computation: refunded
//! sum compared against (total − captured) over *all* deposits of the
//! auction, in-flight states included. It fails while refunds are in flight
//! and passes post-terminally.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use gavel_core::error::GavelError;
use gavel_core::metrics;
use gavel_core::money::format_amount;
use gavel_core::status::{AuctionStatus, DepositStatus};
use gavel_core::types::AuctionId;

use gavel_store::{auctions, bids, deposits, ledger, manifests, AuctionRow, BidRow, DepositRow};

/// Balance tolerance: one cent.
const TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationCheck {
    pub name: &'static str,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub auction_id: AuctionId,
    pub passed: bool,
    pub checks: Vec<ReconciliationCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinanceSummary {
    pub total_captured: Decimal,
    pub total_refunded: Decimal,
    pub auctions_settled: i64,
    pub auctions_settlement_failed: i64,
}

// ── Pure checks (testable without a database) ────────────────────────────────

/// Check 7: at most one accepted bid per price.
pub(crate) fn bid_amounts_unique(bids: &[BidRow]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for bid in bids {
        if !seen.insert(bid.amount) {
            return Err(format!("duplicate bid amount {}", format_amount(bid.amount)));
        }
    }
    Ok(())
}

/// Check 8: for bids ordered by server_ts, each later bid clears the earlier
/// one by at least the minimum increment.
pub(crate) fn increments_monotone(bids: &[BidRow], min_increment: Decimal) -> Result<(), String> {
    for pair in bids.windows(2) {
        let (earlier, later) = (&pair[0], &pair[1]);
        if later.amount < earlier.amount + min_increment {
            return Err(format!(
                "bid {} at {} does not clear {} + increment",
                later.id,
                format_amount(later.amount),
                format_amount(earlier.amount)
            ));
        }
    }
    Ok(())
}

/// Check 9: the frozen winner maximizes amount (earliest server_ts breaking
/// a tie) and final_price equals that amount.
pub(crate) fn winner_consistent(auction: &AuctionRow, bids: &[BidRow]) -> Result<(), String> {
    let Some(winner_id) = auction.winner_id else {
        return if bids.is_empty() {
            Ok(())
        } else {
            Err("auction has bids but no winner".into())
        };
    };
    let best = bids
        .iter()
        .max_by(|a, b| a.amount.cmp(&b.amount).then(b.server_ts.cmp(&a.server_ts)))
        .ok_or_else(|| "winner set but no bids exist".to_string())?;
    if best.user_id != winner_id {
        return Err(format!("winner {} is not the best bidder {}", winner_id, best.user_id));
    }
    if auction.winner_bid_id != Some(best.id) {
        return Err("winner_bid_id does not reference the best bid".into());
    }
    if auction.final_price != Some(best.amount) {
        return Err(format!(
            "final_price {:?} differs from winning amount {}",
            auction.final_price.map(format_amount),
            format_amount(best.amount)
        ));
    }
    Ok(())
}

/// Check 6, literal computation: refunded vs (total − captured) over all
/// deposits, within one cent.
pub(crate) fn refund_balance(deposits: &[DepositRow]) -> Result<(), String> {
    let total: Decimal = deposits.iter().map(|d| d.amount).sum();
    let captured: Decimal = deposits
        .iter()
        .filter(|d| d.status == DepositStatus::Captured)
        .map(|d| d.amount)
        .sum();
    let refunded: Decimal = deposits
        .iter()
        .filter(|d| d.status == DepositStatus::Refunded)
        .map(|d| d.amount)
        .sum();
    let expected = total - captured;
    let diff = (refunded - expected).abs();
    if diff > TOLERANCE {
        return Err(format!(
            "refunded {} vs expected {} (total {} - captured {})",
            format_amount(refunded),
            format_amount(expected),
            format_amount(total),
            format_amount(captured)
        ));
    }
    Ok(())
}

fn check(name: &'static str, result: Result<(), String>) -> ReconciliationCheck {
    match result {
        Ok(()) => ReconciliationCheck { name, passed: true, detail: None },
        Err(detail) => {
            metrics::RECONCILIATION_FAILURES.inc();
            ReconciliationCheck { name, passed: false, detail: Some(detail) }
        }
    }
}

// ── Report assembly ──────────────────────────────────────────────────────────

pub async fn reconcile_auction(
    pool: &PgPool,
    auction_id: AuctionId,
) -> Result<ReconciliationReport, GavelError> {
    let auction = auctions::get(pool, auction_id).await?.ok_or(GavelError::AuctionNotFound)?;
    let auction_bids = bids::for_auction(pool, auction_id).await?;
    let auction_deposits = deposits::for_auction(pool, auction_id).await?;
    let manifest = manifests::get_by_auction(pool, auction_id).await?;
    let manifest_count = manifests::count_for_auction(pool, auction_id).await?;

    let mut checks = Vec::with_capacity(9);

    // 1. Exactly one manifest.
    checks.push(check(
        "single_manifest",
        if manifest_count == 1 {
            Ok(())
        } else {
            Err(format!("found {manifest_count} manifests"))
        },
    ));

    // 2. Manifest counters consistent with the auction's terminal state.
    checks.push(check(
        "manifest_counters",
        match &manifest {
            None => Err("manifest missing".into()),
            Some(m) => {
                let settled = auction.status == AuctionStatus::Settled;
                let fully_acknowledged = m.items_acknowledged == m.items_total;
                if settled == fully_acknowledged {
                    Ok(())
                } else {
                    Err(format!(
                        "items_acknowledged {}/{} with auction {}",
                        m.items_acknowledged, m.items_total, auction.status
                    ))
                }
            }
        },
    ));

    // 3. One deposit_captured event per CAPTURED deposit.
    let mut captured_events = Ok(());
    for dep in auction_deposits.iter().filter(|d| d.status == DepositStatus::Captured) {
        let n = ledger::count_events(pool, dep.id, "deposit_captured").await?;
        if n != 1 {
            captured_events = Err(format!("deposit {} has {} deposit_captured events", dep.id, n));
            break;
        }
    }
    checks.push(check("captured_ledger_events", captured_events));

    // 4. One initiated + one refunded event per REFUNDED deposit, in order.
    let mut refund_events = Ok(());
    for dep in auction_deposits.iter().filter(|d| d.status == DepositStatus::Refunded) {
        let initiated = ledger::count_events(pool, dep.id, "deposit_refund_initiated").await?;
        let refunded = ledger::count_events(pool, dep.id, "deposit_refunded").await?;
        if initiated != 1 || refunded != 1 {
            refund_events = Err(format!(
                "deposit {} has {initiated} initiated / {refunded} refunded events",
                dep.id
            ));
            break;
        }
        let init_at = ledger::first_event_at(pool, dep.id, "deposit_refund_initiated").await?;
        let done_at = ledger::first_event_at(pool, dep.id, "deposit_refunded").await?;
        if init_at > done_at {
            refund_events = Err(format!("deposit {} refunded before initiation", dep.id));
            break;
        }
    }
    checks.push(check("refund_ledger_events", refund_events));

    // 5. No negative ledger amount.
    let deposit_ids: Vec<_> = auction_deposits.iter().map(|d| d.id).collect();
    let negative = ledger::any_negative_amount(pool, &deposit_ids).await?;
    checks.push(check(
        "no_negative_ledger_amounts",
        if negative { Err("negative ledger amount found".into()) } else { Ok(()) },
    ));

    // 6. Refund balance (literal computation, in-flight states included).
    checks.push(check("refund_balance", refund_balance(&auction_deposits)));

    // 7. Unique (auction, amount).
    checks.push(check("bid_amounts_unique", bid_amounts_unique(&auction_bids)));

    // 8. Monotone increments in server_ts order.
    checks.push(check(
        "bid_increments_monotone",
        increments_monotone(&auction_bids, auction.minimum_increment),
    ));

    // 9. Winner / final price consistency.
    checks.push(check("winner_consistent", winner_consistent(&auction, &auction_bids)));

    let passed = checks.iter().all(|c| c.passed);
    Ok(ReconciliationReport { auction_id, passed, checks })
}

// ── Finance summary ──────────────────────────────────────────────────────────

pub async fn finance_summary(pool: &PgPool) -> Result<FinanceSummary, GavelError> {
    let total_captured: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(sum(amount), 0) FROM payment_ledger WHERE event = 'deposit_captured'",
    )
    .fetch_one(pool)
    .await?;
    let total_refunded: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(sum(amount), 0) FROM payment_ledger WHERE event = 'deposit_refunded'",
    )
    .fetch_one(pool)
    .await?;
    let auctions_settled: i64 =
        sqlx::query_scalar("SELECT count(*) FROM auctions WHERE status = 'SETTLED'")
            .fetch_one(pool)
            .await?;
    let auctions_settlement_failed: i64 =
        sqlx::query_scalar("SELECT count(*) FROM auctions WHERE status = 'SETTLEMENT_FAILED'")
            .fetch_one(pool)
            .await?;
    Ok(FinanceSummary {
        total_captured,
        total_refunded,
        auctions_settled,
        auctions_settlement_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gavel_core::types::{BidId, DepositId, UserId};

    fn ts(sec: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, sec).unwrap()
    }

    fn bid(amount: &str, sec: u32, user: UserId) -> BidRow {
        BidRow {
            id: BidId::new(),
            auction_id: AuctionId::new(),
            user_id: user,
            amount: amount.parse().unwrap(),
            reference_price: "1000.00".parse().unwrap(),
            idempotency_key: format!("k-{sec}"),
            server_ts: ts(sec),
            client_sent_at: None,
            ip: None,
        }
    }

    fn dep(amount: &str, status: DepositStatus) -> DepositRow {
        DepositRow {
            id: DepositId::new(),
            auction_id: AuctionId::new(),
            user_id: UserId::new(),
            amount: amount.parse().unwrap(),
            currency: "EUR".into(),
            status,
            pos_transaction_id: None,
            pos_provider: None,
            created_at: ts(0),
            updated_at: ts(0),
        }
    }

    fn auction_with(winner: &BidRow) -> AuctionRow {
        AuctionRow {
            id: winner.auction_id,
            status: AuctionStatus::Settled,
            starting_price: "1000.00".parse().unwrap(),
            minimum_increment: "50.00".parse().unwrap(),
            current_price: winner.amount,
            required_deposit: "500.00".parse().unwrap(),
            currency: "EUR".into(),
            scheduled_start: None,
            scheduled_end: ts(0),
            extended_until: None,
            actual_start: None,
            ended_at: Some(ts(59)),
            final_price: Some(winner.amount),
            winner_id: Some(winner.user_id),
            winner_bid_id: Some(winner.id),
            bid_count: 1,
            settlement_metadata: None,
            version: 1,
            created_at: ts(0),
            updated_at: ts(59),
        }
    }

    #[test]
    fn duplicate_amounts_fail() {
        let u = UserId::new();
        let bids = vec![bid("1050.00", 1, u), bid("1050.00", 2, u)];
        assert!(bid_amounts_unique(&bids).is_err());
        assert!(bid_amounts_unique(&bids[..1]).is_ok());
    }

    #[test]
    fn increments_enforced_between_successive_bids() {
        let u = UserId::new();
        let inc: Decimal = "50.00".parse().unwrap();
        let good = vec![bid("1050.00", 1, u), bid("1100.00", 2, u)];
        assert!(increments_monotone(&good, inc).is_ok());
        let bad = vec![bid("1050.00", 1, u), bid("1099.99", 2, u)];
        assert!(increments_monotone(&bad, inc).is_err());
    }

    #[test]
    fn winner_must_be_highest_bidder() {
        let (u1, u2) = (UserId::new(), UserId::new());
        let low = bid("1050.00", 1, u1);
        let mut high = bid("1100.00", 2, u2);
        high.auction_id = low.auction_id;
        let auction = auction_with(&high);
        let bids = vec![low.clone(), high.clone()];
        assert!(winner_consistent(&auction, &bids).is_ok());

        let wrong = auction_with(&low);
        assert!(winner_consistent(&wrong, &bids).is_err());
    }

    #[test]
    fn final_price_must_match_winning_amount() {
        let u = UserId::new();
        let b = bid("1100.00", 1, u);
        let mut auction = auction_with(&b);
        auction.final_price = Some("1050.00".parse().unwrap());
        assert!(winner_consistent(&auction, &[b]).is_err());
    }

    #[test]
    fn refund_balance_passes_post_terminally() {
        let deposits = vec![
            dep("500.00", DepositStatus::Captured),
            dep("500.00", DepositStatus::Refunded),
            dep("500.00", DepositStatus::Refunded),
        ];
        assert!(refund_balance(&deposits).is_ok());
    }

    #[test]
    fn refund_balance_fails_with_in_flight_refunds() {
        // Literal computation: a deposit still REFUND_PENDING counts toward
        // the expected side but not the refunded side.
        let deposits = vec![
            dep("500.00", DepositStatus::Captured),
            dep("500.00", DepositStatus::RefundPending),
        ];
        assert!(refund_balance(&deposits).is_err());
    }

    #[test]
    fn refund_balance_tolerates_one_cent() {
        // EXPIRED counts toward total but neither captured nor refunded:
        // expected = 1000.01 - 500.00 = 500.01, refunded = 500.00, off by
        // exactly the tolerance.
        let deposits = vec![
            dep("500.00", DepositStatus::Captured),
            dep("500.00", DepositStatus::Refunded),
            dep("0.01", DepositStatus::Expired),
        ];
        assert!(refund_balance(&deposits).is_ok());
    }
}
