//! Process-wide Prometheus metrics.
//!
//! Singletons behind `Lazy` statics registered on one registry; callers touch
//! the statics directly (`metrics::BIDS_ACCEPTED.inc()`). `init()` forces
//! registration of every metric so an early scrape sees the full set.

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("valid counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("unique metric name");
    c
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let c = IntCounterVec::new(Opts::new(name, help), labels).expect("valid counter opts");
    REGISTRY.register(Box::new(c.clone())).expect("unique metric name");
    c
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).expect("valid gauge opts");
    REGISTRY.register(Box::new(g.clone())).expect("unique metric name");
    g
}

// ── Bids ─────────────────────────────────────────────────────────────────────

pub static BIDS_ACCEPTED: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_bids_accepted_total", "Accepted bids"));

pub static BID_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("gavel_bid_rejections_total", "Rejected bids by reason", &["reason"])
});

// ── Settlement ───────────────────────────────────────────────────────────────

pub static SETTLEMENT_INITIATED: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_initiated_total", "Settlement manifests created"));

pub static SETTLEMENT_COMPLETED: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_completed_total", "Settlement manifests completed"));

pub static SETTLEMENT_FAILED: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_failed_total", "Settlement manifests escalated"));

pub static SETTLEMENT_EXPIRED: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_expired_total", "Settlement manifests expired"));

pub static SETTLEMENT_CAPTURES: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_captures_total", "Deposits captured"));

pub static SETTLEMENT_REFUNDS: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_settlement_refunds_total", "Deposits refunded"));

pub static SETTLEMENT_ITEM_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "gavel_settlement_item_failures_total",
        "Manifest item failures by action",
        &["action"],
    )
});

pub static STATE_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "gavel_auction_state_transitions_total",
        "Auction state transitions",
        &["from", "to"],
    )
});

pub static ADMIN_RETRIES: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_admin_manifest_retries_total", "Escalated manifests retried"));

pub static RECONCILIATION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    counter("gavel_reconciliation_failures_total", "Failed reconciliation checks")
});

// ── POS / breaker ────────────────────────────────────────────────────────────

pub static POS_TIMEOUTS: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_pos_timeouts_total", "POS calls that hit the hard timeout"));

pub static CIRCUIT_TRIPS: Lazy<IntCounter> =
    Lazy::new(|| counter("gavel_pos_circuit_trips_total", "Circuit breaker open transitions"));

/// 0 = CLOSED, 1 = HALF_OPEN, 2 = OPEN.
pub static CIRCUIT_STATE: Lazy<IntGauge> =
    Lazy::new(|| gauge("gavel_pos_circuit_state", "Circuit breaker state (0/1/2)"));

// ── Coordination ─────────────────────────────────────────────────────────────

pub static LOCK_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("gavel_lock_failures_total", "Lock acquisition failures", &["lock"])
});

/// 1 = healthy, 0 = unhealthy.
pub static KV_HEALTH: Lazy<IntGauge> = Lazy::new(|| gauge("gavel_kv_health", "KV connection health"));

// ── Gateway / worker gauges ──────────────────────────────────────────────────

pub static WS_CONNECTIONS: Lazy<IntGauge> =
    Lazy::new(|| gauge("gavel_ws_connections", "Active WebSocket connections"));

pub static SETTLEMENT_BACKLOG: Lazy<IntGauge> =
    Lazy::new(|| gauge("gavel_settlement_backlog", "Active settlement manifests"));

pub static SETTLEMENT_TICK_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new("gavel_settlement_tick_seconds", "Settlement worker tick duration")
            .buckets(vec![0.005, 0.05, 0.25, 1.0, 5.0, 15.0, 30.0]),
    )
    .expect("valid histogram opts");
    REGISTRY.register(Box::new(h.clone())).expect("unique metric name");
    h
});

/// Touch every metric so the registry is fully populated before first scrape.
pub fn init() {
    Lazy::force(&BIDS_ACCEPTED);
    Lazy::force(&BID_REJECTIONS);
    Lazy::force(&SETTLEMENT_INITIATED);
    Lazy::force(&SETTLEMENT_COMPLETED);
    Lazy::force(&SETTLEMENT_FAILED);
    Lazy::force(&SETTLEMENT_EXPIRED);
    Lazy::force(&SETTLEMENT_CAPTURES);
    Lazy::force(&SETTLEMENT_REFUNDS);
    Lazy::force(&SETTLEMENT_ITEM_FAILURES);
    Lazy::force(&STATE_TRANSITIONS);
    Lazy::force(&ADMIN_RETRIES);
    Lazy::force(&RECONCILIATION_FAILURES);
    Lazy::force(&POS_TIMEOUTS);
    Lazy::force(&CIRCUIT_TRIPS);
    Lazy::force(&CIRCUIT_STATE);
    Lazy::force(&LOCK_FAILURES);
    Lazy::force(&KV_HEALTH);
    Lazy::force(&WS_CONNECTIONS);
    Lazy::force(&SETTLEMENT_BACKLOG);
    Lazy::force(&SETTLEMENT_TICK_SECONDS);
}

/// Render the registry in Prometheus text exposition format.
pub fn gather() -> String {
    TextEncoder::new()
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_registers_once_and_renders() {
        init();
        BIDS_ACCEPTED.inc();
        BID_REJECTIONS.with_label_values(&["price_changed"]).inc();
        CIRCUIT_STATE.set(2);
        let text = gather();
        assert!(text.contains("gavel_bids_accepted_total"));
        assert!(text.contains("gavel_pos_circuit_state"));
        assert!(text.contains("price_changed"));
    }
}
