//! ─── Gavel Engine Constants ─────────────────────────────────────────────────
//!
//! Lock TTLs, tick periods, retry budgets and settlement bounds. The settlement
//! bounds are sized so that ITEMS_PER_TICK × POS_TIMEOUT stays comfortably
//! below SETTLEMENT_LOCK_TTL.

use std::time::Duration;

// ── KV locks ─────────────────────────────────────────────────────────────────

/// Per-auction bid lock (`bid:lock:auction:{id}`).
pub const BID_LOCK_TTL: Duration = Duration::from_secs(5);

/// Per-auction ending lock (`auction:ending:lock:{id}`).
pub const ENDING_LOCK_TTL: Duration = Duration::from_secs(10);

/// Per-auction settlement lock (`auction:settlement:lock:{id}`).
pub const SETTLEMENT_LOCK_TTL: Duration = Duration::from_secs(30);

// ── Rate limiting (fixed window) ─────────────────────────────────────────────

pub const RATE_WINDOW: Duration = Duration::from_secs(3);

/// Bids per user per window.
pub const RATE_USER_MAX: u64 = 5;

/// Bids per auction per window.
pub const RATE_AUCTION_MAX: u64 = 50;

// ── Anti-sniping ─────────────────────────────────────────────────────────────

/// Default sniper window: a bid in the final N seconds restarts the clock by N.
pub const SNIPER_WINDOW_DEFAULT_SECS: u64 = 60;

// ── POS / circuit breaker ────────────────────────────────────────────────────

/// Hard per-call POS timeout. A timeout counts as a breaker failure.
pub const POS_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failures before the breaker opens.
pub const BREAKER_TRIP_THRESHOLD: u32 = 5;

/// Cool-down before an OPEN breaker probes with HALF_OPEN.
pub const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

// ── Settlement ───────────────────────────────────────────────────────────────

/// Three-strike rule: a failed item with this retry count escalates.
pub const MAX_RETRIES: u32 = 3;

/// Items dispatched per manifest per worker tick.
pub const ITEMS_PER_TICK: usize = 5;

/// Active manifests processed per worker tick.
pub const MAX_MANIFESTS_PER_TICK: usize = 3;

/// A manifest larger than this is escalated without processing.
pub const MEMORY_SAFETY_ITEMS_LIMIT: usize = 500;

/// Manifest expiry horizon from creation.
pub const MANIFEST_EXPIRY: Duration = Duration::from_secs(48 * 3600);

// ── Workers ──────────────────────────────────────────────────────────────────

pub const LIFECYCLE_TICK: Duration = Duration::from_secs(1);
pub const SETTLEMENT_TICK: Duration = Duration::from_secs(5);

// ── DB retry (transient-infra only) ──────────────────────────────────────────

pub const DB_RETRY_ATTEMPTS: u32 = 3;
pub const DB_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
