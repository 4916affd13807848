//! Three-state circuit breaker plus the hard per-call timeout.
//!
//! CLOSED → OPEN after 5 consecutive failures; OPEN fails fast without
//! touching the downstream; after the cool-down the next call probes in
//! HALF_OPEN, whose first outcome is decisive. A timeout and a declined
//! response both count as failures.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use gavel_core::constants::{BREAKER_COOLDOWN, BREAKER_TRIP_THRESHOLD, POS_TIMEOUT};
use gavel_core::metrics;

use crate::{CaptureRequest, CaptureResponse, PosError, PosProvider, RefundRequest, RefundResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    /// Gauge encoding: CLOSED(0), HALF_OPEN(1), OPEN(2).
    pub fn as_gauge(&self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::HalfOpen => 1,
            BreakerState::Open => 2,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    trip_threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BREAKER_TRIP_THRESHOLD, BREAKER_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(trip_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            trip_threshold,
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// Admit or reject a call. While OPEN, rejects with `CircuitOpen` until
    /// the cool-down has elapsed, then transitions to HALF_OPEN and admits
    /// the probe.
    pub fn preflight(&self) -> Result<(), PosError> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    metrics::CIRCUIT_STATE.set(inner.state.as_gauge());
                    Ok(())
                } else {
                    Err(PosError::CircuitOpen)
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.failure_count = 0;
        inner.state = BreakerState::Closed;
        metrics::CIRCUIT_STATE.set(inner.state.as_gauge());
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                metrics::CIRCUIT_TRIPS.inc();
                warn!("pos circuit re-opened by half-open probe");
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.trip_threshold {
                    inner.state = BreakerState::Open;
                    metrics::CIRCUIT_TRIPS.inc();
                    warn!(failures = inner.failure_count, "pos circuit opened");
                }
            }
            BreakerState::Open => {}
        }
        metrics::CIRCUIT_STATE.set(inner.state.as_gauge());
    }
}

// ── Guarded provider ─────────────────────────────────────────────────────────

/// The breaker-and-timeout wrapper every settlement call goes through.
pub struct GuardedPos<P> {
    inner: P,
    breaker: Arc<CircuitBreaker>,
}

impl<P> GuardedPos<P> {
    pub fn new(inner: P, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<P: PosProvider> PosProvider for GuardedPos<P> {
    async fn capture(&self, req: &CaptureRequest) -> Result<CaptureResponse, PosError> {
        self.breaker.preflight()?;
        match tokio::time::timeout(POS_TIMEOUT, self.inner.capture(req)).await {
            Err(_) => {
                metrics::POS_TIMEOUTS.inc();
                self.breaker.on_failure();
                Err(PosError::Timeout)
            }
            Ok(Err(e)) => {
                self.breaker.on_failure();
                Err(e)
            }
            Ok(Ok(resp)) => {
                if resp.success {
                    self.breaker.on_success();
                } else {
                    self.breaker.on_failure();
                }
                Ok(resp)
            }
        }
    }

    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse, PosError> {
        self.breaker.preflight()?;
        match tokio::time::timeout(POS_TIMEOUT, self.inner.refund(req)).await {
            Err(_) => {
                metrics::POS_TIMEOUTS.inc();
                self.breaker.on_failure();
                Err(PosError::Timeout)
            }
            Ok(Err(e)) => {
                self.breaker.on_failure();
                Err(e)
            }
            Ok(Ok(resp)) => {
                if resp.success {
                    self.breaker.on_success();
                } else {
                    self.breaker.on_failure();
                }
                Ok(resp)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(20))
    }

    #[test]
    fn stays_closed_below_threshold() {
        let b = breaker();
        for _ in 0..4 {
            b.on_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.preflight().is_ok());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let b = breaker();
        for _ in 0..4 {
            b.on_failure();
        }
        b.on_success();
        for _ in 0..4 {
            b.on_failure();
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let b = breaker();
        for _ in 0..5 {
            b.on_failure();
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.preflight(), Err(PosError::CircuitOpen)));
    }

    #[test]
    fn cooldown_admits_half_open_probe() {
        let b = breaker();
        for _ in 0..5 {
            b.on_failure();
        }
        assert!(matches!(b.preflight(), Err(PosError::CircuitOpen)));
        std::thread::sleep(Duration::from_millis(25));
        assert!(b.preflight().is_ok());
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes() {
        let b = breaker();
        for _ in 0..5 {
            b.on_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        b.preflight().unwrap();
        b.on_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_cooldown() {
        let b = breaker();
        for _ in 0..5 {
            b.on_failure();
        }
        std::thread::sleep(Duration::from_millis(25));
        b.preflight().unwrap();
        b.on_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(matches!(b.preflight(), Err(PosError::CircuitOpen)));
    }

    #[test]
    fn gauge_encoding() {
        assert_eq!(BreakerState::Closed.as_gauge(), 0);
        assert_eq!(BreakerState::HalfOpen.as_gauge(), 1);
        assert_eq!(BreakerState::Open.as_gauge(), 2);
    }
}
