//! Chaos wrapper: opt-in random failure and random extra delay, used to
//! exercise the breaker and timeout paths against an otherwise healthy
//! provider.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use crate::{CaptureRequest, CaptureResponse, PosError, PosProvider, RefundRequest, RefundResponse};

pub struct ChaosPos<P> {
    inner: P,
    failure_rate: f64,
    max_extra_delay: Duration,
}

impl<P> ChaosPos<P> {
    pub fn new(inner: P, failure_rate: f64, max_extra_delay: Duration) -> Self {
        Self {
            inner,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            max_extra_delay,
        }
    }

    /// Tunables from the environment: `CHAOS_FAILURE_RATE` (0.0–1.0, default
    /// 0.3) and `CHAOS_MAX_DELAY_MS` (default 8000 — beyond the hard POS
    /// timeout, so delays exercise the timeout path).
    pub fn from_env(inner: P) -> Self {
        let rate = std::env::var("CHAOS_FAILURE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.3);
        let delay_ms = std::env::var("CHAOS_MAX_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8_000);
        Self::new(inner, rate, Duration::from_millis(delay_ms))
    }

    async fn misbehave(&self) -> Result<(), PosError> {
        let (fail, delay_ms) = {
            let mut rng = rand::thread_rng();
            let fail = rng.gen_bool(self.failure_rate);
            let cap = self.max_extra_delay.as_millis() as u64;
            let delay_ms = if cap == 0 { 0 } else { rng.gen_range(0..cap) };
            (fail, delay_ms)
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if fail {
            warn!("chaos pos injected failure");
            return Err(PosError::Transport("chaos injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl<P: PosProvider> PosProvider for ChaosPos<P> {
    async fn capture(&self, req: &CaptureRequest) -> Result<CaptureResponse, PosError> {
        self.misbehave().await?;
        self.inner.capture(req).await
    }

    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse, PosError> {
        self.misbehave().await?;
        self.inner.refund(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPos;
    use gavel_core::types::DepositId;
    use rust_decimal::Decimal;

    fn req() -> CaptureRequest {
        CaptureRequest {
            deposit_id: DepositId::new(),
            pos_transaction_id: "tx-1".into(),
            pos_provider: "chaos".into(),
            amount: Decimal::new(50000, 2),
            currency: "EUR".into(),
            idempotency_key: "k1".into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn zero_rate_passes_through() {
        let pos = ChaosPos::new(MockPos::succeeding(), 0.0, Duration::ZERO);
        let resp = pos.capture(&req()).await.unwrap();
        assert!(resp.success);
    }

    #[tokio::test]
    async fn full_rate_always_fails() {
        let pos = ChaosPos::new(MockPos::succeeding(), 1.0, Duration::ZERO);
        assert!(matches!(pos.capture(&req()).await, Err(PosError::Transport(_))));
    }
}
