//! In-process POS mock with scriptable outcomes and a call log.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{CaptureRequest, CaptureResponse, PosError, PosProvider, RefundRequest, RefundResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Every call succeeds.
    Succeed,
    /// Every call returns `success = false`.
    Decline,
    /// Every call errors at the transport level.
    Fail,
}

impl MockBehavior {
    fn encode(self) -> u8 {
        match self {
            MockBehavior::Succeed => 0,
            MockBehavior::Decline => 1,
            MockBehavior::Fail => 2,
        }
    }

    fn decode(v: u8) -> Self {
        match v {
            0 => MockBehavior::Succeed,
            1 => MockBehavior::Decline,
            _ => MockBehavior::Fail,
        }
    }
}

pub struct MockPos {
    behavior: AtomicU8,
    calls: Mutex<Vec<String>>,
}

impl Default for MockPos {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl MockPos {
    pub fn succeeding() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    pub fn declining() -> Self {
        Self::with_behavior(MockBehavior::Decline)
    }

    pub fn failing() -> Self {
        Self::with_behavior(MockBehavior::Fail)
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: AtomicU8::new(behavior.encode()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Flip behavior mid-test (e.g. a POS that recovers after a storm).
    pub fn set_behavior(&self, behavior: MockBehavior) {
        self.behavior.store(behavior.encode(), Ordering::Relaxed);
    }

    /// Idempotency keys of every call seen, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock call log").clone()
    }

    fn record(&self, key: &str) -> MockBehavior {
        self.calls.lock().expect("mock call log").push(key.to_string());
        MockBehavior::decode(self.behavior.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl PosProvider for MockPos {
    async fn capture(&self, req: &CaptureRequest) -> Result<CaptureResponse, PosError> {
        match self.record(&req.idempotency_key) {
            MockBehavior::Succeed => Ok(CaptureResponse {
                success: true,
                pos_reference: Some(format!("mock-cap-{}", req.idempotency_key)),
                message: None,
            }),
            MockBehavior::Decline => Ok(CaptureResponse {
                success: false,
                pos_reference: None,
                message: Some("declined".into()),
            }),
            MockBehavior::Fail => Err(PosError::Transport("mock transport failure".into())),
        }
    }

    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse, PosError> {
        match self.record(&req.idempotency_key) {
            MockBehavior::Succeed => Ok(RefundResponse {
                success: true,
                pos_refund_id: Some(format!("mock-ref-{}", req.idempotency_key)),
                message: None,
            }),
            MockBehavior::Decline => Ok(RefundResponse {
                success: false,
                pos_refund_id: None,
                message: Some("declined".into()),
            }),
            MockBehavior::Fail => Err(PosError::Transport("mock transport failure".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gavel_core::types::DepositId;
    use rust_decimal::Decimal;

    fn req(key: &str) -> CaptureRequest {
        CaptureRequest {
            deposit_id: DepositId::new(),
            pos_transaction_id: "tx-1".into(),
            pos_provider: "mock".into(),
            amount: Decimal::new(50000, 2),
            currency: "EUR".into(),
            idempotency_key: key.into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let pos = MockPos::succeeding();
        pos.capture(&req("k1")).await.unwrap();
        pos.capture(&req("k2")).await.unwrap();
        assert_eq!(pos.calls(), vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn behavior_flip_takes_effect() {
        let pos = MockPos::failing();
        assert!(pos.capture(&req("k1")).await.is_err());
        pos.set_behavior(MockBehavior::Succeed);
        let resp = pos.capture(&req("k2")).await.unwrap();
        assert!(resp.success);
    }
}
