//! Point-of-sale capability.
//!
//! The POS is a two-method capability (capture, refund) behind a trait; the
//! mock, the chaos mock and the REST provider are variant implementations,
//! and [`GuardedPos`] wraps whichever one is supplied with the hard timeout
//! and the circuit breaker.
//!
//! Identical `idempotency_key` values MUST be treated by the provider as the
//! same operation; the settlement service relies on this for exactly-once
//! monetary effects.

pub mod breaker;
pub mod chaos;
pub mod mock;
pub mod rest;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use gavel_core::types::DepositId;

pub use breaker::{BreakerState, CircuitBreaker, GuardedPos};
pub use chaos::ChaosPos;
pub use mock::MockPos;
pub use rest::RestPos;

// ── Wire contract ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub deposit_id: DepositId,
    pub pos_transaction_id: String,
    pub pos_provider: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub success: bool,
    pub pos_reference: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub deposit_id: DepositId,
    pub pos_transaction_id: String,
    pub pos_provider: String,
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResponse {
    pub success: bool,
    pub pos_refund_id: Option<String>,
    pub message: Option<String>,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// POS call failures the settlement state machine distinguishes:
/// `CircuitOpen` means the downstream was never invoked (safe retry, no
/// re-read); `Timeout` and `Transport` mean the outcome is unknown and the
/// deposit must be re-read before counting the failure.
#[derive(Debug, Error)]
pub enum PosError {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("pos call timed out")]
    Timeout,

    #[error("pos transport error: {0}")]
    Transport(String),
}

// ── Capability ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait PosProvider: Send + Sync {
    async fn capture(&self, req: &CaptureRequest) -> Result<CaptureResponse, PosError>;
    async fn refund(&self, req: &RefundRequest) -> Result<RefundResponse, PosError>;
}
