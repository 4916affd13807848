//! KV coordination fabric: distributed locks, fixed-window rate limiting and
//! cross-instance pub/sub, all over one Redis deployment.
//!
//! Failure semantics are strict: every transport error bubbles to the caller,
//! and bid-path callers treat an error or an unhealthy store as
//! `service_unavailable`. Never fail open.

pub mod fabric;
pub mod lock;
pub mod rate;
pub mod store;

pub use fabric::{spawn_subscriber, EventPublisher, FabricEvent};
pub use lock::LockGuard;
pub use rate::RateDecision;
pub use store::KvStore;
