//! Settlement: drives every deposit of an ended auction to a terminal
//! monetary state with exactly-once effects despite crash, retry and partial
//! POS failure.
//!
//! The manifest is the per-auction work plan; the service owns the item
//! state machine and the monetary transactions; the worker owns scheduling,
//! locking and the expiry / memory-safety guards.

pub mod manifest;
pub mod reconcile;
pub mod service;
pub mod worker;

pub use manifest::{FinalizeDecision, ManifestItem};
pub use reconcile::{reconcile_auction, FinanceSummary, ReconciliationReport};
pub use service::{FinalizeOutcome, SettlementService};
pub use worker::SettlementWorker;
