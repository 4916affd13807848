//! Bid acceptance and auction lifecycle.
//!
//! The bid pipeline is a linear sequence of phases bracketed by a per-auction
//! KV lock and a DB transaction with a pessimistic lock on the auction row;
//! the lifecycle worker polls for expired auctions and drives
//! LIVE→ENDING→ENDED with winner selection.

pub mod bid;
pub mod lifecycle;

pub use bid::{AcceptedBid, BidOutcome, BidService, PlaceBidRequest};
pub use lifecycle::LifecycleWorker;
