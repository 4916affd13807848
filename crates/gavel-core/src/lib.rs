pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod money;
pub mod protocol;
pub mod status;
pub mod types;

pub use config::Config;
pub use constants::*;
pub use error::GavelError;
pub use protocol::{ClientMessage, ServerMessage};
pub use status::{
    AuctionStatus, DepositStatus, ItemAction, ItemStatus, ManifestStatus, RefundStatus,
    RejectReason,
};
pub use types::*;
