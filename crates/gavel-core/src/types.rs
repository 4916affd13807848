use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// All engine timestamps are UTC. `server_ts` on a bid is assigned by the
/// database at insert and is the authoritative ordering for one auction.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ── AuctionId ────────────────────────────────────────────────────────────────

/// Identifier of the single-lot auction aggregate.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct AuctionId(pub Uuid);

impl AuctionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AuctionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for AuctionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for AuctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuctionId({})", &self.0.to_string()[..8])
    }
}

// ── UserId ───────────────────────────────────────────────────────────────────

/// Identifier of an authenticated bidder. Raw values never reach non-owner
/// clients; use [`UserId::masked`] on every broadcast path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Privacy masking for the wire: first 8 characters plus `***`.
    pub fn masked(&self) -> String {
        let s = self.0.to_string();
        format!("{}***", &s[..8])
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({}***)", &self.0.to_string()[..8])
    }
}

// ── BidId / DepositId / ManifestId ───────────────────────────────────────────

macro_rules! uuid_id {
    ($name:ident, $label:expr) => {
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $label, &self.0.to_string()[..8])
            }
        }
    };
}

uuid_id!(BidId, "BidId");
uuid_id!(DepositId, "DepositId");
uuid_id!(ManifestId, "ManifestId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_user_id_is_first_8_plus_stars() {
        let id: UserId = "a1b2c3d4-0000-0000-0000-000000000000".parse().unwrap();
        assert_eq!(id.masked(), "a1b2c3d4***");
    }

    #[test]
    fn auction_id_round_trips_through_str() {
        let id = AuctionId::new();
        let parsed: AuctionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn auction_id_rejects_non_uuid() {
        assert!("not-a-uuid".parse::<AuctionId>().is_err());
        assert!("12345".parse::<AuctionId>().is_err());
    }
}
