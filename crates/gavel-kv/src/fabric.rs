//! Cross-instance pub/sub fan-out.
//!
//! Engine events for auction `{id}` are published as JSON on channel
//! `gavel:auction:{id}`; every instance runs one `PSUBSCRIBE` consumer that
//! feeds its local room registry, so a broadcast emitted on instance A
//! reaches subscribers connected to instance B.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use gavel_core::error::GavelError;
use gavel_core::keys::{auction_channel, AUCTION_CHANNEL_PATTERN};
use gavel_core::protocol::ServerMessage;
use gavel_core::types::AuctionId;

use crate::store::KvStore;

/// One event received off the fabric, addressed to an auction room.
#[derive(Debug, Clone)]
pub struct FabricEvent {
    pub auction_id: AuctionId,
    /// The serialized `ServerMessage`, forwarded verbatim to room members.
    pub payload: String,
}

/// Publisher half, cloned into every worker and the gateway.
#[derive(Clone)]
pub struct EventPublisher {
    kv: KvStore,
}

impl EventPublisher {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub async fn publish(
        &self,
        auction_id: AuctionId,
        msg: &ServerMessage,
    ) -> Result<(), GavelError> {
        let mut conn = self.kv.conn.clone();
        let res: Result<i64, _> = redis::cmd("PUBLISH")
            .arg(auction_channel(auction_id))
            .arg(msg.to_json())
            .query_async(&mut conn)
            .await;
        match res {
            Ok(receivers) => {
                self.kv.mark(true);
                debug!(auction_id = %auction_id, receivers, "event published");
                Ok(())
            }
            Err(e) => {
                self.kv.mark(false);
                Err(GavelError::Kv(e.to_string()))
            }
        }
    }
}

/// Extract the auction id from a fabric channel name.
pub(crate) fn parse_channel(channel: &str) -> Option<AuctionId> {
    channel.strip_prefix("gavel:auction:")?.parse().ok()
}

/// Run the PSUBSCRIBE consumer, pushing every event into `tx`. Reconnects
/// with a short delay on any transport failure; runs until the receiver is
/// dropped.
pub fn spawn_subscriber(
    kv: KvStore,
    tx: mpsc::Sender<FabricEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match subscribe_once(&kv, &tx).await {
                Ok(()) => break, // receiver dropped, shut down
                Err(e) => {
                    kv.mark(false);
                    warn!(error = %e, "fabric subscriber disconnected; retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    })
}

async fn subscribe_once(kv: &KvStore, tx: &mpsc::Sender<FabricEvent>) -> Result<(), GavelError> {
    let conn = kv
        .client
        .get_async_connection()
        .await
        .map_err(|e| GavelError::Kv(e.to_string()))?;
    let mut pubsub = conn.into_pubsub();
    pubsub
        .psubscribe(AUCTION_CHANNEL_PATTERN)
        .await
        .map_err(|e| GavelError::Kv(e.to_string()))?;
    kv.mark(true);

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let Some(auction_id) = parse_channel(&channel) else {
            continue;
        };
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(channel, error = %e, "undecodable fabric payload");
                continue;
            }
        };
        if tx.send(FabricEvent { auction_id, payload }).await.is_err() {
            return Ok(());
        }
    }
    Err(GavelError::Kv("pubsub stream ended".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trip() {
        let id: AuctionId = "11111111-2222-3333-4444-555555555555".parse().unwrap();
        assert_eq!(parse_channel(&auction_channel(id)), Some(id));
    }

    #[test]
    fn foreign_channels_are_ignored() {
        assert_eq!(parse_channel("other:channel"), None);
        assert_eq!(parse_channel("gavel:auction:not-a-uuid"), None);
    }
}
