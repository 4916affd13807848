use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use gavel_core::error::GavelError;
use gavel_core::metrics;

/// Watchdog ping period.
const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Shared Redis handle with connection-health tracking.
///
/// `ConnectionManager` reconnects internally; health reflects the latest
/// observed outcome (watchdog ping or any command), mirrored into the
/// `gavel_kv_health` gauge.
#[derive(Clone)]
pub struct KvStore {
    pub(crate) client: redis::Client,
    pub(crate) conn: ConnectionManager,
    healthy: Arc<AtomicBool>,
}

impl KvStore {
    pub async fn connect(url: &str) -> Result<Self, GavelError> {
        let client = redis::Client::open(url).map_err(|e| GavelError::Kv(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| GavelError::Kv(e.to_string()))?;
        let store = Self {
            client,
            conn,
            healthy: Arc::new(AtomicBool::new(true)),
        };
        store.mark(true);
        Ok(store)
    }

    /// Latest connection-event view. Callers on the bid path fail closed
    /// when this is false.
    pub fn healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub(crate) fn mark(&self, ok: bool) {
        let was = self.healthy.swap(ok, Ordering::Relaxed);
        metrics::KV_HEALTH.set(ok as i64);
        if was != ok {
            if ok {
                debug!("kv connection healthy");
            } else {
                warn!("kv connection unhealthy");
            }
        }
    }

    /// Run an INFO-free PING loop forever, keeping `healthy()` current even
    /// when no commands are flowing.
    pub fn spawn_watchdog(&self) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PING_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let mut conn = store.conn.clone();
                let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                store.mark(pong.is_ok());
            }
        })
    }
}
