//! gavel-node — the auction engine binary.
//!
//! Startup sequence:
//!   1. Read and validate configuration (refuses to start on weak values)
//!   2. Connect Postgres and apply migrations
//!   3. Connect the KV store; start the health watchdog and fabric pump
//!   4. Wire the POS provider behind the circuit breaker
//!   5. Spawn the lifecycle and settlement workers
//!   6. Serve the WebSocket gateway, admin surface and metrics

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gavel_core::{metrics, Config};
use gavel_engine::{BidService, LifecycleWorker};
use gavel_gateway::auth::AuthVerifier;
use gavel_gateway::rooms::{spawn_fabric_pump, RoomRegistry};
use gavel_gateway::GatewayState;
use gavel_kv::{EventPublisher, KvStore};
use gavel_pos::{ChaosPos, CircuitBreaker, GuardedPos, MockPos, PosProvider, RestPos};
use gavel_settlement::{SettlementService, SettlementWorker};

#[derive(Parser, Debug)]
#[command(name = "gavel-node", version, about = "Gavel — real-time auction engine")]
struct Args {
    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of a REST POS provider; the in-process mock is used when
    /// absent.
    #[arg(long)]
    pos_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gavel=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("loading configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(port = config.port, production = config.production, "gavel node starting");

    metrics::init();

    // ── Storage ───────────────────────────────────────────────────────────────
    let pool = gavel_store::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    gavel_store::migrate(&pool).await.context("applying migrations")?;

    // ── KV coordination ───────────────────────────────────────────────────────
    let kv = KvStore::connect(&config.kv_url).await.context("connecting to kv store")?;
    kv.spawn_watchdog();
    let publisher = EventPublisher::new(kv.clone());
    let rooms = Arc::new(RoomRegistry::new());
    spawn_fabric_pump(kv.clone(), Arc::clone(&rooms));

    // ── POS behind the breaker ────────────────────────────────────────────────
    let breaker = Arc::new(CircuitBreaker::default());
    let pos: Arc<dyn PosProvider> = match (&args.pos_url, config.pos_chaos) {
        (Some(url), false) => Arc::new(GuardedPos::new(RestPos::new(url.clone()), breaker)),
        (Some(url), true) => {
            Arc::new(GuardedPos::new(ChaosPos::from_env(RestPos::new(url.clone())), breaker))
        }
        (None, true) => Arc::new(GuardedPos::new(ChaosPos::from_env(MockPos::succeeding()), breaker)),
        (None, false) => Arc::new(GuardedPos::new(MockPos::succeeding(), breaker)),
    };
    if config.pos_chaos {
        info!("pos chaos mode enabled");
    }

    // ── Services and workers ──────────────────────────────────────────────────
    let bids = BidService::new(
        pool.clone(),
        kv.clone(),
        Duration::from_secs(config.sniper_window_secs),
    );
    let settlement = Arc::new(SettlementService::new(pool.clone(), pos));

    let lifecycle_handle =
        LifecycleWorker::new(pool.clone(), kv.clone(), publisher.clone()).spawn();
    let settlement_handle = SettlementWorker::new(
        pool.clone(),
        kv.clone(),
        publisher.clone(),
        Arc::clone(&settlement),
    )
    .spawn();

    // ── Gateway ───────────────────────────────────────────────────────────────
    let auth = AuthVerifier::new(&config.auth_secret, &config.auth_issuer, &config.auth_audience);
    let state = Arc::new(GatewayState {
        pool: pool.clone(),
        kv: kv.clone(),
        bids,
        settlement,
        publisher,
        rooms,
        auth,
    });
    let router = gavel_gateway::router(state, &config).context("building router")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "gateway listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving gateway")?;

    // Stop the tickers; in-flight transactions drain with the runtime.
    info!("shutting down; stopping workers");
    lifecycle_handle.abort();
    settlement_handle.abort();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
