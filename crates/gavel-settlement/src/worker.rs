//! Settlement worker: one task per process on a 5-second tick.
//!
//! Phase A initiates settlements for freshly ENDED auctions; Phase B drives
//! active manifests, bounded to MAX_MANIFESTS_PER_TICK manifests and
//! ITEMS_PER_TICK items each so a tick stays well inside the 30-second
//! settlement lock TTL. Items are persisted after every dispatch so work
//! already done survives a crash mid-tick.

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use chrono::Utc;
use tracing::{debug, info, warn};

use gavel_core::constants::{ITEMS_PER_TICK, MAX_MANIFESTS_PER_TICK, SETTLEMENT_LOCK_TTL, SETTLEMENT_TICK};
use gavel_core::error::GavelError;
use gavel_core::keys;
use gavel_core::metrics;
use gavel_core::protocol::ServerMessage;
use gavel_core::status::ManifestStatus;

use gavel_kv::{EventPublisher, KvStore};
use gavel_store::{auctions, manifests, ManifestRow};

use crate::manifest::{acknowledged_count, exceeds_memory_safety, items_to_json};
use crate::service::{FinalizeOutcome, SettlementService};

pub struct SettlementWorker {
    pool: PgPool,
    kv: KvStore,
    publisher: EventPublisher,
    service: Arc<SettlementService>,
}

impl SettlementWorker {
    pub fn new(pool: PgPool, kv: KvStore, publisher: EventPublisher, service: Arc<SettlementService>) -> Self {
        Self { pool, kv, publisher, service }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SETTLEMENT_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let started = Instant::now();
                if let Err(e) = self.run_tick().await {
                    warn!(error = %e, "settlement tick failed");
                }
                metrics::SETTLEMENT_TICK_SECONDS.observe(started.elapsed().as_secs_f64());
            }
        })
    }

    pub async fn run_tick(&self) -> Result<(), GavelError> {
        // Locks unavailable means mutual exclusion cannot be guaranteed;
        // skip the whole tick rather than run unlocked.
        if !self.kv.healthy() {
            debug!("kv unhealthy; skipping settlement tick");
            return Ok(());
        }

        self.initiate_new().await?;
        self.process_active().await?;
        Ok(())
    }

    // ── Phase A: initiate ────────────────────────────────────────────────────

    async fn initiate_new(&self) -> Result<(), GavelError> {
        let ended = auctions::find_ended(&self.pool).await?;
        for auction in ended {
            let lock_key = keys::settlement_lock_key(auction.id);
            let Some(guard) = self.kv.acquire(&lock_key, SETTLEMENT_LOCK_TTL).await? else {
                metrics::LOCK_FAILURES.with_label_values(&["settlement"]).inc();
                continue;
            };
            let result = self.initiate_one(auction.id).await;
            if let Err(e) = self.kv.release(&guard).await {
                warn!(key = %lock_key, error = %e, "settlement lock release failed");
            }
            match result {
                Ok(()) => {}
                Err(GavelError::ManifestExists) => {
                    debug!(auction_id = %auction.id, "manifest already exists; another instance won");
                }
                Err(e) => warn!(auction_id = %auction.id, error = %e, "settlement initiation failed"),
            }
        }
        Ok(())
    }

    async fn initiate_one(&self, auction_id: gavel_core::types::AuctionId) -> Result<(), GavelError> {
        let manifest = self.service.initiate_settlement(auction_id).await?;
        self.broadcast(
            auction_id,
            &ServerMessage::SettlementPending { auction_id: auction_id.to_string() },
        )
        .await;

        // No-bid auction: nothing to capture or refund, complete immediately
        // without a single POS call.
        if manifest.items_total == 0 {
            let outcome = self.service.finalize_manifest(&manifest, &[]).await?;
            if outcome == FinalizeOutcome::Completed {
                self.broadcast(
                    auction_id,
                    &ServerMessage::AuctionSettled { auction_id: auction_id.to_string() },
                )
                .await;
            }
        }
        Ok(())
    }

    // ── Phase B: process ─────────────────────────────────────────────────────

    async fn process_active(&self) -> Result<(), GavelError> {
        let active = manifests::find_active(&self.pool).await?;
        metrics::SETTLEMENT_BACKLOG.set(active.len() as i64);

        for row in active.into_iter().take(MAX_MANIFESTS_PER_TICK) {
            let lock_key = keys::settlement_lock_key(row.auction_id);
            let Some(guard) = self.kv.acquire(&lock_key, SETTLEMENT_LOCK_TTL).await? else {
                metrics::LOCK_FAILURES.with_label_values(&["settlement"]).inc();
                continue;
            };
            let result = self.process_manifest(&row).await;
            if let Err(e) = self.kv.release(&guard).await {
                warn!(key = %lock_key, error = %e, "settlement lock release failed");
            }
            if let Err(e) = result {
                warn!(manifest_id = %row.id, error = %e, "manifest processing failed");
            }
        }
        Ok(())
    }

    async fn process_manifest(&self, row: &ManifestRow) -> Result<(), GavelError> {
        let auction_id = row.auction_id;
        let mut items = SettlementService::decode_items(row)?;

        // 48-hour horizon: operator intervention required.
        if row.expires_at < Utc::now() {
            self.service
                .escalate(row, &items, ManifestStatus::Expired, "manifest expired after 48h")
                .await?;
            self.broadcast(
                auction_id,
                &ServerMessage::SettlementFailed {
                    auction_id: auction_id.to_string(),
                    reason: Some("settlement window expired".into()),
                },
            )
            .await;
            return Ok(());
        }

        // A pathological manifest would starve the worker; escalate without
        // touching a single item.
        if exceeds_memory_safety(&items) {
            self.service
                .escalate(row, &items, ManifestStatus::Escalated, "memory safety items limit exceeded")
                .await?;
            self.broadcast(
                auction_id,
                &ServerMessage::SettlementFailed {
                    auction_id: auction_id.to_string(),
                    reason: Some("manifest exceeds memory safety limit".into()),
                },
            )
            .await;
            return Ok(());
        }

        let mut processed = 0usize;
        for idx in 0..items.len() {
            if processed >= ITEMS_PER_TICK {
                break;
            }
            if !items[idx].processable() {
                continue;
            }
            self.service.process_item(&mut items[idx]).await;
            processed += 1;

            // Durable after every item: a crash loses at most the item in
            // flight, never acknowledged work.
            manifests::persist_items(
                &self.pool,
                row.id,
                &items_to_json(&items),
                acknowledged_count(&items),
            )
            .await?;
        }

        if processed > 0 {
            info!(manifest_id = %row.id, auction_id = %auction_id, processed, "settlement progress");
            self.broadcast(
                auction_id,
                &ServerMessage::SettlementProgress {
                    auction_id: auction_id.to_string(),
                    items_total: row.items_total,
                    items_acknowledged: acknowledged_count(&items),
                },
            )
            .await;
        }

        match self.service.finalize_manifest(row, &items).await? {
            FinalizeOutcome::Completed => {
                self.broadcast(
                    auction_id,
                    &ServerMessage::AuctionSettled { auction_id: auction_id.to_string() },
                )
                .await;
            }
            FinalizeOutcome::Escalated => {
                self.broadcast(
                    auction_id,
                    &ServerMessage::SettlementFailed {
                        auction_id: auction_id.to_string(),
                        reason: Some("item retry budget exhausted".into()),
                    },
                )
                .await;
            }
            FinalizeOutcome::Active => {}
        }
        Ok(())
    }

    async fn broadcast(&self, auction_id: gavel_core::types::AuctionId, msg: &ServerMessage) {
        if let Err(e) = self.publisher.publish(auction_id, msg).await {
            warn!(auction_id = %auction_id, error = %e, "settlement broadcast failed");
        }
    }
}
