//! Send-or-persist queue for outbound telemetry

use super::store::{MemoryStore, OutboxRecord, OutboxStore, StoreTier};
use crate::error::TrackerResult;
use crate::models::{now_millis, TelemetryBatch, TelemetryEvent};
use crate::observability::{StructuredLogger, TrackerMetrics};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Delivers a batch of telemetry to the server
#[async_trait]
pub trait TelemetrySender: Send + Sync {
    async fn send_batch(&self, batch: &TelemetryBatch) -> TrackerResult<()>;
}

/// What happened to an enqueued event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    /// Sent directly
    Sent,
    /// Send failed, persisted for a later flush
    Queued,
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushTrigger {
    Timer,
    Online,
    Manual,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Timer => "timer",
            FlushTrigger::Online => "online",
            FlushTrigger::Manual => "manual",
        }
    }
}

/// Result of one flush
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub drained: usize,
    /// False when the drained batch could not be sent and was lost
    pub delivered: bool,
}

/// Counters kept by the queue
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxStats {
    pub pending: usize,
    pub sent_direct: u64,
    pub queued: u64,
    pub delivered_from_outbox: u64,
    pub lost_after_drain: u64,
    pub flushes: u64,
    pub tier: Option<StoreTier>,
}

/// Telemetry queue with a direct-send fast path
///
/// Cheap to clone; clones share the store and counters.
///
/// Delivery is best-effort. An event is *accepted* once `enqueue` returns,
/// either sent or persisted. A flush removes every persisted record before
/// attempting one batched send and does not put them back if that send
/// fails, so events are delivered at most once after being drained. Such
/// losses are counted in `OutboxStats::lost_after_drain`.
///
/// If the store rejects an append, the queue switches once to an
/// in-memory tier for every later append. Drains read both tiers.
#[derive(Clone)]
pub struct OutboxQueue {
    sender: Arc<dyn TelemetrySender>,
    store: Arc<dyn OutboxStore>,
    fallback: Arc<MemoryStore>,
    fell_back: Arc<AtomicBool>,
    tenant_id: String,
    stats: Arc<RwLock<OutboxStats>>,
    metrics: TrackerMetrics,
    logger: StructuredLogger,
}

impl OutboxQueue {
    pub fn new(
        sender: Arc<dyn TelemetrySender>,
        store: Arc<dyn OutboxStore>,
        tenant_id: impl Into<String>,
        logger: StructuredLogger,
    ) -> Self {
        let metrics = TrackerMetrics::new();
        metrics.set_store_tier(store.tier().as_str());
        let stats = OutboxStats {
            pending: store.len().unwrap_or(0),
            tier: Some(store.tier()),
            ..Default::default()
        };
        Self {
            sender,
            store,
            fallback: Arc::new(MemoryStore::new()),
            fell_back: Arc::new(AtomicBool::new(false)),
            tenant_id: tenant_id.into(),
            stats: Arc::new(RwLock::new(stats)),
            metrics,
            logger,
        }
    }

    /// Tier receiving new records
    pub fn tier(&self) -> StoreTier {
        if self.fell_back.load(Ordering::Acquire) {
            StoreTier::Ephemeral
        } else {
            self.store.tier()
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Send one event, persisting it if the send fails
    pub async fn enqueue(&self, event: TelemetryEvent) -> TrackerResult<Delivery> {
        self.enqueue_batch(vec![event]).await
    }

    /// Send several events as one batch, persisting all of them on failure
    ///
    /// Returns `StorageUnavailable` only when the send failed and neither
    /// tier accepted the records.
    pub async fn enqueue_batch(&self, events: Vec<TelemetryEvent>) -> TrackerResult<Delivery> {
        if events.is_empty() {
            return Ok(Delivery::Sent);
        }
        let count = events.len() as u64;
        let batch = TelemetryBatch {
            tenant_id: self.tenant_id.clone(),
            events,
        };

        match self.sender.send_batch(&batch).await {
            Ok(()) => {
                self.stats.write().await.sent_direct += count;
                self.metrics.inc_sent_direct(count);
                Ok(Delivery::Sent)
            }
            Err(e) => {
                debug!(error = %e, events = count, "Direct send failed, persisting to outbox");
                self.persist(batch.events)?;
                self.metrics.inc_queued(count);
                let pending = self.refresh_pending();
                let mut stats = self.stats.write().await;
                stats.queued += count;
                stats.pending = pending;
                stats.tier = Some(self.tier());
                Ok(Delivery::Queued)
            }
        }
    }

    fn persist(&self, events: Vec<TelemetryEvent>) -> TrackerResult<()> {
        let queued_at = now_millis();
        if !self.fell_back.load(Ordering::Acquire) {
            match self.store.append(events.clone(), queued_at) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // Concurrent failures log the switch only once
                    if !self.fell_back.swap(true, Ordering::AcqRel) {
                        self.logger.log_outbox_fallback(&e.to_string());
                        self.metrics.set_store_tier(StoreTier::Ephemeral.as_str());
                    }
                }
            }
        }
        self.fallback.append(events, queued_at)
    }

    /// Atomically remove every persisted record, oldest tier first
    pub async fn drain(&self) -> TrackerResult<Vec<OutboxRecord>> {
        let mut records = match self.store.take_all() {
            Ok(records) => records,
            Err(e) => {
                // Records the primary still holds stay there for a later drain
                warn!(error = %e, "Failed to drain primary outbox tier");
                Vec::new()
            }
        };
        records.extend(self.fallback.take_all()?);
        let pending = self.refresh_pending();
        self.stats.write().await.pending = pending;
        Ok(records)
    }

    /// Drain and deliver the outbox as one batch
    ///
    /// A send failure is absorbed: the drained events are dropped and
    /// counted as lost rather than re-queued.
    pub async fn flush(&self, trigger: FlushTrigger) -> TrackerResult<FlushReport> {
        let records = self.drain().await?;
        let drained = records.len();
        if drained == 0 {
            return Ok(FlushReport {
                trigger,
                drained,
                delivered: true,
            });
        }

        let batch = TelemetryBatch {
            tenant_id: self.tenant_id.clone(),
            events: records.into_iter().map(|r| r.event).collect(),
        };
        let delivered = match self.sender.send_batch(&batch).await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, events = drained, "Outbox batch send failed");
                false
            }
        };
        self.logger
            .log_outbox_flush(trigger.as_str(), drained, delivered);

        let mut stats = self.stats.write().await;
        stats.flushes += 1;
        if delivered {
            stats.delivered_from_outbox += drained as u64;
            self.metrics.inc_drained(drained as u64);
        } else {
            stats.lost_after_drain += drained as u64;
            self.metrics.inc_lost_after_drain(drained as u64);
        }

        Ok(FlushReport {
            trigger,
            drained,
            delivered,
        })
    }

    /// Number of persisted records across both tiers
    pub fn pending(&self) -> usize {
        self.store.len().unwrap_or(0) + self.fallback.len().unwrap_or(0)
    }

    pub async fn stats(&self) -> OutboxStats {
        let mut stats = self.stats.read().await.clone();
        stats.pending = self.pending();
        stats.tier = Some(self.tier());
        stats
    }

    fn refresh_pending(&self) -> usize {
        let pending = self.pending();
        self.metrics.set_outbox_pending(pending as i64);
        pending
    }
}
