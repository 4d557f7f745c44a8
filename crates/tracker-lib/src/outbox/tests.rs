//! Integration tests for the outbox
//!
//! These tests verify:
//! - Direct send with fallback to the store
//! - Flush delivery and the at-most-once-after-drain limitation
//! - Durability across restarts and concurrent enqueue/flush
//! - Worker triggers and the share-location rate limit

use super::*;
use crate::error::{TrackerError, TrackerResult};
use crate::geo::GeoPoint;
use crate::models::{TelemetryBatch, TelemetryEvent};
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Sender that can be switched offline and records delivered batches
#[derive(Default)]
struct ToggleSender {
    offline: AtomicBool,
    delivered: Mutex<Vec<TelemetryBatch>>,
}

impl ToggleSender {
    fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn offline() -> Arc<Self> {
        let sender = Self::default();
        sender.offline.store(true, Ordering::SeqCst);
        Arc::new(sender)
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn delivered_agents(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.agent_id.clone()))
            .collect()
    }
}

#[async_trait]
impl TelemetrySender for ToggleSender {
    async fn send_batch(&self, batch: &TelemetryBatch) -> TrackerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TrackerError::Transport("offline".to_string()));
        }
        self.delivered.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

/// Store whose appends always fail
struct BrokenStore;

impl OutboxStore for BrokenStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Durable
    }

    fn append(&self, _events: Vec<TelemetryEvent>, _queued_at: i64) -> TrackerResult<()> {
        Err(TrackerError::StorageUnavailable("disk full".to_string()))
    }

    fn take_all(&self) -> TrackerResult<Vec<OutboxRecord>> {
        Ok(Vec::new())
    }

    fn len(&self) -> TrackerResult<usize> {
        Ok(0)
    }
}

fn event(agent: &str) -> TelemetryEvent {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    TelemetryEvent::location(agent, "r1", GeoPoint::new(10.0, 20.0), at)
}

fn queue_with(sender: Arc<ToggleSender>, store: Arc<dyn OutboxStore>) -> OutboxQueue {
    OutboxQueue::new(sender, store, "t1", StructuredLogger::new("test"))
}

fn memory_queue(sender: Arc<ToggleSender>) -> OutboxQueue {
    queue_with(sender, Arc::new(MemoryStore::new()))
}

#[tokio::test]
async fn test_online_enqueue_sends_directly() {
    let sender = ToggleSender::online();
    let queue = memory_queue(sender.clone());

    let delivery = queue.enqueue(event("a")).await.unwrap();

    assert_eq!(delivery, Delivery::Sent);
    assert_eq!(queue.pending(), 0);
    assert_eq!(sender.delivered_agents(), vec!["a"]);
    let batch = &sender.delivered.lock().unwrap()[0];
    assert_eq!(batch.tenant_id, "t1");
    assert_eq!(queue.stats().await.sent_direct, 1);
}

#[tokio::test]
async fn test_offline_enqueue_is_accepted_then_flushed() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender.clone());

    assert_eq!(queue.enqueue(event("a")).await.unwrap(), Delivery::Queued);
    assert_eq!(queue.enqueue(event("b")).await.unwrap(), Delivery::Queued);
    assert_eq!(queue.pending(), 2);
    assert!(sender.delivered_agents().is_empty());

    sender.set_offline(false);
    let report = queue.flush(FlushTrigger::Manual).await.unwrap();

    assert_eq!(report.drained, 2);
    assert!(report.delivered);
    assert_eq!(sender.delivered_agents(), vec!["a", "b"]);
    assert_eq!(sender.delivered.lock().unwrap().len(), 1);
    assert_eq!(queue.pending(), 0);
    assert_eq!(queue.stats().await.delivered_from_outbox, 2);
}

#[tokio::test]
async fn test_failed_drain_is_not_requeued() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender.clone());
    queue
        .enqueue_batch(vec![event("a"), event("b")])
        .await
        .unwrap();

    let report = queue.flush(FlushTrigger::Timer).await.unwrap();

    assert_eq!(report.drained, 2);
    assert!(!report.delivered);
    assert_eq!(queue.pending(), 0);
    let stats = queue.stats().await;
    assert_eq!(stats.lost_after_drain, 2);
    assert_eq!(stats.flushes, 1);
}

#[tokio::test]
async fn test_flush_of_empty_outbox_sends_nothing() {
    let sender = ToggleSender::online();
    let queue = memory_queue(sender.clone());

    let report = queue.flush(FlushTrigger::Online).await.unwrap();

    assert_eq!(report.drained, 0);
    assert!(sender.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_store_failure_switches_to_memory_tier() {
    let sender = ToggleSender::offline();
    let queue = queue_with(sender.clone(), Arc::new(BrokenStore));
    assert_eq!(queue.tier(), StoreTier::Durable);

    let delivery = tokio_test::assert_ok!(queue.enqueue(event("a")).await);
    assert_eq!(delivery, Delivery::Queued);
    tokio_test::assert_ok!(queue.enqueue(event("b")).await);

    assert_eq!(queue.tier(), StoreTier::Ephemeral);
    assert_eq!(queue.pending(), 2);
    assert_eq!(queue.stats().await.tier, Some(StoreTier::Ephemeral));

    sender.set_offline(false);
    let report = queue.flush(FlushTrigger::Manual).await.unwrap();
    assert_eq!(report.drained, 2);
    assert_eq!(sender.delivered_agents(), vec!["a", "b"]);
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_durable_store_lost_at_runtime_keeps_accepting() {
    let dir = TempDir::new().unwrap();
    let outbox_dir = dir.path().join("outbox");
    let store = Arc::new(FileStore::open(outbox_dir.join("outbox.json")).unwrap());
    let sender = ToggleSender::offline();
    let queue = queue_with(sender.clone(), store);

    std::fs::remove_dir_all(&outbox_dir).unwrap();

    let delivery = tokio_test::assert_ok!(queue.enqueue(event("a")).await);
    assert_eq!(delivery, Delivery::Queued);
    assert_eq!(queue.pending(), 1);
    assert_eq!(queue.tier(), StoreTier::Ephemeral);

    sender.set_offline(false);
    queue.flush(FlushTrigger::Online).await.unwrap();
    assert_eq!(sender.delivered_agents(), vec!["a"]);
}

#[tokio::test]
async fn test_durable_outbox_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("outbox.json");

    {
        let store = Arc::new(FileStore::open(&path).unwrap());
        let queue = queue_with(ToggleSender::offline(), store);
        queue.enqueue(event("a")).await.unwrap();
        assert_eq!(queue.tier(), StoreTier::Durable);
    }

    let sender = ToggleSender::online();
    let queue = queue_with(sender.clone(), Arc::new(FileStore::open(&path).unwrap()));
    assert_eq!(queue.pending(), 1);

    queue.flush(FlushTrigger::Manual).await.unwrap();
    assert_eq!(sender.delivered_agents(), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_and_flush_account_for_every_event() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let q = queue.clone();
        tasks.push(tokio::spawn(async move {
            for j in 0..25 {
                q.enqueue(event(&format!("a{i}-{j}"))).await.unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let q = queue.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                q.flush(FlushTrigger::Timer).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    // Every event is either still stored or counted lost exactly once.
    let stats = queue.stats().await;
    assert_eq!(stats.pending as u64 + stats.lost_after_drain, 200);
    assert_eq!(stats.queued, 200);
}

#[tokio::test(start_paused = true)]
async fn test_worker_flushes_on_timer() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender.clone());
    queue.enqueue(event("a")).await.unwrap();
    sender.set_offline(false);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (worker, _handle) = OutboxWorker::new(queue.clone(), DEFAULT_FLUSH_INTERVAL, shutdown_rx);
    let task = tokio::spawn(worker.run());

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(queue.pending(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(queue.pending(), 0);
    assert_eq!(sender.delivered_agents(), vec!["a"]);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_flushes_when_connectivity_returns() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender.clone());
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (worker, handle) = OutboxWorker::new(queue.clone(), DEFAULT_FLUSH_INTERVAL, shutdown_rx);
    tokio::spawn(worker.run());

    handle.set_online(false);
    queue.enqueue(event("a")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.pending(), 1);

    sender.set_offline(false);
    handle.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(queue.pending(), 0);
    assert_eq!(sender.delivered_agents(), vec!["a"]);
}

#[tokio::test]
async fn test_manual_flush_through_handle() {
    let sender = ToggleSender::offline();
    let queue = memory_queue(sender.clone());
    queue.enqueue(event("a")).await.unwrap();
    sender.set_offline(false);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let (worker, handle) = OutboxWorker::new(queue, DEFAULT_FLUSH_INTERVAL, shutdown_rx);
    let task = tokio::spawn(worker.run());

    let report = handle.flush_now().await.unwrap();
    assert_eq!(report.trigger, FlushTrigger::Manual);
    assert_eq!(report.drained, 1);
    assert!(report.delivered);

    shutdown_tx.send(()).unwrap();
    task.await.unwrap();
    assert!(handle.flush_now().await.is_err());
}

#[tokio::test]
async fn test_sharer_rate_limits_positions() {
    let sender = ToggleSender::online();
    let queue = memory_queue(sender.clone());
    let mut sharer = LocationSharer::new(queue, "drv_1", DEFAULT_SHARE_INTERVAL);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let point = GeoPoint::new(10.0, 20.0);

    assert_eq!(sharer.offer("r1", point, t0).await.unwrap(), None);

    sharer.set_enabled(true);
    assert_eq!(sharer.offer("", point, t0).await.unwrap(), None);
    assert_eq!(
        sharer.offer("r1", point, t0).await.unwrap(),
        Some(Delivery::Sent)
    );
    assert_eq!(
        sharer
            .offer("r1", point, t0 + ChronoDuration::seconds(5))
            .await
            .unwrap(),
        None
    );
    assert_eq!(
        sharer
            .offer("r1", point, t0 + ChronoDuration::seconds(10))
            .await
            .unwrap(),
        Some(Delivery::Sent)
    );

    let delivered = sender.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].events[0].agent_id, "drv_1");
    assert_eq!(delivered[0].events[0].route_id, "r1");
}

#[tokio::test]
async fn test_enqueue_then_drain_returns_exactly_that_event() {
    let queue = memory_queue(ToggleSender::offline());
    let e = event("a");

    queue.enqueue(e.clone()).await.unwrap();
    let drained = queue.drain().await.unwrap();

    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].event, e);
    assert_eq!(queue.pending(), 0);
    assert!(queue.drain().await.unwrap().is_empty());
}
