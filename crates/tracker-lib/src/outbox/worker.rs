//! Background flushing for the outbox
//!
//! Flushes are triggered by:
//! - a periodic timer (30 s by default)
//! - connectivity coming back (offline → online edge)
//! - manual requests through `OutboxHandle::flush_now`

use super::queue::{FlushReport, FlushTrigger, OutboxQueue};
use crate::error::{TrackerError, TrackerResult};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Default periodic flush interval
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

type FlushReply = oneshot::Sender<TrackerResult<FlushReport>>;

/// Control handle for a running `OutboxWorker`
#[derive(Clone)]
pub struct OutboxHandle {
    requests: mpsc::Sender<FlushReply>,
    connectivity: watch::Sender<bool>,
}

impl OutboxHandle {
    /// Flush immediately and wait for the result
    pub async fn flush_now(&self) -> TrackerResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(tx)
            .await
            .map_err(|_| TrackerError::Input("outbox worker stopped".to_string()))?;
        rx.await
            .map_err(|_| TrackerError::Input("outbox worker stopped".to_string()))?
    }

    /// Report connectivity; a transition to online triggers a flush
    pub fn set_online(&self, online: bool) {
        self.connectivity.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

/// Drains the outbox on timer, reconnect and request
pub struct OutboxWorker {
    queue: OutboxQueue,
    flush_interval: Duration,
    requests: mpsc::Receiver<FlushReply>,
    connectivity: watch::Receiver<bool>,
    shutdown: broadcast::Receiver<()>,
}

impl OutboxWorker {
    pub fn new(
        queue: OutboxQueue,
        flush_interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, OutboxHandle) {
        let (req_tx, req_rx) = mpsc::channel(8);
        let (conn_tx, conn_rx) = watch::channel(true);
        let worker = Self {
            queue,
            flush_interval,
            requests: req_rx,
            connectivity: conn_rx,
            shutdown,
        };
        let handle = OutboxHandle {
            requests: req_tx,
            connectivity: conn_tx,
        };
        (worker, handle)
    }

    pub async fn run(mut self) {
        info!(
            interval_secs = self.flush_interval.as_secs(),
            tier = self.queue.tier().as_str(),
            "Starting outbox worker"
        );

        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!("Outbox worker shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Timer).await;
                }

                changed = self.connectivity.changed(), if connectivity_open => {
                    if changed.is_err() {
                        connectivity_open = false;
                        continue;
                    }
                    let online = *self.connectivity.borrow_and_update();
                    if online {
                        self.flush(FlushTrigger::Online).await;
                    }
                }

                Some(reply) = self.requests.recv() => {
                    let result = self.queue.flush(FlushTrigger::Manual).await;
                    let _ = reply.send(result);
                }
            }
        }
    }

    async fn flush(&self, trigger: FlushTrigger) {
        if let Err(e) = self.queue.flush(trigger).await {
            warn!(error = %e, trigger = trigger.as_str(), "Outbox flush failed");
        }
    }
}
