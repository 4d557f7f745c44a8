//! Timer-driven simulation runner

use super::engine::Simulation;
use crate::observability::{StructuredLogger, TrackerMetrics};
use crate::outbox::{Delivery, OutboxQueue};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Progress of a running simulation
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationStats {
    pub ticks: u64,
    pub events_sent: u64,
    pub events_queued: u64,
    pub send_errors: u64,
}

/// Ticks a `Simulation` and hands each batch to the outbox
pub struct SimulationWorker {
    simulation: Simulation,
    queue: OutboxQueue,
    rng: StdRng,
    max_ticks: Option<u64>,
    stats: Arc<RwLock<SimulationStats>>,
    metrics: TrackerMetrics,
    logger: StructuredLogger,
}

impl SimulationWorker {
    pub fn new(simulation: Simulation, queue: OutboxQueue, logger: StructuredLogger) -> Self {
        Self {
            simulation,
            queue,
            rng: StdRng::from_entropy(),
            max_ticks: None,
            stats: Arc::new(RwLock::new(SimulationStats::default())),
            metrics: TrackerMetrics::new(),
            logger,
        }
    }

    /// Use a fixed jitter source
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Stop on its own after `ticks` ticks
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn stats_handle(&self) -> Arc<RwLock<SimulationStats>> {
        Arc::clone(&self.stats)
    }

    /// Tick until shutdown (or the tick limit); returns the ticks executed
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        let interval = self.simulation.config().interval;
        let route_id = self.simulation.route_id().to_string();
        self.logger.log_simulation_started(
            &route_id,
            self.simulation.agents().len(),
            self.simulation.config().mode.as_str(),
            self.simulation.config().step_meters(),
        );
        self.metrics
            .set_simulated_agents(self.simulation.agents().len() as i64);

        // First tick lands one interval after start
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self
                .max_ticks
                .is_some_and(|max| self.simulation.ticks() >= max)
            {
                break;
            }
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        let ticks = self.simulation.ticks();
        self.metrics.set_simulated_agents(0);
        self.logger.log_simulation_stopped(&route_id, ticks);
        ticks
    }

    async fn tick(&mut self) {
        let events = self.simulation.tick(Utc::now(), &mut self.rng);
        self.metrics.inc_simulation_ticks();
        let count = events.len() as u64;

        let result = self.queue.enqueue_batch(events).await;
        let mut stats = self.stats.write().await;
        stats.ticks = self.simulation.ticks();
        match result {
            Ok(Delivery::Sent) => stats.events_sent += count,
            Ok(Delivery::Queued) => {
                debug!(events = count, "Simulation batch queued in outbox");
                stats.events_queued += count;
            }
            Err(e) => {
                warn!(error = %e, events = count, "Simulation batch could not be stored");
                stats.send_errors += 1;
            }
        }
    }
}
