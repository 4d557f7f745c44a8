//! Observability infrastructure for the tracker
//!
//! Provides:
//! - Prometheus metrics (stream health, outbox depth, recompute latency, simulation)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<TrackerMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct TrackerMetricsInner {
    frames_received: IntCounter,
    frames_dropped: IntCounter,
    stream_reconnects: IntCounter,
    stream_failures: IntCounter,
    outbox_pending: IntGauge,
    outbox_sent_direct: IntCounter,
    outbox_queued: IntCounter,
    outbox_drained: IntCounter,
    outbox_lost_after_drain: IntCounter,
    outbox_store_tier: GaugeVec,
    recompute_latency_seconds: Histogram,
    visible_markers: IntGauge,
    cluster_cells: IntGauge,
    simulation_ticks: IntCounter,
    simulated_agents: IntGauge,
}

impl TrackerMetricsInner {
    fn new() -> Self {
        Self {
            frames_received: register_int_counter!(
                "fleet_tracker_stream_frames_received_total",
                "Frames parsed from the live event stream"
            )
            .expect("Failed to register frames_received"),

            frames_dropped: register_int_counter!(
                "fleet_tracker_stream_frames_dropped_total",
                "Malformed frames dropped by the stream parser"
            )
            .expect("Failed to register frames_dropped"),

            stream_reconnects: register_int_counter!(
                "fleet_tracker_stream_reconnects_total",
                "Reconnect attempts scheduled for the live event stream"
            )
            .expect("Failed to register stream_reconnects"),

            stream_failures: register_int_counter!(
                "fleet_tracker_stream_failures_total",
                "Connect or read failures on the live event stream"
            )
            .expect("Failed to register stream_failures"),

            outbox_pending: register_int_gauge!(
                "fleet_tracker_outbox_pending",
                "Telemetry events waiting in the outbox"
            )
            .expect("Failed to register outbox_pending"),

            outbox_sent_direct: register_int_counter!(
                "fleet_tracker_outbox_sent_direct_total",
                "Telemetry events delivered without touching the outbox"
            )
            .expect("Failed to register outbox_sent_direct"),

            outbox_queued: register_int_counter!(
                "fleet_tracker_outbox_queued_total",
                "Telemetry events persisted after a failed send"
            )
            .expect("Failed to register outbox_queued"),

            outbox_drained: register_int_counter!(
                "fleet_tracker_outbox_drained_total",
                "Telemetry events delivered from a drained batch"
            )
            .expect("Failed to register outbox_drained"),

            outbox_lost_after_drain: register_int_counter!(
                "fleet_tracker_outbox_lost_after_drain_total",
                "Drained telemetry events whose batch send failed"
            )
            .expect("Failed to register outbox_lost_after_drain"),

            outbox_store_tier: register_gauge_vec!(
                "fleet_tracker_outbox_store_tier_info",
                "Storage tier selected for the outbox",
                &["tier"]
            )
            .expect("Failed to register outbox_store_tier"),

            recompute_latency_seconds: register_histogram!(
                "fleet_tracker_recompute_latency_seconds",
                "Time spent recomputing visibility, clusters and heat",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register recompute_latency_seconds"),

            visible_markers: register_int_gauge!(
                "fleet_tracker_visible_markers",
                "Markers visible after the last recompute"
            )
            .expect("Failed to register visible_markers"),

            cluster_cells: register_int_gauge!(
                "fleet_tracker_cluster_cells",
                "Grid clusters produced by the last recompute"
            )
            .expect("Failed to register cluster_cells"),

            simulation_ticks: register_int_counter!(
                "fleet_tracker_simulation_ticks_total",
                "Simulation ticks executed"
            )
            .expect("Failed to register simulation_ticks"),

            simulated_agents: register_int_gauge!(
                "fleet_tracker_simulated_agents",
                "Agents in the running simulation"
            )
            .expect("Failed to register simulated_agents"),
        }
    }
}

/// Tracker metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct TrackerMetrics {
    _private: (),
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TrackerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TrackerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_frames_received(&self) {
        self.inner().frames_received.inc();
    }

    pub fn inc_frames_dropped(&self) {
        self.inner().frames_dropped.inc();
    }

    pub fn inc_reconnects(&self) {
        self.inner().stream_reconnects.inc();
    }

    pub fn inc_stream_failures(&self) {
        self.inner().stream_failures.inc();
    }

    pub fn set_outbox_pending(&self, pending: i64) {
        self.inner().outbox_pending.set(pending);
    }

    pub fn inc_sent_direct(&self, count: u64) {
        self.inner().outbox_sent_direct.inc_by(count);
    }

    pub fn inc_queued(&self, count: u64) {
        self.inner().outbox_queued.inc_by(count);
    }

    pub fn inc_drained(&self, count: u64) {
        self.inner().outbox_drained.inc_by(count);
    }

    pub fn inc_lost_after_drain(&self, count: u64) {
        self.inner().outbox_lost_after_drain.inc_by(count);
    }

    /// Record which storage tier the outbox ended up on
    pub fn set_store_tier(&self, tier: &str) {
        self.inner().outbox_store_tier.reset();
        self.inner()
            .outbox_store_tier
            .with_label_values(&[tier])
            .set(1.0);
    }

    pub fn observe_recompute_latency(&self, duration_secs: f64) {
        self.inner().recompute_latency_seconds.observe(duration_secs);
    }

    pub fn set_render_counts(&self, visible: i64, clusters: i64) {
        self.inner().visible_markers.set(visible);
        self.inner().cluster_cells.set(clusters);
    }

    pub fn inc_simulation_ticks(&self) {
        self.inner().simulation_ticks.inc();
    }

    pub fn set_simulated_agents(&self, count: i64) {
        self.inner().simulated_agents.set(count);
    }
}

/// Structured logger for tracker events
///
/// Provides consistent JSON-formatted logging for subscriptions,
/// reconnects, outbox activity and simulation runs.
#[derive(Clone)]
pub struct StructuredLogger {
    view: String,
}

impl StructuredLogger {
    pub fn new(view: impl Into<String>) -> Self {
        Self { view: view.into() }
    }

    pub fn view(&self) -> &str {
        &self.view
    }

    /// Log tracker startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "tracker_started",
            view = %self.view,
            version = %version,
            "Fleet tracker started"
        );
    }

    /// Log tracker shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "tracker_shutdown",
            view = %self.view,
            reason = %reason,
            "Fleet tracker shutting down"
        );
    }

    pub fn log_subscription(&self, route_id: &str) {
        info!(
            event = "stream_subscribe",
            view = %self.view,
            route_id = %route_id,
            "Subscribing to route events"
        );
    }

    pub fn log_stream_connected(&self, route_id: &str) {
        info!(
            event = "stream_connected",
            view = %self.view,
            route_id = %route_id,
            "Event stream connected"
        );
    }

    pub fn log_reconnect_scheduled(
        &self,
        route_id: &str,
        delay: Duration,
        attempts: u32,
        reason: &str,
    ) {
        warn!(
            event = "stream_reconnect",
            view = %self.view,
            route_id = %route_id,
            delay_ms = delay.as_millis() as u64,
            attempts = attempts,
            reason = %reason,
            "Event stream lost, reconnect scheduled"
        );
    }

    pub fn log_frame_dropped(&self, reason: &str) {
        warn!(
            event = "frame_dropped",
            view = %self.view,
            reason = %reason,
            "Dropped malformed stream frame"
        );
    }

    /// Log the outbox falling back to its ephemeral tier
    pub fn log_outbox_fallback(&self, reason: &str) {
        warn!(
            event = "outbox_fallback",
            view = %self.view,
            reason = %reason,
            "Durable outbox store unavailable, using in-memory fallback"
        );
    }

    pub fn log_outbox_flush(&self, trigger: &str, events: usize, delivered: bool) {
        if delivered {
            info!(
                event = "outbox_flush",
                view = %self.view,
                trigger = %trigger,
                events = events,
                "Outbox batch delivered"
            );
        } else {
            warn!(
                event = "outbox_flush_failed",
                view = %self.view,
                trigger = %trigger,
                events = events,
                "Outbox batch send failed, drained events are not re-queued"
            );
        }
    }

    pub fn log_simulation_started(
        &self,
        route_id: &str,
        agents: usize,
        mode: &str,
        step_meters: f64,
    ) {
        info!(
            event = "simulation_started",
            view = %self.view,
            route_id = %route_id,
            agents = agents,
            mode = %mode,
            step_meters = step_meters,
            "Path simulation started"
        );
    }

    pub fn log_simulation_stopped(&self, route_id: &str, ticks: u64) {
        info!(
            event = "simulation_stopped",
            view = %self.view,
            route_id = %route_id,
            ticks = ticks,
            "Path simulation stopped"
        );
    }

    pub fn log_recompute(&self, visible: usize, clusters: usize, heat: usize, elapsed: Duration) {
        tracing::debug!(
            event = "view_recompute",
            view = %self.view,
            visible = visible,
            clusters = clusters,
            heat = heat,
            elapsed_us = elapsed.as_micros() as u64,
            "View recomputed"
        );
    }
}
