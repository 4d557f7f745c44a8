//! Fleet Tracker - live tracking host for one route
//!
//! Subscribes to a route's live event stream, keeps the view state
//! current, drains the telemetry outbox and optionally simulates agents
//! along the route. Health, metrics and the current view are served over
//! HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tracker_lib::{
    aggregate::SpatialAggregator,
    client::FleetApiClient,
    health::{components, ComponentHealth, HealthRegistry},
    models::{now_millis, RouteSnapshot},
    observability::{StructuredLogger, TrackerMetrics},
    outbox::{open_store, LocationSharer, OutboxHandle, OutboxQueue, OutboxWorker, StoreTier, DEFAULT_SHARE_INTERVAL},
    prefs::LocalStateStore,
    session::{spawn_session, FollowTarget, SessionHandle, TrackingSession, ViewEvent},
    simulator::{PathTrack, Simulation, SimulationWorker},
    stream::{StreamConsumer, StreamState, StreamStatus},
};

mod api;
mod config;

const TRACKER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often stream state is mirrored into health and outbox connectivity
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleet-tracker");

    let config = config::TrackerConfig::load()?;
    info!(
        view = %config.view_name,
        api = %config.api_base_url,
        tenant = %config.tenant_id,
        "Tracker configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::STREAM).await;
    health_registry.register(components::OUTBOX).await;
    health_registry.register(components::AGGREGATOR).await;

    let _metrics = TrackerMetrics::new();
    let logger = StructuredLogger::new(&config.view_name);
    logger.log_startup(TRACKER_VERSION);

    let local_state = LocalStateStore::open(config.state_path());
    let prefs = local_state.preferences();

    let client = Arc::new(
        FleetApiClient::new(&config.client(), config.auth())
            .context("Failed to create API client")?,
    );
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    // Outbox
    let outbox_path = config.outbox_path();
    let store = open_store(outbox_path.as_deref(), &logger);
    if outbox_path.is_some() && store.tier() == StoreTier::Ephemeral {
        health_registry
            .set_degraded(components::OUTBOX, "durable store unavailable, using memory")
            .await;
    }
    let outbox = OutboxQueue::new(client.clone(), store, &config.tenant_id, logger.clone());
    let (outbox_worker, outbox_control) =
        OutboxWorker::new(outbox.clone(), config.flush_interval(), shutdown_tx.subscribe());
    tokio::spawn(outbox_worker.run());

    let agent_id = config
        .driver_id
        .clone()
        .unwrap_or_else(|| config.view_name.clone());
    let mut sharer = LocationSharer::new(outbox.clone(), agent_id, DEFAULT_SHARE_INTERVAL);
    sharer.set_enabled(prefs.share_location);

    // View session fed by the stream consumer
    let (frames_tx, frames_rx) = mpsc::channel(1024);
    let filters = config.filters(prefs.recency_window_secs);
    let session = TrackingSession::new(
        filters.clone(),
        SpatialAggregator::new(config.heat_radius_m),
    );
    let (session_handle, session_task) =
        spawn_session(session, frames_rx, shutdown_tx.subscribe(), logger.clone());
    if prefs.follow {
        session_handle.send(ViewEvent::FollowChanged(Some(FollowTarget::Any)));
    }

    let consumer = Arc::new(StreamConsumer::spawn(
        client.clone(),
        config.stream(),
        vec![frames_tx],
        logger.clone(),
    ));

    let route_id = config.route_id.clone().or_else(|| local_state.last_route_id());
    match &route_id {
        Some(route_id) => {
            session_handle.send(ViewEvent::RouteChanged(route_id.clone()));
            if let Some(snapshot) = local_state.snapshot(route_id) {
                info!(
                    route_id = %route_id,
                    positions = snapshot.positions.len(),
                    "Redisplaying remembered route"
                );
                session_handle.send(ViewEvent::Seed {
                    route_id: route_id.clone(),
                    positions: snapshot.positions,
                    observed_at: snapshot.saved_at,
                });
            }
            consumer.start(route_id)?;
        }
        None => warn!("No route configured or remembered, stream stays idle"),
    }
    let local_state = Arc::new(Mutex::new(local_state));

    tokio::spawn(mirror_stream_status(
        consumer.status_handle(),
        health_registry.clone(),
        outbox_control.clone(),
        shutdown_tx.subscribe(),
    ));

    if let Some(route_id) = route_id.clone() {
        let loader = RouteLoader {
            client: client.clone(),
            session: session_handle.clone(),
            health_registry: health_registry.clone(),
            outbox: outbox.clone(),
            logger: logger.clone(),
            shutdown: shutdown_tx.clone(),
        };
        let simulation = if config.simulate {
            Some(config.simulation()?)
        } else {
            None
        };
        tokio::spawn(loader.load(route_id, local_state.clone(), simulation));
    }

    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        session: session_handle,
        stream_status: consumer.status_handle(),
        stream: consumer.clone(),
        outbox,
        outbox_control,
        sharer: Arc::new(Mutex::new(sharer)),
        route_id,
        filters: Arc::new(Mutex::new(filters)),
        local_state,
    });

    health_registry.set_ready(true).await;

    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            warn!(error = %e, "API server exited");
        }
    });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    consumer.stop();
    let _ = shutdown_tx.send(());
    if let Err(e) = session_task.await {
        warn!(error = %e, "Session task exited abnormally");
    }

    Ok(())
}

/// Keep health and outbox connectivity in step with the stream
async fn mirror_stream_status(
    status: Arc<tokio::sync::RwLock<StreamStatus>>,
    health_registry: HealthRegistry,
    outbox_control: OutboxHandle,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(STATUS_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {
                let (state, route_id) = {
                    let status = status.read().await;
                    (status.state, status.route_id.clone())
                };
                health_registry
                    .update(
                        components::STREAM,
                        ComponentHealth::for_stream(state, route_id.as_deref()),
                    )
                    .await;
                match state {
                    StreamState::Streaming => outbox_control.set_online(true),
                    StreamState::Reconnecting => outbox_control.set_online(false),
                    _ => {}
                }
            }
        }
    }
}

/// Loads a route's path and latest positions, then optionally simulates it
struct RouteLoader {
    client: Arc<FleetApiClient>,
    session: SessionHandle,
    health_registry: HealthRegistry,
    outbox: OutboxQueue,
    logger: StructuredLogger,
    shutdown: broadcast::Sender<()>,
}

impl RouteLoader {
    async fn load(
        self,
        route_id: String,
        local_state: Arc<Mutex<LocalStateStore>>,
        simulation: Option<tracker_lib::simulator::SimulationConfig>,
    ) {
        let path = match self.client.route_path(&route_id).await {
            Ok(path) => path,
            Err(e) => {
                warn!(route_id = %route_id, error = %e, "Failed to load route path");
                Default::default()
            }
        };
        let positions = match self.client.latest_positions(&route_id).await {
            Ok(latest) => latest.items,
            Err(e) => {
                warn!(route_id = %route_id, error = %e, "Failed to load latest positions");
                Vec::new()
            }
        };

        self.session.send(ViewEvent::Seed {
            route_id: route_id.clone(),
            positions: positions.clone(),
            observed_at: now_millis(),
        });

        if !path.points.is_empty() {
            let snapshot = RouteSnapshot {
                route_id: route_id.clone(),
                points: path.points.clone(),
                positions,
                saved_at: now_millis(),
            };
            if let Err(e) = local_state.lock().await.remember_route(&snapshot) {
                warn!(error = %e, "Failed to remember route");
            }
        }

        let Some(sim_config) = simulation else {
            return;
        };
        // Fall back to the remembered polyline when the API was unreachable
        let points = if path.points.is_empty() {
            local_state
                .lock()
                .await
                .snapshot(&route_id)
                .map(|s| s.points)
                .unwrap_or_default()
        } else {
            path.points
        };

        self.health_registry.register(components::SIMULATOR).await;
        match Simulation::new(&route_id, PathTrack::new(points), sim_config) {
            Ok(sim) => {
                let worker = SimulationWorker::new(sim, self.outbox, self.logger);
                worker.run(self.shutdown.subscribe()).await;
                self.health_registry.unregister(components::SIMULATOR).await;
            }
            Err(e) => {
                warn!(route_id = %route_id, error = %e, "Simulation not started");
                self.health_registry
                    .set_unhealthy(components::SIMULATOR, e.to_string())
                    .await;
            }
        }
    }
}
