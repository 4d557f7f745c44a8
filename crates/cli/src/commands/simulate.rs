//! Drive simulated agents along a route and publish their positions

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracker_lib::client::FleetApiClient;
use tracker_lib::observability::StructuredLogger;
use tracker_lib::outbox::{open_store, OutboxQueue, StoreTier};
use tracker_lib::simulator::{PathTrack, Simulation, SimulationConfig, SimulationWorker};

use crate::output::{format_distance, print_info, print_json, print_warning, OutputFormat};

/// Run a simulation until interrupted or `ticks` ticks have run
///
/// Positions that cannot be sent are kept in the outbox at `outbox_path`
/// (or in memory when `None`).
pub async fn simulate(
    client: Arc<FleetApiClient>,
    route_id: &str,
    config: SimulationConfig,
    ticks: Option<u64>,
    outbox_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let path = client
        .route_path(route_id)
        .await
        .with_context(|| format!("Failed to load path for route {}", route_id))?;
    let track = PathTrack::new(path.points);
    let simulation = Simulation::new(route_id, track, config)?;

    let logger = StructuredLogger::new("fleetctl");
    let store = open_store(outbox_path, &logger);
    let queue = OutboxQueue::new(
        client.clone(),
        store,
        client.auth().tenant_id.clone(),
        logger.clone(),
    );

    if matches!(format, OutputFormat::Table) {
        let config = simulation.config();
        print_info(&format!(
            "Simulating {} agent(s) on {} ({}, {} km/h, every {} ms, {} per tick)",
            config.agents,
            route_id.cyan(),
            config.mode.as_str(),
            config.speed_kmh,
            config.interval.as_millis(),
            format_distance(config.step_meters()),
        ));
        if queue.tier() == StoreTier::Ephemeral && outbox_path.is_some() {
            print_warning("Durable outbox unavailable; unsent positions are kept in memory");
        }
    }

    let mut worker = SimulationWorker::new(simulation, queue.clone(), logger);
    if let Some(ticks) = ticks {
        worker = worker.with_max_ticks(ticks);
    }
    let stats = worker.stats_handle();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut handle = tokio::spawn(worker.run(shutdown_rx));
    let finished = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            let _ = shutdown_tx.send(());
            handle.await
        }
    };
    finished.context("Simulation task failed")?;

    let stats = stats.read().await.clone();
    let outbox = queue.stats().await;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "routeId": route_id,
            "simulation": stats,
            "outbox": outbox,
        }))?,
        OutputFormat::Table => {
            println!();
            println!("{}", "Simulation Summary".bold());
            println!("{}", "=".repeat(40));
            println!("Ticks:           {}", stats.ticks);
            println!("Events sent:     {}", stats.events_sent.to_string().green());
            println!("Events queued:   {}", stats.events_queued.to_string().yellow());
            println!("Send errors:     {}", stats.send_errors);
            println!("Outbox pending:  {} ({})", outbox.pending, queue.tier().as_str());
        }
    }

    Ok(())
}
