//! Inspect and flush a durable outbox file

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tabled::Tabled;
use tracker_lib::client::FleetApiClient;
use tracker_lib::observability::StructuredLogger;
use tracker_lib::outbox::{FileStore, FlushTrigger, OutboxQueue, OutboxRecord};

use crate::output::{format_millis, print_json, print_rows, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Queued")]
    queued_at: String,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Route")]
    route: String,
    #[tabled(rename = "Captured")]
    ts: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboxSummary<'a> {
    path: &'a Path,
    pending: usize,
    records: &'a [OutboxRecord],
}

fn open(path: &Path) -> Result<FileStore> {
    FileStore::open(path).with_context(|| format!("Failed to open outbox at {}", path.display()))
}

/// List the records waiting in the outbox
pub fn show_status(path: &Path, format: OutputFormat) -> Result<()> {
    let store = open(path)?;
    let records = store.records()?;

    match format {
        OutputFormat::Json => print_json(&OutboxSummary {
            path,
            pending: records.len(),
            records: &records,
        })?,
        OutputFormat::Table => {
            println!("{} {}", "Outbox".bold(), path.display().to_string().cyan());
            let rows = records
                .iter()
                .map(|r| RecordRow {
                    queued_at: format_millis(r.queued_at),
                    event_type: r.event.event_type.clone(),
                    driver: r.event.agent_id.clone(),
                    route: r.event.route_id.clone(),
                    ts: r.event.ts.clone(),
                })
                .collect();
            print_rows(rows, &records, format)?;
            println!("\nPending: {}", records.len());
        }
    }

    Ok(())
}

/// Drain the outbox and send it as one batch
///
/// Drained events are not put back if the send fails.
pub async fn flush(client: Arc<FleetApiClient>, path: &Path, format: OutputFormat) -> Result<()> {
    let store = Arc::new(open(path)?);
    let queue = OutboxQueue::new(
        client.clone(),
        store,
        client.auth().tenant_id.clone(),
        StructuredLogger::new("fleetctl"),
    );
    let report = queue.flush(FlushTrigger::Manual).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.drained == 0 {
                print_success("Outbox is empty");
            } else if report.delivered {
                print_success(&format!("Delivered {} queued event(s)", report.drained));
            } else {
                print_warning(&format!(
                    "Send failed; {} drained event(s) were dropped",
                    report.drained
                ));
            }
        }
    }

    Ok(())
}
