//! Follow a route's live event stream

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracker_lib::client::FleetApiClient;
use tracker_lib::observability::StructuredLogger;
use tracker_lib::stream::{StreamConfig, StreamConsumer, StreamEvent, StreamFrame, StreamState};

use crate::output::{color_state, format_millis, print_info, print_success, OutputFormat};

/// Options for `fleetctl tail`
#[derive(Debug, Clone)]
pub struct TailOptions {
    pub auto_reconnect: bool,
    /// Stop after this many non-heartbeat frames
    pub limit: Option<u64>,
    pub show_heartbeats: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameLine<'a> {
    received_at: i64,
    event: &'a str,
    data: &'a serde_json::Value,
}

/// One human-readable line for a frame
pub fn describe(frame: &StreamFrame) -> String {
    match frame.decode() {
        Ok(StreamEvent::DriverLocation(loc)) => {
            format!("{} at {:.5}, {:.5}", loc.driver_id, loc.lat, loc.lng)
        }
        Ok(StreamEvent::StopAdvanced(adv)) => format!(
            "{} → {}",
            adv.from_stop_id.as_deref().unwrap_or("?"),
            adv.to_stop_id.as_deref().unwrap_or("?")
        ),
        Ok(StreamEvent::Heartbeat) => "♥".to_string(),
        Ok(StreamEvent::Other { data, .. }) => data.to_string(),
        Err(e) => format!("undecodable: {e}"),
    }
}

/// Print frames until interrupted, the limit is reached, or the stream closes
pub async fn tail(
    client: Arc<FleetApiClient>,
    route_id: &str,
    options: TailOptions,
    format: OutputFormat,
) -> Result<()> {
    let (frames_tx, mut frames_rx) = mpsc::channel::<StreamFrame>(256);
    let config = StreamConfig {
        auto_reconnect: options.auto_reconnect,
        ..Default::default()
    };
    let consumer = StreamConsumer::spawn(
        client,
        config,
        vec![frames_tx],
        StructuredLogger::new("fleetctl"),
    );
    consumer.start(route_id)?;

    if matches!(format, OutputFormat::Table) {
        print_info(&format!("Tailing route {} (Ctrl-C to stop)", route_id.cyan()));
    }

    let mut status_poll = tokio::time::interval(Duration::from_millis(250));
    let mut last_state = StreamState::Idle;
    let mut printer = FramePrinter {
        options: &options,
        format,
        shown: 0,
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            frame = frames_rx.recv() => {
                let Some(frame) = frame else { break };
                if printer.emit(&frame)? {
                    break;
                }
            }
            _ = status_poll.tick() => {
                let status = consumer.status().await;
                if status.state != last_state {
                    last_state = status.state;
                    if matches!(format, OutputFormat::Table) {
                        let mut line = format!("stream {}", color_state(status.state));
                        if let Some(delay) = status.reconnect_delay_ms {
                            line.push_str(&format!(
                                " (retry in {} ms, attempt {})",
                                delay, status.reconnect_attempts
                            ));
                        }
                        eprintln!("{} {}", "·".dimmed(), line);
                    }
                }
                if status.state == StreamState::Closed {
                    // Frames already delivered before the close still get printed
                    while let Ok(frame) = frames_rx.try_recv() {
                        if printer.emit(&frame)? {
                            break;
                        }
                    }
                    break;
                }
            }
        }
    }

    let status = consumer.status().await;
    drop(frames_rx);
    consumer.shutdown().await;

    if matches!(format, OutputFormat::Table) {
        print_success(&format!(
            "{} frames received, {} dropped, {} heartbeats",
            status.frames_received, status.frames_dropped, status.heartbeats
        ));
    }
    Ok(())
}

struct FramePrinter<'a> {
    options: &'a TailOptions,
    format: OutputFormat,
    shown: u64,
}

impl FramePrinter<'_> {
    /// Print one frame; returns true once the limit is reached
    fn emit(&mut self, frame: &StreamFrame) -> Result<bool> {
        if frame.is_heartbeat() && !self.options.show_heartbeats {
            return Ok(false);
        }
        print_frame(frame, self.format)?;
        if !frame.is_heartbeat() {
            self.shown += 1;
        }
        Ok(self.options.limit.is_some_and(|limit| self.shown >= limit))
    }
}

fn print_frame(frame: &StreamFrame, format: OutputFormat) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    match format {
        OutputFormat::Json => {
            let line = FrameLine {
                received_at: now,
                event: &frame.event_name,
                data: &frame.data,
            };
            println!("{}", serde_json::to_string(&line)?);
        }
        OutputFormat::Table => {
            let name = if frame.is_heartbeat() {
                frame.event_name.dimmed()
            } else {
                frame.event_name.cyan()
            };
            println!("{}  {:<16} {}", format_millis(now).dimmed(), name, describe(frame));
        }
    }
    Ok(())
}
