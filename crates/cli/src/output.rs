//! Output formatting utilities

use chrono::{DateTime, Local, TimeZone, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tracker_lib::geo::GeoPoint;
use tracker_lib::stream::StreamState;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows, or `value` as JSON
pub fn print_rows<T: Tabled, V: Serialize + ?Sized>(
    rows: Vec<T>,
    value: &V,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
            } else {
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }
        OutputFormat::Json => print_json(value)?,
    }
    Ok(())
}

pub fn print_json<V: Serialize + ?Sized>(value: &V) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_point(point: &GeoPoint) -> String {
    format!("{:.5}, {:.5}", point.lat, point.lng)
}

/// Format a distance in meters as m or km
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.2} km", meters / 1000.0)
    } else {
        format!("{:.0} m", meters)
    }
}

/// Local wall-clock time for a Unix millisecond timestamp
pub fn format_millis(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(at) => DateTime::<Local>::from(at).format("%H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

/// Color stream state based on value
pub fn color_state(state: StreamState) -> String {
    let label = format!("{:?}", state).to_lowercase();
    match state {
        StreamState::Streaming => label.green().to_string(),
        StreamState::Connecting | StreamState::Reconnecting => label.yellow().to_string(),
        StreamState::Closed => label.red().to_string(),
        StreamState::Idle => label.dimmed().to_string(),
    }
}
