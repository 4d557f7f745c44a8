//! Route inspection commands

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use tracker_lib::client::FleetApiClient;
use tracker_lib::geo::GeoPoint;
use tracker_lib::simulator::PathTrack;

use crate::output::{format_distance, format_point, print_json, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct PathRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Point")]
    point: String,
    #[tabled(rename = "Along")]
    along: String,
}

#[derive(Tabled)]
struct PositionRow {
    #[tabled(rename = "Driver")]
    driver: String,
    #[tabled(rename = "Position")]
    position: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PathSummary<'a> {
    route_id: &'a str,
    total_length_m: f64,
    points: &'a [GeoPoint],
}

/// Show a route's polyline with cumulative distance
pub async fn show_path(client: &FleetApiClient, route_id: &str, format: OutputFormat) -> Result<()> {
    let path = client.route_path(route_id).await?;
    let track = PathTrack::new(path.points);

    match format {
        OutputFormat::Json => print_json(&PathSummary {
            route_id,
            total_length_m: track.total_length(),
            points: track.points(),
        })?,
        OutputFormat::Table => {
            println!("{} {}", "Route".bold(), route_id.cyan());
            if track.is_empty() {
                print_warning("Route has no path");
                return Ok(());
            }
            let rows = track
                .points()
                .iter()
                .zip(track.cumulative())
                .enumerate()
                .map(|(index, (point, along))| PathRow {
                    index,
                    point: format_point(point),
                    along: format_distance(*along),
                })
                .collect();
            print_rows::<PathRow, ()>(rows, &(), format)?;
            println!("\nTotal length: {}", format_distance(track.total_length()).bold());
        }
    }

    Ok(())
}

/// Show the latest known position of every driver on a route
pub async fn show_positions(
    client: &FleetApiClient,
    route_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let positions = client.latest_positions(route_id).await?;

    let rows = positions
        .items
        .iter()
        .map(|p| PositionRow {
            driver: p.driver_id.clone(),
            position: format_point(&GeoPoint::new(p.lat, p.lng)),
        })
        .collect();
    print_rows(rows, &positions, format)
}

/// Show the next stop on a route
pub async fn show_destination(
    client: &FleetApiClient,
    route_id: &str,
    format: OutputFormat,
) -> Result<()> {
    let destination = client.next_destination(route_id).await?;

    match format {
        OutputFormat::Json => print_json(&destination)?,
        OutputFormat::Table => match destination {
            Some(d) => {
                println!("{}", "Next Destination".bold());
                println!("{}", "=".repeat(40));
                println!("Stop:      {}", d.stop_id.as_deref().unwrap_or("-").cyan());
                println!("Position:  {}", format_point(&GeoPoint::new(d.lat, d.lng)));
            }
            None => print_warning(&format!("Route '{}' has no upcoming stop", route_id)),
        },
    }

    Ok(())
}
