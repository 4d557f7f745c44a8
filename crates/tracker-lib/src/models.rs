//! Core data models for the tracking pipeline

use crate::geo::GeoPoint;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Event type for position fixes
pub const LOCATION_EVENT: &str = "location";

/// A timestamped observation produced by a tracked agent
///
/// Immutable once created; the payload shape depends on `event_type`
/// (`location` carries `{lat, lng}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "driverId", default, skip_serializing_if = "String::is_empty")]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_id: String,
    pub ts: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TelemetryEvent {
    /// Build a `location` event stamped with the given capture time
    pub fn location(
        agent_id: impl Into<String>,
        route_id: impl Into<String>,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: LOCATION_EVENT.to_string(),
            agent_id: agent_id.into(),
            route_id: route_id.into(),
            ts: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload: serde_json::json!({ "lat": point.lat, "lng": point.lng }),
        }
    }

    /// Position carried by a `location` event
    pub fn position(&self) -> Option<GeoPoint> {
        if self.event_type != LOCATION_EVENT {
            return None;
        }
        let lat = self.payload.get("lat")?.as_f64()?;
        let lng = self.payload.get("lng")?.as_f64()?;
        Some(GeoPoint::new(lat, lng))
    }
}

/// Outbound telemetry request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    pub tenant_id: String,
    pub events: Vec<TelemetryEvent>,
}

/// Polyline for a route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePath {
    #[serde(default)]
    pub points: Vec<GeoPoint>,
}

/// Latest known position of one agent on a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPosition {
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestPositions {
    #[serde(default)]
    pub items: Vec<LatestPosition>,
}

/// Coordinates of the next stop on a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    #[serde(default)]
    pub stop_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// Last-loaded route kept for cold-start redisplay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSnapshot {
    pub route_id: String,
    #[serde(default)]
    pub points: Vec<GeoPoint>,
    #[serde(default)]
    pub positions: Vec<LatestPosition>,
    pub saved_at: i64,
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
