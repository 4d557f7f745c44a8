//! Live tracking resilience layer for fleet telemetry
//!
//! This crate provides the client-side pipeline shared by the field
//! handheld and the dispatch console:
//! - Live event stream consumption with reconnect and backoff
//! - Durable offline outbox for telemetry that could not be sent
//! - Path interpolation and multi-agent movement simulation
//! - Spatial aggregation (recency filtering, grid clustering, heat decay)
//! - Health checks and observability

pub mod aggregate;
pub mod client;
pub mod error;
pub mod geo;
pub mod health;
pub mod models;
pub mod observability;
pub mod outbox;
pub mod prefs;
pub mod session;
pub mod simulator;
pub mod stream;

pub use error::{TrackerError, TrackerResult};
pub use geo::GeoPoint;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, TrackerMetrics};
