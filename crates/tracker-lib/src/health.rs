//! Component health for the tracker
//!
//! Each long-running worker (stream consumer, outbox, simulator, view
//! aggregator) reports into a shared registry that backs the liveness
//! and readiness endpoints.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::stream::StreamState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still working, but on a fallback path (reconnecting, ephemeral store)
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Map a stream connection state onto a health report.
    ///
    /// `Idle` and `Closed` are deliberate states, so they count as healthy.
    pub fn for_stream(state: StreamState, route_id: Option<&str>) -> Self {
        let route = route_id.unwrap_or("-");
        match state {
            StreamState::Streaming | StreamState::Idle | StreamState::Closed => Self::healthy(),
            StreamState::Connecting => Self::degraded(format!("connecting to route {route}")),
            StreamState::Reconnecting => {
                Self::degraded(format!("stream for route {route} lost, reconnecting"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status wins
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |acc, s| match (acc, s) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const STREAM: &str = "stream";
    pub const OUTBOX: &str = "outbox";
    pub const SIMULATOR: &str = "simulator";
    pub const AGGREGATOR: &str = "aggregator";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Drop a component, e.g. when a simulation run ends
    pub async fn unregister(&self, name: &str) {
        self.components.write().await.remove(name);
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn get(&self, name: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(name).cloned()
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let (ready, reason) = if !ready {
            (false, Some("Tracker not yet initialized".to_string()))
        } else if !health.status.is_operational() {
            (false, Some("Critical component unhealthy".to_string()))
        } else {
            (true, None)
        };
        ReadinessResponse { ready, reason }
    }
}
