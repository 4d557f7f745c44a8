//! Tracker configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracker_lib::aggregate::{ViewFilters, DEFAULT_HEAT_RADIUS_M};
use tracker_lib::client::{AuthContext, ClientConfig};
use tracker_lib::simulator::{MotionMode, SimulationConfig};
use tracker_lib::stream::StreamConfig;

/// Tracker configuration
///
/// Read from an optional `tracker.toml` and `TRACKER_*` environment
/// variables (e.g. `TRACKER_ROUTE_ID`, `TRACKER_API_PORT`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Name attached to every structured log line
    pub view_name: String,

    /// Port for health, metrics and view endpoints
    pub api_port: u16,

    /// Tracking API base URL
    pub api_base_url: String,

    pub tenant_id: String,

    /// Request role; `driver` makes this a field device
    pub role: String,

    pub driver_id: Option<String>,

    /// Route to track; falls back to the last remembered route
    pub route_id: Option<String>,

    /// Directory for the outbox and local state files
    pub state_dir: PathBuf,

    /// Keep the outbox in memory only
    pub ephemeral_outbox: bool,

    pub flush_interval_secs: u64,

    pub auto_reconnect: bool,

    /// Overrides the persisted recency window when set
    pub recency_window_secs: Option<u64>,
    pub route_only: bool,
    pub clustering: bool,
    pub heat: bool,
    pub zoom: u8,
    pub heat_radius_m: f64,

    /// Run the path simulator for the tracked route
    pub simulate: bool,
    pub sim_agents: usize,
    pub sim_speed_kmh: f64,
    pub sim_interval_ms: u64,
    pub sim_mode: String,
    /// Jitter radius in meters; unset disables jitter
    pub sim_jitter_m: Option<f64>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            view_name: std::env::var("HOSTNAME").unwrap_or_else(|_| "fleet-tracker".to_string()),
            api_port: 9464,
            api_base_url: "http://localhost:8080".to_string(),
            tenant_id: "t_demo".to_string(),
            role: "admin".to_string(),
            driver_id: None,
            route_id: None,
            state_dir: PathBuf::from(".fleet-tracker"),
            ephemeral_outbox: false,
            flush_interval_secs: 30,
            auto_reconnect: true,
            recency_window_secs: None,
            route_only: false,
            clustering: false,
            heat: false,
            zoom: 12,
            heat_radius_m: DEFAULT_HEAT_RADIUS_M,
            simulate: false,
            sim_agents: 1,
            sim_speed_kmh: 30.0,
            sim_interval_ms: 1500,
            sim_mode: "bounce".to_string(),
            sim_jitter_m: None,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("tracker").required(false))
            .add_source(config::Environment::with_prefix("TRACKER"))
            .build()
            .context("Failed to read tracker configuration")?;

        config
            .try_deserialize()
            .context("Invalid tracker configuration")
    }

    pub fn outbox_path(&self) -> Option<PathBuf> {
        (!self.ephemeral_outbox).then(|| self.state_dir.join("outbox.json"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn auth(&self) -> AuthContext {
        match (&self.driver_id, self.role.as_str()) {
            (Some(driver_id), "driver") => AuthContext::driver(&self.tenant_id, driver_id),
            (driver_id, role) => AuthContext {
                tenant_id: self.tenant_id.clone(),
                role: role.to_string(),
                driver_id: driver_id.clone(),
                bearer_token: None,
            },
        }
    }

    pub fn client(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api_base_url.clone(),
            ..Default::default()
        }
    }

    pub fn stream(&self) -> StreamConfig {
        StreamConfig {
            auto_reconnect: self.auto_reconnect,
            ..Default::default()
        }
    }

    /// Initial view filters; `persisted_window` comes from local state
    pub fn filters(&self, persisted_window: u64) -> ViewFilters {
        ViewFilters {
            route_only: self.route_only,
            clustering: self.clustering,
            heat: self.heat,
            recency_window_secs: self.recency_window_secs.unwrap_or(persisted_window),
            zoom: self.zoom,
        }
    }

    pub fn simulation(&self) -> Result<SimulationConfig> {
        let mode: MotionMode = self.sim_mode.parse()?;
        Ok(SimulationConfig {
            agents: self.sim_agents,
            speed_kmh: self.sim_speed_kmh,
            interval: Duration::from_millis(self.sim_interval_ms),
            mode,
            jitter: self.sim_jitter_m.is_some(),
            jitter_radius_m: self.sim_jitter_m.unwrap_or(5.0),
        })
    }
}
