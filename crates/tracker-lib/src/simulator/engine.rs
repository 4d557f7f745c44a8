//! Multi-agent motion along a path

use super::path::PathTrack;
use crate::error::{TrackerError, TrackerResult};
use crate::geo::jitter_point;
use crate::models::TelemetryEvent;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const MIN_AGENTS: usize = 1;
pub const MAX_AGENTS: usize = 20;
pub const MIN_INTERVAL: Duration = Duration::from_millis(200);
pub const MIN_SPEED_KMH: f64 = 1.0;

/// How an agent behaves at the ends of the path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionMode {
    /// Reverse direction at either endpoint
    #[default]
    Bounce,
    /// Wrap back to the start
    Loop,
}

impl MotionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionMode::Bounce => "bounce",
            MotionMode::Loop => "loop",
        }
    }
}

impl FromStr for MotionMode {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bounce" => Ok(MotionMode::Bounce),
            "loop" => Ok(MotionMode::Loop),
            other => Err(TrackerError::Input(format!("unknown motion mode '{other}'"))),
        }
    }
}

/// One simulated agent's progress along the path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedAgent {
    pub id: String,
    /// Always within `[0, total_length]`
    pub distance: f64,
    pub forward: bool,
}

impl SimulatedAgent {
    pub fn new(id: impl Into<String>, distance: f64) -> Self {
        Self {
            id: id.into(),
            distance,
            forward: true,
        }
    }

    /// Move `step` meters under `mode` on a path of length `total`
    pub fn advance(&mut self, step: f64, total: f64, mode: MotionMode) {
        if total <= 0.0 {
            self.distance = 0.0;
            return;
        }
        match mode {
            MotionMode::Loop => {
                self.distance = (self.distance + step) % total;
            }
            MotionMode::Bounce if self.forward => {
                self.distance += step;
                if self.distance >= total {
                    self.distance = total;
                    self.forward = false;
                }
            }
            MotionMode::Bounce => {
                self.distance -= step;
                if self.distance <= 0.0 {
                    self.distance = 0.0;
                    self.forward = true;
                }
            }
        }
    }
}

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    /// Number of agents, clamped to 1..=20
    pub agents: usize,
    /// Speed in km/h, at least 1
    pub speed_kmh: f64,
    /// Tick interval, at least 200 ms
    #[serde(with = "millis")]
    pub interval: Duration,
    pub mode: MotionMode,
    pub jitter: bool,
    /// Jitter radius in meters, at least 0
    pub jitter_radius_m: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            agents: 1,
            speed_kmh: 30.0,
            interval: Duration::from_millis(1500),
            mode: MotionMode::Bounce,
            jitter: false,
            jitter_radius_m: 5.0,
        }
    }
}

impl SimulationConfig {
    /// Copy of this config with every field clamped into range
    pub fn normalized(&self) -> Self {
        let speed_kmh = if self.speed_kmh.is_finite() {
            self.speed_kmh.max(MIN_SPEED_KMH)
        } else {
            MIN_SPEED_KMH
        };
        let jitter_radius_m = if self.jitter_radius_m.is_finite() {
            self.jitter_radius_m.max(0.0)
        } else {
            0.0
        };
        Self {
            agents: self.agents.clamp(MIN_AGENTS, MAX_AGENTS),
            speed_kmh,
            interval: self.interval.max(MIN_INTERVAL),
            mode: self.mode,
            jitter: self.jitter,
            jitter_radius_m,
        }
    }

    /// Distance covered per tick
    pub fn step_meters(&self) -> f64 {
        self.speed_kmh * 1000.0 / 3600.0 * self.interval.as_secs_f64()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// N agents moving along one route
#[derive(Debug, Clone)]
pub struct Simulation {
    route_id: String,
    track: PathTrack,
    config: SimulationConfig,
    agents: Vec<SimulatedAgent>,
    ticks: u64,
}

impl Simulation {
    /// Place agents evenly along the path (`i / n * total`).
    ///
    /// Fails with an input error when no route is selected or the path
    /// has no length to move along.
    pub fn new(
        route_id: impl Into<String>,
        track: PathTrack,
        config: SimulationConfig,
    ) -> TrackerResult<Self> {
        let route_id = route_id.into();
        if route_id.is_empty() {
            return Err(TrackerError::Input("no route selected".to_string()));
        }
        let total = track.total_length();
        if track.is_empty() || total <= 0.0 {
            return Err(TrackerError::Input(format!(
                "no path available to simulate on route {route_id}"
            )));
        }

        let config = config.normalized();
        let n = config.agents;
        let agents = (0..n)
            .map(|i| SimulatedAgent::new(format!("drv_sim_{}", i + 1), i as f64 / n as f64 * total))
            .collect();

        Ok(Self {
            route_id,
            track,
            config,
            agents,
            ticks: 0,
        })
    }

    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn agents(&self) -> &[SimulatedAgent] {
        &self.agents
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn track(&self) -> &PathTrack {
        &self.track
    }

    /// Advance every agent one step and emit one `location` event each
    pub fn tick<R: Rng + ?Sized>(&mut self, at: DateTime<Utc>, rng: &mut R) -> Vec<TelemetryEvent> {
        let step = self.config.step_meters();
        self.step_with(step, at, rng)
    }

    /// `tick` with an explicit step length
    pub fn step_with<R: Rng + ?Sized>(
        &mut self,
        step: f64,
        at: DateTime<Utc>,
        rng: &mut R,
    ) -> Vec<TelemetryEvent> {
        let total = self.track.total_length();
        let mode = self.config.mode;
        let jitter = if self.config.jitter {
            self.config.jitter_radius_m
        } else {
            0.0
        };

        self.ticks += 1;
        let mut events = Vec::with_capacity(self.agents.len());
        for agent in &mut self.agents {
            agent.advance(step, total, mode);
            let Some(point) = self.track.interpolate_at(agent.distance) else {
                continue;
            };
            let point = jitter_point(point, jitter, rng);
            events.push(TelemetryEvent::location(&agent.id, &self.route_id, point, at));
        }
        events
    }
}
