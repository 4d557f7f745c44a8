//! Path simulation
//!
//! This module moves simulated agents along a route polyline:
//! - Cumulative-distance table and distance-to-position interpolation
//! - Bounce and loop motion policies for up to 20 agents
//! - Timer-driven worker feeding each tick into the outbox

mod engine;
mod path;
mod worker;


pub use engine::{
    MotionMode, SimulatedAgent, Simulation, SimulationConfig, MAX_AGENTS, MIN_AGENTS,
    MIN_INTERVAL, MIN_SPEED_KMH,
};
pub use path::{cumulative_table, PathTrack};
pub use worker::{SimulationStats, SimulationWorker};
