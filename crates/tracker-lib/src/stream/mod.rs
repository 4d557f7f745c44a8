//! Live event stream consumption
//!
//! This module provides:
//! - Incremental parsing of blank-line delimited text frames
//! - Typed decoding of the events the tracking view relies on
//! - A bounded rolling log of visible events
//! - Reconnect-with-backoff driven by an explicit state machine

mod backoff;
mod consumer;
mod frame;
mod log;
mod machine;


pub use backoff::{ReconnectBackoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
pub use consumer::{ChunkStream, StreamConfig, StreamConsumer, StreamStatus, StreamTransport};
pub use frame::{
    DriverLocation, FrameParser, StopAdvanced, StreamEvent, StreamFrame, DRIVER_LOCATION_EVENT,
    HEARTBEAT_EVENT, STOP_ADVANCED_EVENT,
};
pub use log::{EventLog, LogEntry, DEFAULT_LOG_CAPACITY};
pub use machine::{StreamEffect, StreamMachine, StreamSignal, StreamState};
