//! Frame parsing for the live event stream
//!
//! The wire format is a sequence of UTF-8 blocks separated by a blank line,
//! each carrying an `event: <name>` line and one or more `data: <json>` lines.
//! Chunks may split a block anywhere (including inside a multi-byte
//! character), so bytes are buffered until the delimiter arrives.

use crate::error::{TrackerError, TrackerResult};
use serde::{Deserialize, Serialize};

/// Reserved liveness event, never shown in the rolling log
pub const HEARTBEAT_EVENT: &str = "heartbeat";

/// Position update for an agent on the subscribed route
pub const DRIVER_LOCATION_EVENT: &str = "driver.location";

/// Route progressed from one stop to the next
pub const STOP_ADVANCED_EVENT: &str = "stop.advanced";

/// Name used when a block carries no `event:` line
const DEFAULT_EVENT_NAME: &str = "message";

/// A fully received frame
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    pub event_name: String,
    pub data: serde_json::Value,
}

impl StreamFrame {
    pub fn is_heartbeat(&self) -> bool {
        self.event_name == HEARTBEAT_EVENT
    }

    /// Decode the payload into a typed event
    pub fn decode(&self) -> TrackerResult<StreamEvent> {
        match self.event_name.as_str() {
            DRIVER_LOCATION_EVENT => {
                let location: DriverLocation = serde_json::from_value(self.data.clone())
                    .map_err(|e| TrackerError::Parse(format!("{}: {}", self.event_name, e)))?;
                Ok(StreamEvent::DriverLocation(location))
            }
            STOP_ADVANCED_EVENT => {
                let advanced: StopAdvanced = serde_json::from_value(self.data.clone())
                    .map_err(|e| TrackerError::Parse(format!("{}: {}", self.event_name, e)))?;
                Ok(StreamEvent::StopAdvanced(advanced))
            }
            HEARTBEAT_EVENT => Ok(StreamEvent::Heartbeat),
            _ => Ok(StreamEvent::Other {
                name: self.event_name.clone(),
                data: self.data.clone(),
            }),
        }
    }
}

/// Typed view of the events used by the tracking pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    DriverLocation(DriverLocation),
    StopAdvanced(StopAdvanced),
    Heartbeat,
    Other {
        name: String,
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLocation {
    #[serde(default = "default_driver_id")]
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
}

fn default_driver_id() -> String {
    "driver".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopAdvanced {
    #[serde(default)]
    pub from_stop_id: Option<String>,
    #[serde(default)]
    pub to_stop_id: Option<String>,
}

/// Incremental frame parser
///
/// Holds the unterminated remainder between reads. Only blocks whose
/// delimiter has been fully received are returned.
#[derive(Debug, Default)]
pub struct FrameParser {
    remainder: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every block completed by it, in order
    ///
    /// A block that cannot be decoded yields an `Err` in its slot so the
    /// caller can count and log it without losing the blocks around it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<TrackerResult<StreamFrame>> {
        // CRLF framing is normalised to LF
        self.remainder
            .extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        while let Some(pos) = find_delimiter(&self.remainder) {
            let block: Vec<u8> = self.remainder.drain(..pos + 2).take(pos).collect();
            if let Some(frame) = parse_block(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes buffered for an incomplete block
    pub fn pending_bytes(&self) -> usize {
        self.remainder.len()
    }

    /// Discard any partial block (used when the transport is released)
    pub fn reset(&mut self) {
        self.remainder.clear();
    }
}

fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_block(block: &[u8]) -> Option<TrackerResult<StreamFrame>> {
    let text = match std::str::from_utf8(block) {
        Ok(text) => text,
        Err(e) => return Some(Err(TrackerError::Parse(format!("invalid utf-8: {}", e)))),
    };

    let mut event_name: Option<&str> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_name = Some(value.trim()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return None;
    }

    let name = event_name
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_EVENT_NAME)
        .to_string();
    let raw = data_lines.join("\n");

    Some(
        serde_json::from_str(&raw)
            .map(|data| StreamFrame {
                event_name: name.clone(),
                data,
            })
            .map_err(|e| TrackerError::Parse(format!("{}: {}", name, e))),
    )
}
