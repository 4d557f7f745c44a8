//! Bounded rolling log of visible stream events

use super::frame::{StreamFrame, STOP_ADVANCED_EVENT};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of frames kept in the visible log
pub const DEFAULT_LOG_CAPACITY: usize = 50;

/// One visible log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub received_at: i64,
    pub event_name: String,
    pub summary: String,
}

/// Rolling log that keeps the most recent non-heartbeat frames
///
/// Heartbeats are not stored but still refresh `last_activity`.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    last_activity: Option<i64>,
    heartbeats: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_activity: None,
            heartbeats: 0,
        }
    }

    /// Record a frame received at `at_ms`; returns whether it became visible
    pub fn record(&mut self, frame: &StreamFrame, at_ms: i64) -> bool {
        self.last_activity = Some(at_ms);

        if frame.is_heartbeat() {
            self.heartbeats += 1;
            return false;
        }

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            received_at: at_ms,
            event_name: frame.event_name.clone(),
            summary: summarize(frame),
        });
        true
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time of the most recent frame of any kind, heartbeats included
    pub fn last_activity(&self) -> Option<i64> {
        self.last_activity
    }

    pub fn heartbeats(&self) -> u64 {
        self.heartbeats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn summarize(frame: &StreamFrame) -> String {
    if frame.event_name == STOP_ADVANCED_EVENT {
        let from = frame.data["fromStopId"].as_str().unwrap_or("");
        let to = frame.data["toStopId"].as_str().unwrap_or("");
        return format!("{} → {}", from, to);
    }
    frame.data.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, data: serde_json::Value) -> StreamFrame {
        StreamFrame {
            event_name: name.to_string(),
            data,
        }
    }

    #[test]
    fn test_heartbeat_is_liveness_only() {
        let mut log = EventLog::default();
        let visible = log.record(&frame("heartbeat", serde_json::json!({})), 1_000);

        assert!(!visible);
        assert!(log.is_empty());
        assert_eq!(log.last_activity(), Some(1_000));
        assert_eq!(log.heartbeats(), 1);
    }

    #[test]
    fn test_log_is_capped() {
        let mut log = EventLog::default();
        for i in 0..500 {
            log.record(&frame("driver.location", serde_json::json!({ "n": i })), i);
        }

        assert_eq!(log.len(), DEFAULT_LOG_CAPACITY);
        let entries = log.entries();
        assert_eq!(entries[0].received_at, 450);
        assert_eq!(entries[49].received_at, 499);
    }

    #[test]
    fn test_stop_advanced_summary() {
        let mut log = EventLog::default();
        log.record(
            &frame(
                "stop.advanced",
                serde_json::json!({"fromStopId": "s1", "toStopId": "s2"}),
            ),
            5,
        );
        assert_eq!(log.entries()[0].summary, "s1 → s2");
    }
}
