//! Error taxonomy for the tracking pipeline
//!
//! None of these are fatal to the hosting client. Transport errors are
//! absorbed by the outbox (send path) or the reconnect loop (stream path),
//! parse errors drop a single frame or record, and input errors turn the
//! requested operation into a no-op.

use thiserror::Error;

/// Errors raised by tracker components
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Send or connect failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed frame, payload or persisted record
    #[error("parse error: {0}")]
    Parse(String),

    /// The durable store could not be used
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A required identifier or value is missing
    #[error("invalid input: {0}")]
    Input(String),
}

impl TrackerError {
    /// Returns true for failures that should route into the retry paths
    pub fn is_transport(&self) -> bool {
        matches!(self, TrackerError::Transport(_))
    }
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        TrackerError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Parse(e.to_string())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackerError::Input("no route selected".to_string());
        assert_eq!(err.to_string(), "invalid input: no route selected");
    }

    #[test]
    fn test_json_error_maps_to_parse() {
        let err: TrackerError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, TrackerError::Parse(_)));
        assert!(!err.is_transport());
    }
}
