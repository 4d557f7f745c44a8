//! Connection state machine for one stream subscription
//!
//! `apply` is a pure transition: it updates the state and returns the
//! effects the driver must perform. Timers and transports live in the
//! driver, which keeps the transitions testable without a runtime.

use super::backoff::ReconnectBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Closed,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// Subscribe to a route
    Start(String),
    /// The streaming request was accepted
    Opened,
    /// The server closed the stream
    Ended,
    /// Connect or read failure
    Failed(String),
    /// The pending reconnect timer elapsed
    ReconnectDue,
    /// Operator asked to retry immediately
    RetryNow,
    /// Explicit stop
    Stop,
}

/// Work the driver must carry out after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEffect {
    Connect { route_id: String },
    Release,
    ArmReconnect(Duration),
    CancelReconnect,
}

#[derive(Debug, Clone)]
pub struct StreamMachine {
    state: StreamState,
    route_id: Option<String>,
    backoff: ReconnectBackoff,
    auto_reconnect: bool,
}

impl StreamMachine {
    pub fn new(backoff: ReconnectBackoff, auto_reconnect: bool) -> Self {
        Self {
            state: StreamState::Idle,
            route_id: None,
            backoff,
            auto_reconnect,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    pub fn backoff(&self) -> &ReconnectBackoff {
        &self.backoff
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    pub fn apply(&mut self, signal: StreamSignal) -> Vec<StreamEffect> {
        use StreamState::*;

        match (self.state, signal) {
            (Idle | Closed, StreamSignal::Start(route_id)) => {
                self.backoff.reset();
                self.route_id = Some(route_id.clone());
                self.state = Connecting;
                vec![StreamEffect::Connect { route_id }]
            }
            (Connecting, StreamSignal::Opened) => {
                self.backoff.reset();
                self.state = Streaming;
                vec![]
            }
            (Connecting | Streaming, StreamSignal::Ended | StreamSignal::Failed(_)) => {
                if self.auto_reconnect {
                    self.state = Reconnecting;
                    let delay = self.backoff.next_delay();
                    vec![StreamEffect::Release, StreamEffect::ArmReconnect(delay)]
                } else {
                    self.state = Closed;
                    vec![StreamEffect::Release]
                }
            }
            (Reconnecting, StreamSignal::ReconnectDue) => self.connect(),
            (Reconnecting, StreamSignal::RetryNow) => {
                self.backoff.reset();
                let mut effects = vec![StreamEffect::CancelReconnect];
                effects.extend(self.connect());
                effects
            }
            (Closed, StreamSignal::Stop) => vec![],
            (_, StreamSignal::Stop) => {
                self.state = Closed;
                vec![StreamEffect::CancelReconnect, StreamEffect::Release]
            }
            // Anything else is stale (e.g. a timer racing a stop)
            _ => vec![],
        }
    }

    fn connect(&mut self) -> Vec<StreamEffect> {
        match self.route_id.clone() {
            Some(route_id) => {
                self.state = StreamState::Connecting;
                vec![StreamEffect::Connect { route_id }]
            }
            None => {
                self.state = StreamState::Closed;
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StreamMachine {
        StreamMachine::new(ReconnectBackoff::default(), true)
    }

    #[test]
    fn test_start_connects() {
        let mut m = machine();
        let effects = m.apply(StreamSignal::Start("r1".to_string()));

        assert_eq!(m.state(), StreamState::Connecting);
        assert_eq!(
            effects,
            vec![StreamEffect::Connect {
                route_id: "r1".to_string()
            }]
        );
    }

    #[test]
    fn test_start_ignored_while_active() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Opened);

        assert!(m.apply(StreamSignal::Start("r2".to_string())).is_empty());
        assert_eq!(m.route_id(), Some("r1"));
    }

    #[test]
    fn test_consecutive_failures_back_off() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));

        let mut delays = Vec::new();
        for _ in 0..6 {
            let effects = m.apply(StreamSignal::Failed("refused".to_string()));
            for effect in effects {
                if let StreamEffect::ArmReconnect(d) = effect {
                    delays.push(d.as_millis() as u64);
                }
            }
            assert_eq!(m.state(), StreamState::Reconnecting);
            m.apply(StreamSignal::ReconnectDue);
            assert_eq!(m.state(), StreamState::Connecting);
        }

        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_successful_open_resets_delay() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Failed("x".to_string()));
        m.apply(StreamSignal::ReconnectDue);
        m.apply(StreamSignal::Opened);

        let effects = m.apply(StreamSignal::Ended);
        assert!(effects.contains(&StreamEffect::ArmReconnect(Duration::from_millis(2_000))));
    }

    #[test]
    fn test_retry_now_cancels_timer_and_resets() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Failed("x".to_string()));
        m.apply(StreamSignal::ReconnectDue);
        m.apply(StreamSignal::Failed("x".to_string()));

        let effects = m.apply(StreamSignal::RetryNow);
        assert_eq!(effects[0], StreamEffect::CancelReconnect);
        assert_eq!(m.state(), StreamState::Connecting);
        assert_eq!(m.backoff().peek(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_without_auto_reconnect_end_closes() {
        let mut m = StreamMachine::new(ReconnectBackoff::default(), false);
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Opened);

        let effects = m.apply(StreamSignal::Ended);
        assert_eq!(effects, vec![StreamEffect::Release]);
        assert_eq!(m.state(), StreamState::Closed);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Failed("x".to_string()));

        let first = m.apply(StreamSignal::Stop);
        assert!(first.contains(&StreamEffect::CancelReconnect));
        assert_eq!(m.state(), StreamState::Closed);

        assert!(m.apply(StreamSignal::Stop).is_empty());
        assert_eq!(m.state(), StreamState::Closed);
    }

    #[test]
    fn test_stale_timer_after_stop_is_ignored() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Failed("x".to_string()));
        m.apply(StreamSignal::Stop);

        assert!(m.apply(StreamSignal::ReconnectDue).is_empty());
        assert_eq!(m.state(), StreamState::Closed);
    }

    #[test]
    fn test_restart_from_closed() {
        let mut m = machine();
        m.apply(StreamSignal::Start("r1".to_string()));
        m.apply(StreamSignal::Stop);

        let effects = m.apply(StreamSignal::Start("r2".to_string()));
        assert_eq!(m.state(), StreamState::Connecting);
        assert_eq!(m.route_id(), Some("r2"));
        assert_eq!(effects.len(), 1);
    }
}
