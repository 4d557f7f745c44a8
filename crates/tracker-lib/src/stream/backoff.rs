//! Reconnect delay schedule

use std::time::Duration;

/// First reconnect delay, and the value restored by `reset`
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);

/// Ceiling for the reconnect delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Exponential backoff: doubles per consecutive failure, capped at `max`
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        self.attempts += 1;
        delay
    }

    /// Delay the next failure would use, without advancing
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_doubles_and_caps() {
        let mut backoff = ReconnectBackoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();

        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]);
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_delay_never_exceeds_cap() {
        let mut backoff = ReconnectBackoff::default();
        for _ in 0..100 {
            assert!(backoff.next_delay() <= DEFAULT_MAX_DELAY);
        }
    }

    #[test]
    fn test_reset_restores_base() {
        let mut backoff = ReconnectBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.peek(), DEFAULT_BASE_DELAY);
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), DEFAULT_BASE_DELAY);
    }
}
