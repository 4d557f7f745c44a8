//! Rate-limited sharing of the device's own position

use super::queue::{Delivery, OutboxQueue};
use crate::error::TrackerResult;
use crate::geo::GeoPoint;
use crate::models::TelemetryEvent;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default minimum spacing between shared positions
pub const DEFAULT_SHARE_INTERVAL: Duration = Duration::from_secs(10);

/// Turns device position fixes into `location` telemetry, at most once per interval
pub struct LocationSharer {
    queue: OutboxQueue,
    agent_id: String,
    interval: Duration,
    enabled: bool,
    last_sent: Option<DateTime<Utc>>,
}

impl LocationSharer {
    pub fn new(queue: OutboxQueue, agent_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            queue,
            agent_id: agent_id.into(),
            interval,
            enabled: false,
            last_sent: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Offer a fresh position fix.
    ///
    /// Returns `None` when sharing is off, no route is selected, or the
    /// previous share was less than one interval ago.
    pub async fn offer(
        &mut self,
        route_id: &str,
        point: GeoPoint,
        at: DateTime<Utc>,
    ) -> TrackerResult<Option<Delivery>> {
        if !self.enabled || route_id.is_empty() || !self.is_due(at) {
            return Ok(None);
        }
        self.last_sent = Some(at);
        let event = TelemetryEvent::location(&self.agent_id, route_id, point, at);
        self.queue.enqueue(event).await.map(Some)
    }

    fn is_due(&self, at: DateTime<Utc>) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => (at - last)
                .to_std()
                .map(|elapsed| elapsed >= self.interval)
                .unwrap_or(false),
        }
    }
}
