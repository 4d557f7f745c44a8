//! View state for one tracked route
//!
//! `TrackingSession` owns the position cache, filters and latest render
//! frame for a single view. Inputs arrive as typed `ViewEvent`s and are
//! handled by a pure `handle(event, now)` that returns the effects to
//! apply; `spawn_session` runs that loop on a task, applying effects
//! through a coalescing scheduler and `watch` channels.

use crate::aggregate::{
    debounce_delay, CoalescingScheduler, PositionCache, RenderFrame, SpatialAggregator,
    ViewFilters,
};
use crate::geo::GeoPoint;
use crate::models::{now_millis, LatestPosition};
use crate::observability::StructuredLogger;
use crate::stream::{StreamEvent, StreamFrame};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info};

/// Period of the refresh that lets markers fade without new traffic
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const RECOMPUTE_KEY: &str = "recompute";

/// Which agent the view follows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "agentId")]
pub enum FollowTarget {
    Any,
    Agent(String),
}

impl FollowTarget {
    fn matches(&self, agent_id: &str) -> bool {
        match self {
            FollowTarget::Any => true,
            FollowTarget::Agent(id) => id == agent_id,
        }
    }
}

/// Inputs to a tracking session
#[derive(Debug, Clone)]
pub enum ViewEvent {
    /// A frame from the live stream
    Frame(StreamFrame),
    /// Switch the view to another route
    RouteChanged(String),
    /// Latest known positions for a route
    Seed {
        route_id: String,
        positions: Vec<LatestPosition>,
        /// Unix milliseconds when the positions were recorded
        observed_at: i64,
    },
    ZoomChanged(u8),
    Panned(GeoPoint),
    FiltersChanged(ViewFilters),
    FollowChanged(Option<FollowTarget>),
    /// The coalesced recompute timer fired
    RecomputeDue,
    /// Periodic refresh tick
    Refresh,
}

/// Work a handled event asks the runner to do
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEffect {
    ScheduleRecompute(Duration),
    Publish(RenderFrame),
    Follow(GeoPoint),
}

pub struct TrackingSession {
    route_id: Option<String>,
    cache: PositionCache,
    filters: ViewFilters,
    follow: Option<FollowTarget>,
    center: Option<GeoPoint>,
    aggregator: SpatialAggregator,
    frame: RenderFrame,
}

impl TrackingSession {
    pub fn new(filters: ViewFilters, aggregator: SpatialAggregator) -> Self {
        Self {
            route_id: None,
            cache: PositionCache::new(),
            filters,
            follow: None,
            center: None,
            aggregator,
            frame: RenderFrame::default(),
        }
    }

    pub fn route_id(&self) -> Option<&str> {
        self.route_id.as_deref()
    }

    pub fn cache(&self) -> &PositionCache {
        &self.cache
    }

    pub fn filters(&self) -> &ViewFilters {
        &self.filters
    }

    pub fn follow(&self) -> Option<&FollowTarget> {
        self.follow.as_ref()
    }

    pub fn center(&self) -> Option<GeoPoint> {
        self.center
    }

    pub fn frame(&self) -> &RenderFrame {
        &self.frame
    }

    fn schedule(&self) -> ViewEffect {
        ViewEffect::ScheduleRecompute(debounce_delay(self.cache.len()))
    }

    /// Apply one event at wall-clock `now_ms`
    pub fn handle(&mut self, event: ViewEvent, now_ms: i64) -> Vec<ViewEffect> {
        match event {
            ViewEvent::Frame(frame) => self.handle_frame(&frame, now_ms),
            ViewEvent::RouteChanged(route_id) => {
                if self.route_id.as_deref() == Some(route_id.as_str()) {
                    return Vec::new();
                }
                self.cache.reset_route_members();
                self.route_id = Some(route_id);
                vec![self.schedule()]
            }
            ViewEvent::Seed {
                route_id,
                positions,
                observed_at,
            } => {
                if self.route_id.as_deref() != Some(route_id.as_str()) {
                    debug!(route_id = %route_id, "Ignoring seed for inactive route");
                    return Vec::new();
                }
                self.cache.seed(&positions, observed_at);
                vec![self.schedule()]
            }
            ViewEvent::ZoomChanged(zoom) => {
                self.filters.zoom = zoom;
                vec![self.schedule()]
            }
            ViewEvent::Panned(center) => {
                self.center = Some(center);
                vec![self.schedule()]
            }
            ViewEvent::FiltersChanged(filters) => {
                self.filters = filters;
                vec![self.schedule()]
            }
            ViewEvent::FollowChanged(follow) => {
                self.follow = follow;
                Vec::new()
            }
            ViewEvent::RecomputeDue => {
                self.frame = self.aggregator.recompute(&self.cache, &self.filters, now_ms);
                vec![ViewEffect::Publish(self.frame.clone())]
            }
            ViewEvent::Refresh => {
                if self.filters.needs_periodic_refresh() {
                    vec![self.schedule()]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &StreamFrame, now_ms: i64) -> Vec<ViewEffect> {
        let location = match frame.decode() {
            Ok(StreamEvent::DriverLocation(location)) => location,
            Ok(_) => return Vec::new(),
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable frame");
                return Vec::new();
            }
        };

        let point = GeoPoint::new(location.lat, location.lng);
        self.cache.upsert(&location.driver_id, point, now_ms);
        self.cache.mark_route_member(&location.driver_id);

        let mut effects = Vec::with_capacity(2);
        if self
            .follow
            .as_ref()
            .is_some_and(|f| f.matches(&location.driver_id))
        {
            self.center = Some(point);
            effects.push(ViewEffect::Follow(point));
        }
        effects.push(self.schedule());
        effects
    }
}

/// Handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<ViewEvent>,
    frames: watch::Receiver<RenderFrame>,
    follow: watch::Receiver<Option<GeoPoint>>,
}

impl SessionHandle {
    /// Queue an event; false once the session has stopped
    pub fn send(&self, event: ViewEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Latest published frame
    pub fn frame(&self) -> RenderFrame {
        self.frames.borrow().clone()
    }

    pub fn frames(&self) -> watch::Receiver<RenderFrame> {
        self.frames.clone()
    }

    pub fn follow(&self) -> watch::Receiver<Option<GeoPoint>> {
        self.follow.clone()
    }
}

/// Run `session` on a task fed by `stream_frames` and the returned handle
pub fn spawn_session(
    session: TrackingSession,
    stream_frames: mpsc::Receiver<StreamFrame>,
    shutdown: broadcast::Receiver<()>,
    logger: StructuredLogger,
) -> (SessionHandle, JoinHandle<()>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = watch::channel(RenderFrame::default());
    let (follow_tx, follow_rx) = watch::channel(None);

    let runner = SessionRunner {
        session,
        scheduler: CoalescingScheduler::new(),
        self_tx: events_tx.clone(),
        frames_tx,
        follow_tx,
        logger,
    };
    let task = tokio::spawn(runner.run(events_rx, stream_frames, shutdown));

    let handle = SessionHandle {
        events: events_tx,
        frames: frames_rx,
        follow: follow_rx,
    };
    (handle, task)
}

struct SessionRunner {
    session: TrackingSession,
    scheduler: CoalescingScheduler<&'static str>,
    self_tx: mpsc::UnboundedSender<ViewEvent>,
    frames_tx: watch::Sender<RenderFrame>,
    follow_tx: watch::Sender<Option<GeoPoint>>,
    logger: StructuredLogger,
}

impl SessionRunner {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ViewEvent>,
        mut stream_frames: mpsc::Receiver<StreamFrame>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(view = %self.logger.view(), "Starting tracking session");
        let mut refresh = interval_at(tokio::time::Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_open = true;

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => break,
                Some(event) = events.recv() => event,
                frame = stream_frames.recv(), if frames_open => match frame {
                    Some(frame) => ViewEvent::Frame(frame),
                    None => {
                        frames_open = false;
                        continue;
                    }
                },
                _ = refresh.tick() => ViewEvent::Refresh,
            };

            let started = Instant::now();
            let effects = self.session.handle(event, now_millis());
            for effect in effects {
                self.apply(effect, started);
            }
        }

        self.scheduler.cancel_all();
        info!(view = %self.logger.view(), "Tracking session stopped");
    }

    fn apply(&mut self, effect: ViewEffect, started: Instant) {
        match effect {
            ViewEffect::ScheduleRecompute(delay) => {
                let tx = self.self_tx.clone();
                self.scheduler.schedule(RECOMPUTE_KEY, delay, move || {
                    let _ = tx.send(ViewEvent::RecomputeDue);
                });
            }
            ViewEffect::Publish(frame) => {
                self.logger.log_recompute(
                    frame.visible_count(),
                    frame.clusters.len(),
                    frame.heat.len(),
                    started.elapsed(),
                );
                self.frames_tx.send_replace(frame);
            }
            ViewEffect::Follow(point) => {
                self.follow_tx.send_replace(Some(point));
            }
        }
    }
}
