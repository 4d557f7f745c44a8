//! Async driver for a live stream subscription
//!
//! The consumer owns a single worker task. Commands (start, retry, stop)
//! and transport progress are multiplexed in one `select!` loop, so every
//! transition runs to completion before the next input is looked at.

use super::backoff::{ReconnectBackoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use super::frame::{FrameParser, StreamFrame};
use super::log::{EventLog, LogEntry, DEFAULT_LOG_CAPACITY};
use super::machine::{StreamEffect, StreamMachine, StreamSignal, StreamState};
use crate::error::{TrackerError, TrackerResult};
use crate::models::now_millis;
use crate::observability::{StructuredLogger, TrackerMetrics};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opens long-lived streaming requests for a route
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, route_id: &str) -> TrackerResult<Box<dyn ChunkStream>>;
}

/// Body of an open streaming response
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk of bytes, or `None` once the server ends the stream
    async fn next_chunk(&mut self) -> TrackerResult<Option<Vec<u8>>>;
}

/// Configuration for a stream consumer
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Reconnect after termination instead of closing
    pub auto_reconnect: bool,
    /// First reconnect delay
    pub base_delay: Duration,
    /// Reconnect delay ceiling
    pub max_delay: Duration,
    /// Visible rolling log size
    pub log_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Snapshot of the consumer published after every transition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub state: StreamState,
    pub route_id: Option<String>,
    /// Delay of the pending reconnect, if one is armed
    pub reconnect_delay_ms: Option<u64>,
    pub reconnect_attempts: u32,
    pub frames_received: u64,
    /// Malformed frames
    pub frames_dropped: u64,
    /// Frames a full listener could not accept
    pub frames_lagged: u64,
    pub heartbeats: u64,
    pub last_activity: Option<i64>,
    pub log: Vec<LogEntry>,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self {
            state: StreamState::Idle,
            route_id: None,
            reconnect_delay_ms: None,
            reconnect_attempts: 0,
            frames_received: 0,
            frames_dropped: 0,
            frames_lagged: 0,
            heartbeats: 0,
            last_activity: None,
            log: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Start(String),
    RetryNow,
    Stop,
}

/// Handle to a running stream consumer
pub struct StreamConsumer {
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<RwLock<StreamStatus>>,
    handle: JoinHandle<()>,
}

impl StreamConsumer {
    /// Spawn the worker; decoded frames are delivered to every listener in arrival order
    ///
    /// Delivery never waits on a listener. A frame that does not fit in a
    /// listener's channel is skipped for that listener and counted in
    /// `StreamStatus::frames_lagged`.
    pub fn spawn(
        transport: Arc<dyn StreamTransport>,
        config: StreamConfig,
        listeners: Vec<mpsc::Sender<StreamFrame>>,
        logger: StructuredLogger,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(StreamStatus::default()));

        let worker = StreamWorker {
            transport,
            machine: StreamMachine::new(
                ReconnectBackoff::new(config.base_delay, config.max_delay),
                config.auto_reconnect,
            ),
            parser: FrameParser::new(),
            log: EventLog::new(config.log_capacity),
            listeners,
            commands: command_rx,
            status: Arc::clone(&status),
            active: None,
            opening: None,
            reconnect: None,
            frames_received: 0,
            frames_dropped: 0,
            frames_lagged: 0,
            metrics: TrackerMetrics::new(),
            logger,
        };
        let handle = tokio::spawn(worker.run());

        Self {
            commands,
            status,
            handle,
        }
    }

    /// Subscribe to `route_id`, replacing any current subscription
    ///
    /// An empty route id is an input error and leaves the consumer untouched.
    pub fn start(&self, route_id: &str) -> TrackerResult<()> {
        let route_id = route_id.trim();
        if route_id.is_empty() {
            return Err(TrackerError::Input("no route selected".to_string()));
        }
        self.send(Command::Start(route_id.to_string()));
        Ok(())
    }

    /// Cancel a pending reconnect and try again now with the base delay
    pub fn retry_now(&self) {
        self.send(Command::RetryNow);
    }

    /// Close the subscription; safe to call in any state
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub async fn status(&self) -> StreamStatus {
        self.status.read().await.clone()
    }

    /// Shared status handle for readers outside the consumer
    pub fn status_handle(&self) -> Arc<RwLock<StreamStatus>> {
        Arc::clone(&self.status)
    }

    /// Stop and wait for the worker to exit
    pub async fn shutdown(self) {
        self.send(Command::Stop);
        drop(self.commands);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Stream worker exited abnormally");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Stream worker already exited");
        }
    }
}

/// What woke the worker
enum Wake {
    Command(Option<Command>),
    Opened(TrackerResult<Box<dyn ChunkStream>>),
    Chunk(TrackerResult<Option<Vec<u8>>>),
    ReconnectDue,
}

type OpenFuture = Pin<Box<dyn Future<Output = TrackerResult<Box<dyn ChunkStream>>> + Send>>;

struct StreamWorker {
    transport: Arc<dyn StreamTransport>,
    machine: StreamMachine,
    parser: FrameParser,
    log: EventLog,
    listeners: Vec<mpsc::Sender<StreamFrame>>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: Arc<RwLock<StreamStatus>>,
    active: Option<Box<dyn ChunkStream>>,
    /// Connection attempt in flight; survives commands that leave the state unchanged
    opening: Option<OpenFuture>,
    reconnect: Option<(Instant, Duration)>,
    frames_received: u64,
    frames_dropped: u64,
    frames_lagged: u64,
    metrics: TrackerMetrics,
    logger: StructuredLogger,
}

impl StreamWorker {
    async fn run(mut self) {
        debug!("Stream worker started");

        loop {
            self.publish_status().await;

            let wake = match self.machine.state() {
                StreamState::Idle | StreamState::Closed => Wake::Command(self.commands.recv().await),
                StreamState::Connecting => match self.opening.as_mut() {
                    Some(opening) => tokio::select! {
                        cmd = self.commands.recv() => Wake::Command(cmd),
                        opened = opening => Wake::Opened(opened),
                    },
                    None => Wake::Opened(Err(TrackerError::Transport(
                        "connection attempt lost".to_string(),
                    ))),
                },
                StreamState::Streaming => match self.active.as_mut() {
                    Some(active) => tokio::select! {
                        cmd = self.commands.recv() => Wake::Command(cmd),
                        chunk = active.next_chunk() => Wake::Chunk(chunk),
                    },
                    None => Wake::Chunk(Err(TrackerError::Transport(
                        "stream released".to_string(),
                    ))),
                },
                StreamState::Reconnecting => {
                    let deadline = self
                        .reconnect
                        .map(|(at, _)| at)
                        .unwrap_or_else(Instant::now);
                    tokio::select! {
                        cmd = self.commands.recv() => Wake::Command(cmd),
                        _ = tokio::time::sleep_until(deadline) => Wake::ReconnectDue,
                    }
                }
            };

            match wake {
                Wake::Command(None) => {
                    self.apply(StreamSignal::Stop);
                    break;
                }
                Wake::Command(Some(cmd)) => self.on_command(cmd),
                Wake::Opened(Ok(stream)) => {
                    self.opening = None;
                    self.active = Some(stream);
                    self.apply(StreamSignal::Opened);
                    if let Some(route_id) = self.machine.route_id() {
                        self.logger.log_stream_connected(route_id);
                    }
                }
                Wake::Opened(Err(e)) => {
                    self.opening = None;
                    self.metrics.inc_stream_failures();
                    self.apply(StreamSignal::Failed(e.to_string()));
                }
                Wake::Chunk(Ok(Some(bytes))) => self.on_chunk(&bytes),
                Wake::Chunk(Ok(None)) => {
                    info!("Event stream ended by server");
                    self.apply(StreamSignal::Ended);
                }
                Wake::Chunk(Err(e)) => {
                    self.metrics.inc_stream_failures();
                    self.apply(StreamSignal::Failed(e.to_string()));
                }
                Wake::ReconnectDue => self.apply(StreamSignal::ReconnectDue),
            }
        }

        self.publish_status().await;
        debug!("Stream worker stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start(route_id) => {
                // A new subscription always tears down the previous one first
                self.apply(StreamSignal::Stop);
                self.log.clear();
                self.logger.log_subscription(&route_id);
                self.apply(StreamSignal::Start(route_id));
            }
            Command::RetryNow => self.apply(StreamSignal::RetryNow),
            Command::Stop => {
                self.apply(StreamSignal::Stop);
            }
        }
    }

    fn on_chunk(&mut self, bytes: &[u8]) {
        let now = now_millis();

        for result in self.parser.push(bytes) {
            match result {
                Ok(frame) => {
                    self.frames_received += 1;
                    self.metrics.inc_frames_received();
                    self.log.record(&frame, now);
                    self.dispatch(frame);
                }
                Err(e) => {
                    self.frames_dropped += 1;
                    self.metrics.inc_frames_dropped();
                    self.logger.log_frame_dropped(&e.to_string());
                }
            }
        }
    }

    fn dispatch(&mut self, frame: StreamFrame) {
        let mut lagged = 0;
        self.listeners
            .retain(|listener| match listener.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    lagged += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dropping closed stream listener");
                    false
                }
            });
        if lagged > 0 {
            self.frames_lagged += lagged;
            debug!(event = %frame.event_name, listeners = lagged, "Listener full, frame skipped");
        }
    }

    fn apply(&mut self, signal: StreamSignal) {
        let reason = match &signal {
            StreamSignal::Failed(reason) => Some(reason.clone()),
            StreamSignal::Ended => Some("stream ended".to_string()),
            _ => None,
        };

        for effect in self.machine.apply(signal) {
            match effect {
                StreamEffect::Connect { route_id } => {
                    debug!(route_id = %route_id, "Connecting event stream");
                    let transport = Arc::clone(&self.transport);
                    self.opening = Some(Box::pin(async move { transport.open(&route_id).await }));
                }
                StreamEffect::Release => {
                    self.active = None;
                    self.parser.reset();
                }
                StreamEffect::ArmReconnect(delay) => {
                    self.reconnect = Some((Instant::now() + delay, delay));
                    self.metrics.inc_reconnects();
                    self.logger.log_reconnect_scheduled(
                        self.machine.route_id().unwrap_or_default(),
                        delay,
                        self.machine.backoff().attempts(),
                        reason.as_deref().unwrap_or("unknown"),
                    );
                }
                StreamEffect::CancelReconnect => {
                    self.reconnect = None;
                }
            }
        }

        if self.machine.state() != StreamState::Reconnecting {
            self.reconnect = None;
        }
        if self.machine.state() != StreamState::Connecting {
            self.opening = None;
        }
    }

    fn snapshot(&self) -> StreamStatus {
        StreamStatus {
            state: self.machine.state(),
            route_id: self.machine.route_id().map(str::to_string),
            reconnect_delay_ms: self.reconnect.map(|(_, d)| d.as_millis() as u64),
            reconnect_attempts: self.machine.backoff().attempts(),
            frames_received: self.frames_received,
            frames_dropped: self.frames_dropped,
            frames_lagged: self.frames_lagged,
            heartbeats: self.log.heartbeats(),
            last_activity: self.log.last_activity(),
            log: self.log.entries(),
        }
    }

    // Only the snapshot and the Arc cross the await; the worker itself is not Sync.
    async fn publish_status(&mut self) {
        let snapshot = self.snapshot();
        let status = Arc::clone(&self.status);
        *status.write().await = snapshot;
    }
}
