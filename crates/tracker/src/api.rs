//! HTTP API for health checks, Prometheus metrics and the live view

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use tracker_lib::{
    aggregate::ViewFilters,
    geo::GeoPoint,
    health::{ComponentStatus, HealthRegistry},
    outbox::{LocationSharer, OutboxHandle, OutboxQueue},
    prefs::{LocalStateStore, Preferences},
    session::{FollowTarget, SessionHandle, ViewEvent},
    stream::{StreamConsumer, StreamStatus},
    TrackerError,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub session: SessionHandle,
    pub stream: Arc<StreamConsumer>,
    pub stream_status: Arc<RwLock<StreamStatus>>,
    pub outbox: OutboxQueue,
    pub outbox_control: OutboxHandle,
    pub sharer: Arc<Mutex<LocationSharer>>,
    pub route_id: Option<String>,
    /// Filters last sent to the session
    pub filters: Arc<Mutex<ViewFilters>>,
    pub local_state: Arc<Mutex<LocalStateStore>>,
}

/// Deepest zoom level the view accepts
pub const MAX_ZOOM: u8 = 22;

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

/// 200 while healthy or degraded, 503 once a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest render frame
async fn view(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.session.frame())
}

async fn stream_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stream_status.read().await.clone())
}

async fn stream_retry(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.stream.retry_now();
    StatusCode::ACCEPTED
}

async fn outbox_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.outbox.stats().await)
}

async fn outbox_flush(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.outbox_control.flush_now().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

/// Share this device's position, subject to the share interval
async fn share_location(
    State(state): State<Arc<AppState>>,
    Json(point): Json<GeoPoint>,
) -> axum::response::Response {
    let Some(route_id) = state.route_id.as_deref() else {
        return error_response(StatusCode::BAD_REQUEST, "no route selected");
    };
    let result = state
        .sharer
        .lock()
        .await
        .offer(route_id, point, chrono::Utc::now())
        .await;
    match result {
        Ok(delivery) => (
            StatusCode::OK,
            Json(serde_json::json!({ "delivery": delivery })),
        )
            .into_response(),
        Err(e @ TrackerError::StorageUnavailable(_)) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

#[derive(Debug, Deserialize)]
struct ZoomRequest {
    zoom: u8,
}

async fn set_zoom(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ZoomRequest>,
) -> axum::response::Response {
    if request.zoom > MAX_ZOOM {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("zoom must be at most {MAX_ZOOM}"),
        );
    }
    let filters = {
        let mut filters = state.filters.lock().await;
        filters.zoom = request.zoom;
        filters.clone()
    };
    state.session.send(ViewEvent::ZoomChanged(request.zoom));
    (StatusCode::OK, Json(filters)).into_response()
}

async fn pan(State(state): State<Arc<AppState>>, Json(center): Json<GeoPoint>) -> impl IntoResponse {
    state.session.send(ViewEvent::Panned(center));
    StatusCode::ACCEPTED
}

/// Filter toggles; absent fields keep their value
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FiltersUpdate {
    route_only: Option<bool>,
    clustering: Option<bool>,
    heat: Option<bool>,
    recency_window_secs: Option<u64>,
}

async fn set_filters(
    State(state): State<Arc<AppState>>,
    Json(update): Json<FiltersUpdate>,
) -> axum::response::Response {
    if update.recency_window_secs == Some(0) {
        return error_response(StatusCode::BAD_REQUEST, "recency window must be positive");
    }
    let filters = {
        let mut filters = state.filters.lock().await;
        if let Some(route_only) = update.route_only {
            filters.route_only = route_only;
        }
        if let Some(clustering) = update.clustering {
            filters.clustering = clustering;
        }
        if let Some(heat) = update.heat {
            filters.heat = heat;
        }
        if let Some(window) = update.recency_window_secs {
            filters.recency_window_secs = window;
        }
        filters.clone()
    };
    state.session.send(ViewEvent::FiltersChanged(filters.clone()));

    if let Some(window) = update.recency_window_secs {
        if let Err(response) =
            update_preferences(&state, |prefs| prefs.recency_window_secs = window).await
        {
            return response;
        }
    }
    (StatusCode::OK, Json(filters)).into_response()
}

#[derive(Debug, Deserialize)]
struct FollowRequest {
    target: Option<FollowTarget>,
}

async fn set_follow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FollowRequest>,
) -> axum::response::Response {
    let following = request.target.is_some();
    state.session.send(ViewEvent::FollowChanged(request.target));
    match update_preferences(&state, |prefs| prefs.follow = following).await {
        Ok(prefs) => (StatusCode::OK, Json(prefs)).into_response(),
        Err(response) => response,
    }
}

async fn get_preferences(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.local_state.lock().await.preferences())
}

/// Preference toggles; absent fields keep their value
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PreferencesUpdate {
    follow: Option<bool>,
    share_location: Option<bool>,
    recency_window_secs: Option<u64>,
}

async fn set_preferences(
    State(state): State<Arc<AppState>>,
    Json(update): Json<PreferencesUpdate>,
) -> axum::response::Response {
    if update.recency_window_secs == Some(0) {
        return error_response(StatusCode::BAD_REQUEST, "recency window must be positive");
    }

    if let Some(share) = update.share_location {
        state.sharer.lock().await.set_enabled(share);
    }
    if let Some(follow) = update.follow {
        let target = follow.then_some(FollowTarget::Any);
        state.session.send(ViewEvent::FollowChanged(target));
    }
    if let Some(window) = update.recency_window_secs {
        let filters = {
            let mut filters = state.filters.lock().await;
            filters.recency_window_secs = window;
            filters.clone()
        };
        state.session.send(ViewEvent::FiltersChanged(filters));
    }

    let result = update_preferences(&state, |prefs| {
        if let Some(follow) = update.follow {
            prefs.follow = follow;
        }
        if let Some(share) = update.share_location {
            prefs.share_location = share;
        }
        if let Some(window) = update.recency_window_secs {
            prefs.recency_window_secs = window;
        }
    })
    .await;
    match result {
        Ok(prefs) => (StatusCode::OK, Json(prefs)).into_response(),
        Err(response) => response,
    }
}

/// Apply `change` to the stored preferences and persist them
async fn update_preferences(
    state: &AppState,
    change: impl FnOnce(&mut Preferences),
) -> Result<Preferences, axum::response::Response> {
    let mut local_state = state.local_state.lock().await;
    let mut prefs = local_state.preferences();
    change(&mut prefs);
    if let Err(e) = local_state.set_preferences(&prefs) {
        warn!(error = %e, "Failed to persist preferences");
        return Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")));
    }
    Ok(prefs)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/view", get(view))
        .route("/v1/view/zoom", post(set_zoom))
        .route("/v1/view/pan", post(pan))
        .route("/v1/view/filters", post(set_filters))
        .route("/v1/view/follow", post(set_follow))
        .route("/v1/prefs", get(get_preferences).post(set_preferences))
        .route("/v1/stream", get(stream_status))
        .route("/v1/stream/retry", post(stream_retry))
        .route("/v1/outbox", get(outbox_stats))
        .route("/v1/outbox/flush", post(outbox_flush))
        .route("/v1/location", post(share_location))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tokio::sync::{broadcast, mpsc};
    use tower::ServiceExt;
    use tracker_lib::aggregate::{SpatialAggregator, ViewFilters};
    use tracker_lib::health::components;
    use tracker_lib::models::TelemetryBatch;
    use std::time::Duration;
    use tempfile::TempDir;
    use tracker_lib::outbox::{MemoryStore, OutboxWorker, TelemetrySender, DEFAULT_SHARE_INTERVAL};
    use tracker_lib::session::{spawn_session, TrackingSession};
    use tracker_lib::stream::{ChunkStream, StreamConfig, StreamTransport};
    use tracker_lib::{StructuredLogger, TrackerError, TrackerResult};

    struct Offline;

    #[async_trait]
    impl StreamTransport for Offline {
        async fn open(&self, _route_id: &str) -> TrackerResult<Box<dyn ChunkStream>> {
            Err(TrackerError::Transport("offline".to_string()))
        }
    }

    #[async_trait]
    impl TelemetrySender for Offline {
        async fn send_batch(&self, _batch: &TelemetryBatch) -> TrackerResult<()> {
            Err(TrackerError::Transport("offline".to_string()))
        }
    }

    fn state() -> (Arc<AppState>, broadcast::Sender<()>) {
        state_with(Some("r1"), LocalStateStore::in_memory())
    }

    fn state_with(
        route_id: Option<&str>,
        local_state: LocalStateStore,
    ) -> (Arc<AppState>, broadcast::Sender<()>) {
        let logger = StructuredLogger::new("api-test");
        let (shutdown_tx, _) = broadcast::channel(1);

        let (_frames_tx, frames_rx) = mpsc::channel(4);
        let session = TrackingSession::new(ViewFilters::default(), SpatialAggregator::default());
        let (session, _task) =
            spawn_session(session, frames_rx, shutdown_tx.subscribe(), logger.clone());

        let stream = StreamConsumer::spawn(
            Arc::new(Offline),
            StreamConfig::default(),
            Vec::new(),
            logger.clone(),
        );
        let outbox = OutboxQueue::new(
            Arc::new(Offline),
            Arc::new(MemoryStore::new()),
            "t1",
            logger,
        );
        let mut sharer = LocationSharer::new(outbox.clone(), "drv_1", DEFAULT_SHARE_INTERVAL);
        sharer.set_enabled(true);
        let (worker, outbox_control) = OutboxWorker::new(
            outbox.clone(),
            std::time::Duration::from_secs(30),
            shutdown_tx.subscribe(),
        );
        tokio::spawn(worker.run());

        let state = AppState {
            health_registry: HealthRegistry::new(),
            session,
            stream_status: stream.status_handle(),
            stream: Arc::new(stream),
            outbox,
            outbox_control,
            sharer: Arc::new(Mutex::new(sharer)),
            route_id: route_id.map(str::to_string),
            filters: Arc::new(Mutex::new(ViewFilters::default())),
            local_state: Arc::new(Mutex::new(local_state)),
        };
        (Arc::new(state), shutdown_tx)
    }

    async fn call(state: Arc<AppState>, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        call_with(state, method, uri, Body::empty()).await
    }

    async fn call_with(
        state: Arc<AppState>,
        method: &str,
        uri: &str,
        body: Body,
    ) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_healthz_ok_when_degraded() {
        let (state, _shutdown) = state();
        state
            .health_registry
            .set_degraded(components::STREAM, "reconnecting")
            .await;

        let (status, body) = call(state.clone(), "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");

        state
            .health_registry
            .set_unhealthy(components::OUTBOX, "store failed")
            .await;
        let (status, _) = call(state, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_readyz_follows_registry() {
        let (state, _shutdown) = state();
        let (status, _) = call(state.clone(), "GET", "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.health_registry.set_ready(true).await;
        let (status, body) = call(state, "GET", "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (state, _shutdown) = state();
        let response = create_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_view_and_stream_status() {
        let (state, _shutdown) = state();

        let (status, body) = call(state.clone(), "GET", "/v1/view").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["markers"].as_array().unwrap().is_empty());

        let (status, body) = call(state, "GET", "/v1/stream").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn test_outbox_flush_and_stats() {
        let (state, _shutdown) = state();

        let (status, body) = call(state.clone(), "POST", "/v1/outbox/flush").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["trigger"], "manual");
        assert_eq!(body["drained"], 0);

        let (status, body) = call(state.clone(), "GET", "/v1/outbox").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 0);
        assert_eq!(body["tier"], "ephemeral");

        let (status, _) = call(state, "POST", "/v1/stream/retry").await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_share_location_is_rate_limited() {
        let (state, _shutdown) = state();
        let point = r#"{"lat":1.0,"lng":2.0}"#;

        let (status, body) =
            call_with(state.clone(), "POST", "/v1/location", Body::from(point)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivery"], "queued");

        let (status, body) = call_with(state.clone(), "POST", "/v1/location", Body::from(point)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["delivery"].is_null());
        assert_eq!(state.outbox.pending(), 1);
    }

    #[tokio::test]
    async fn test_share_location_without_route_is_rejected() {
        let (state, _shutdown) = state_with(None, LocalStateStore::in_memory());
        let point = r#"{"lat":1.0,"lng":2.0}"#;

        let (status, body) =
            call_with(state.clone(), "POST", "/v1/location", Body::from(point)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no route selected");
        assert_eq!(state.outbox.pending(), 0);
    }

    #[tokio::test]
    async fn test_zoom_reaches_published_frame() {
        let (state, _shutdown) = state();
        let mut frames = state.session.frames();

        let (status, body) =
            call_with(state.clone(), "POST", "/v1/view/zoom", Body::from(r#"{"zoom":5}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["zoom"], 5);

        tokio::time::timeout(Duration::from_secs(3), frames.wait_for(|f| f.zoom == 5))
            .await
            .expect("frame with new zoom")
            .unwrap();

        let (status, _) =
            call_with(state, "POST", "/v1/view/zoom", Body::from(r#"{"zoom":30}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pan_is_accepted() {
        let (state, _shutdown) = state();
        let (status, _) = call_with(
            state,
            "POST",
            "/v1/view/pan",
            Body::from(r#"{"lat":45.0,"lng":7.0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_filters_merge_and_persist_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let (state, _shutdown) = state_with(Some("r1"), LocalStateStore::open(&path));

        let (status, body) = call_with(
            state.clone(),
            "POST",
            "/v1/view/filters",
            Body::from(r#"{"heat":true,"recencyWindowSecs":120}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["heat"], true);
        assert_eq!(body["clustering"], false);
        assert_eq!(body["recencyWindowSecs"], 120);
        assert_eq!(body["zoom"], 12);

        assert_eq!(LocalStateStore::open(&path).preferences().recency_window_secs, 120);

        let (status, _) = call_with(
            state,
            "POST",
            "/v1/view/filters",
            Body::from(r#"{"recencyWindowSecs":0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_follow_persists_preference() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let (state, _shutdown) = state_with(Some("r1"), LocalStateStore::open(&path));

        let (status, body) = call_with(
            state.clone(),
            "POST",
            "/v1/view/follow",
            Body::from(r#"{"target":{"kind":"agent","agentId":"drv_7"}}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["follow"], true);
        assert!(LocalStateStore::open(&path).preferences().follow);

        let (status, body) = call_with(
            state,
            "POST",
            "/v1/view/follow",
            Body::from(r#"{"target":null}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["follow"], false);
        assert!(!LocalStateStore::open(&path).preferences().follow);
    }

    #[tokio::test]
    async fn test_prefs_toggle_sharing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let (state, _shutdown) = state_with(Some("r1"), LocalStateStore::open(&path));

        let (status, body) = call(state.clone(), "GET", "/v1/prefs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shareLocation"], false);
        assert_eq!(body["recencyWindowSecs"], 60);

        let (status, body) = call_with(
            state.clone(),
            "POST",
            "/v1/prefs",
            Body::from(r#"{"shareLocation":false}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shareLocation"], false);
        assert!(!state.sharer.lock().await.is_enabled());

        let point = r#"{"lat":1.0,"lng":2.0}"#;
        let (status, body) =
            call_with(state.clone(), "POST", "/v1/location", Body::from(point)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["delivery"].is_null());

        let (status, body) = call_with(
            state.clone(),
            "POST",
            "/v1/prefs",
            Body::from(r#"{"shareLocation":true,"recencyWindowSecs":30}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shareLocation"], true);
        assert!(state.sharer.lock().await.is_enabled());
        assert_eq!(state.filters.lock().await.recency_window_secs, 30);

        let stored = LocalStateStore::open(&path).preferences();
        assert!(stored.share_location);
        assert_eq!(stored.recency_window_secs, 30);
    }
}
