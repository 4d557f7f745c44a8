//! HTTP collaborators for the tracking API
//!
//! `FleetApiClient` is the production implementation of both
//! `StreamTransport` (live route events) and `TelemetrySender`
//! (batched telemetry), plus the read endpoints used to seed a view.

use crate::error::{TrackerError, TrackerResult};
use crate::models::{Destination, LatestPositions, RoutePath, TelemetryBatch};
use crate::outbox::TelemetrySender;
use crate::stream::{ChunkStream, StreamTransport};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const TENANT_HEADER: &str = "X-Tenant-Id";
pub const ROLE_HEADER: &str = "X-Role";
pub const DRIVER_HEADER: &str = "X-Driver-Id";

/// Identity attached to every request
///
/// The bearer token is a development convenience; no token is issued or
/// validated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub tenant_id: String,
    pub role: String,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl AuthContext {
    /// Field device identity with the development token `{tenant}:driver`
    pub fn driver(tenant_id: impl Into<String>, driver_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        Self {
            bearer_token: Some(format!("{tenant_id}:driver")),
            tenant_id,
            role: "driver".to_string(),
            driver_id: Some(driver_id.into()),
        }
    }

    /// Dispatch console identity
    pub fn dispatcher(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            role: "admin".to_string(),
            driver_id: None,
            bearer_token: None,
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request
            .header(TENANT_HEADER, &self.tenant_id)
            .header(ROLE_HEADER, &self.role);
        if let Some(driver_id) = &self.driver_id {
            request = request.header(DRIVER_HEADER, driver_id);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Whole-request timeout for non-streaming calls
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Client for the tracking API
#[derive(Clone)]
pub struct FleetApiClient {
    http: Client,
    /// No overall timeout, the event stream stays open indefinitely
    stream_http: Client,
    base_url: Url,
    auth: AuthContext,
}

impl FleetApiClient {
    pub fn new(config: &ClientConfig, auth: AuthContext) -> TrackerResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| TrackerError::Input(format!("invalid base url '{}': {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(TrackerError::Input(format!(
                "base url '{}' cannot carry a path",
                config.base_url
            )));
        }

        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;
        let stream_http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http,
            stream_http,
            base_url,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `base/<segments...>`, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> TrackerResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TrackerError::Input("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn route_endpoint(&self, route_id: &str, tail: &[&str]) -> TrackerResult<Url> {
        if route_id.trim().is_empty() {
            return Err(TrackerError::Input("no route selected".to_string()));
        }
        let mut segments = vec!["v1", "routes", route_id];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> TrackerResult<T> {
        debug!(url = %url, "GET");
        let response = self.auth.apply(self.http.get(url)).send().await?;
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Polyline for a route
    pub async fn route_path(&self, route_id: &str) -> TrackerResult<RoutePath> {
        let url = self.route_endpoint(route_id, &["path"])?;
        self.get_json(url).await
    }

    /// Latest known position of each agent on a route
    pub async fn latest_positions(&self, route_id: &str) -> TrackerResult<LatestPositions> {
        let url = self.route_endpoint(route_id, &["drivers", "latest"])?;
        self.get_json(url).await
    }

    /// Next stop on a route; `None` when the route has no remaining stop
    pub async fn next_destination(&self, route_id: &str) -> TrackerResult<Option<Destination>> {
        let url = self.route_endpoint(route_id, &["next-destination"])?;
        debug!(url = %url, "GET");
        let response = self.auth.apply(self.http.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let body = response.bytes().await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }
}

async fn check_status(response: Response) -> TrackerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TrackerError::Transport(format!("API error ({status}): {body}")))
}

#[async_trait]
impl TelemetrySender for FleetApiClient {
    async fn send_batch(&self, batch: &TelemetryBatch) -> TrackerResult<()> {
        let url = self.endpoint(&["v1", "driver-events"])?;
        let response = self
            .auth
            .apply(self.http.post(url))
            .json(batch)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// Body of an open event-stream response
struct ResponseChunks {
    response: Response,
}

#[async_trait]
impl ChunkStream for ResponseChunks {
    async fn next_chunk(&mut self) -> TrackerResult<Option<Vec<u8>>> {
        let chunk = self.response.chunk().await?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}

#[async_trait]
impl StreamTransport for FleetApiClient {
    async fn open(&self, route_id: &str) -> TrackerResult<Box<dyn ChunkStream>> {
        let url = self.route_endpoint(route_id, &["events", "stream"])?;
        let response = self
            .auth
            .apply(self.stream_http.get(url))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(Box::new(ResponseChunks { response }))
    }
}
