//! Visibility, grid clustering and heat decay
//!
//! Every recompute rebuilds the whole frame from the position cache; no
//! state is carried between passes.

use super::cache::PositionCache;
use crate::geo::GeoPoint;
use crate::observability::TrackerMetrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Smallest grid cell, in degrees
pub const MIN_CELL_SIZE_DEG: f64 = 0.002;
/// Grid cell at zoom 0, in degrees
pub const BASE_CELL_SIZE_DEG: f64 = 0.5;

pub const HEAT_MAX_OPACITY: f64 = 0.8;
pub const HEAT_MIN_OPACITY: f64 = 0.15;
pub const DEFAULT_HEAT_RADIUS_M: f64 = 120.0;

pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(60);

pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(350);
pub const BUSY_DEBOUNCE_DELAY: Duration = Duration::from_millis(700);
/// Above this many markers the longer debounce applies
pub const BUSY_MARKER_THRESHOLD: usize = 200;

/// User-controlled view filters and viewport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewFilters {
    /// Only show agents belonging to the scoped route
    pub route_only: bool,
    pub clustering: bool,
    pub heat: bool,
    pub recency_window_secs: u64,
    pub zoom: u8,
}

impl Default for ViewFilters {
    fn default() -> Self {
        Self {
            route_only: false,
            clustering: false,
            heat: false,
            recency_window_secs: DEFAULT_RECENCY_WINDOW.as_secs(),
            zoom: 12,
        }
    }
}

impl ViewFilters {
    pub fn recency_window_ms(&self) -> i64 {
        self.recency_window_secs as i64 * 1000
    }

    /// Filters whose output decays with time alone need periodic refresh
    pub fn needs_periodic_refresh(&self) -> bool {
        self.heat || self.route_only
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerView {
    pub agent_id: String,
    pub position: GeoPoint,
    pub age_ms: i64,
    pub visible: bool,
}

/// A grid bucket of visible markers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCell {
    pub cell: (i64, i64),
    pub count: usize,
    pub centroid: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatDisc {
    pub agent_id: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    pub opacity: f64,
}

/// Everything a renderer needs for one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderFrame {
    pub computed_at: i64,
    pub zoom: u8,
    /// Sorted by agent id
    pub markers: Vec<MarkerView>,
    pub clusters: Vec<ClusterCell>,
    pub heat: Vec<HeatDisc>,
}

impl RenderFrame {
    pub fn visible_count(&self) -> usize {
        self.markers.iter().filter(|m| m.visible).count()
    }

    pub fn marker(&self, agent_id: &str) -> Option<&MarkerView> {
        self.markers.iter().find(|m| m.agent_id == agent_id)
    }
}

/// Grid cell edge for a zoom level: `max(0.002, 0.5 / 2^zoom)` degrees
pub fn cell_size(zoom: u8) -> f64 {
    (BASE_CELL_SIZE_DEG / 2f64.powi(zoom as i32)).max(MIN_CELL_SIZE_DEG)
}

/// Heat disc opacity for a marker `age_ms` old
///
/// 0.8 when fresh, decaying linearly, never below 0.15.
pub fn heat_opacity(age_ms: i64, window_ms: i64) -> f64 {
    if window_ms <= 0 {
        return HEAT_MIN_OPACITY;
    }
    let age = age_ms.max(0) as f64;
    (HEAT_MAX_OPACITY * (1.0 - age / window_ms as f64)).max(HEAT_MIN_OPACITY)
}

/// Coalescing delay for a cache of `marker_count` markers
pub fn debounce_delay(marker_count: usize) -> Duration {
    if marker_count > BUSY_MARKER_THRESHOLD {
        BUSY_DEBOUNCE_DELAY
    } else {
        DEBOUNCE_DELAY
    }
}

#[derive(Default)]
struct Bucket {
    count: usize,
    lat_sum: f64,
    lng_sum: f64,
}

/// Turns a position cache into a `RenderFrame`
#[derive(Clone)]
pub struct SpatialAggregator {
    heat_radius_m: f64,
    metrics: TrackerMetrics,
}

impl Default for SpatialAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HEAT_RADIUS_M)
    }
}

impl SpatialAggregator {
    pub fn new(heat_radius_m: f64) -> Self {
        Self {
            heat_radius_m,
            metrics: TrackerMetrics::new(),
        }
    }

    pub fn recompute(&self, cache: &PositionCache, filters: &ViewFilters, now_ms: i64) -> RenderFrame {
        let started = Instant::now();
        let window = filters.recency_window_ms();

        let mut markers: Vec<MarkerView> = cache
            .iter()
            .map(|m| {
                let age_ms = now_ms - m.last_seen_at;
                let recent = age_ms <= window;
                let in_scope = !filters.route_only || cache.is_route_member(&m.agent_id);
                MarkerView {
                    agent_id: m.agent_id.clone(),
                    position: m.position,
                    age_ms,
                    visible: recent && in_scope,
                }
            })
            .collect();
        markers.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        let clusters = if filters.clustering {
            cluster(&markers, cell_size(filters.zoom))
        } else {
            Vec::new()
        };

        let heat = if filters.heat {
            markers
                .iter()
                .filter(|m| m.visible)
                .map(|m| HeatDisc {
                    agent_id: m.agent_id.clone(),
                    center: m.position,
                    radius_m: self.heat_radius_m,
                    opacity: heat_opacity(m.age_ms, window),
                })
                .collect()
        } else {
            Vec::new()
        };

        let frame = RenderFrame {
            computed_at: now_ms,
            zoom: filters.zoom,
            markers,
            clusters,
            heat,
        };

        self.metrics
            .observe_recompute_latency(started.elapsed().as_secs_f64());
        self.metrics
            .set_render_counts(frame.visible_count() as i64, frame.clusters.len() as i64);
        frame
    }
}

fn cluster(markers: &[MarkerView], cell: f64) -> Vec<ClusterCell> {
    let mut buckets: BTreeMap<(i64, i64), Bucket> = BTreeMap::new();
    for m in markers.iter().filter(|m| m.visible) {
        let key = (
            (m.position.lat / cell).floor() as i64,
            (m.position.lng / cell).floor() as i64,
        );
        let b = buckets.entry(key).or_default();
        b.count += 1;
        b.lat_sum += m.position.lat;
        b.lng_sum += m.position.lng;
    }

    buckets
        .into_iter()
        .map(|(cell, b)| ClusterCell {
            cell,
            count: b.count,
            centroid: GeoPoint::new(b.lat_sum / b.count as f64, b.lng_sum / b.count as f64),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_size_shrinks_with_zoom_to_floor() {
        assert_eq!(cell_size(0), 0.5);
        assert_eq!(cell_size(1), 0.25);
        assert_eq!(cell_size(7), 0.5 / 128.0);
        assert_eq!(cell_size(8), MIN_CELL_SIZE_DEG);
        assert_eq!(cell_size(10), MIN_CELL_SIZE_DEG);
        assert_eq!(cell_size(18), MIN_CELL_SIZE_DEG);
    }

    #[test]
    fn test_heat_opacity_bounds() {
        assert_eq!(heat_opacity(0, 60_000), 0.8);
        assert!((heat_opacity(30_000, 60_000) - 0.4).abs() < 1e-12);
        assert_eq!(heat_opacity(60_000, 60_000), HEAT_MIN_OPACITY);
        assert_eq!(heat_opacity(120_000, 60_000), HEAT_MIN_OPACITY);
        assert_eq!(heat_opacity(-500, 60_000), 0.8);
    }

    #[test]
    fn test_debounce_extends_when_busy() {
        assert_eq!(debounce_delay(0), Duration::from_millis(350));
        assert_eq!(debounce_delay(200), Duration::from_millis(350));
        assert_eq!(debounce_delay(201), Duration::from_millis(700));
    }
}
