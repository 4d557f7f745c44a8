//! Integration tests for spatial aggregation
//!
//! These tests verify:
//! - Recency and route-scope visibility
//! - Grid clustering and heat output
//! - Coalescing of scheduled recomputes

use super::*;
use crate::geo::GeoPoint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_000_000;

fn filters() -> ViewFilters {
    ViewFilters::default()
}

#[test]
fn test_recency_window_controls_visibility() {
    let mut cache = PositionCache::new();
    cache.upsert("fresh", GeoPoint::new(1.0, 1.0), NOW - 50_000);
    cache.upsert("edge", GeoPoint::new(1.0, 1.0), NOW - 60_000);
    cache.upsert("stale", GeoPoint::new(1.0, 1.0), NOW - 70_000);

    let frame = SpatialAggregator::default().recompute(&cache, &filters(), NOW);

    assert!(frame.marker("fresh").unwrap().visible);
    assert!(frame.marker("edge").unwrap().visible);
    assert!(!frame.marker("stale").unwrap().visible);
    assert_eq!(frame.visible_count(), 2);
    // Stale markers stay in the cache and the frame
    assert_eq!(frame.markers.len(), 3);
}

#[test]
fn test_route_only_hides_non_members() {
    let mut cache = PositionCache::new();
    cache.upsert("member", GeoPoint::new(1.0, 1.0), NOW);
    cache.upsert("other", GeoPoint::new(2.0, 2.0), NOW);
    cache.mark_route_member("member");

    let aggregator = SpatialAggregator::default();
    let all = aggregator.recompute(&cache, &filters(), NOW);
    assert_eq!(all.visible_count(), 2);

    let scoped = ViewFilters {
        route_only: true,
        ..filters()
    };
    let frame = aggregator.recompute(&cache, &scoped, NOW);
    assert!(frame.marker("member").unwrap().visible);
    assert!(!frame.marker("other").unwrap().visible);
}

#[test]
fn test_nearby_markers_share_one_cluster() {
    let mut cache = PositionCache::new();
    cache.upsert("a", GeoPoint::new(10.0, 20.0), NOW);
    cache.upsert("b", GeoPoint::new(10.0005, 20.0005), NOW);
    cache.upsert("far", GeoPoint::new(11.0, 21.0), NOW);
    cache.upsert("old", GeoPoint::new(10.0001, 20.0001), NOW - 600_000);

    let f = ViewFilters {
        clustering: true,
        zoom: 8,
        ..filters()
    };
    let frame = SpatialAggregator::default().recompute(&cache, &f, NOW);

    assert_eq!(frame.clusters.len(), 2);
    let pair = frame.clusters.iter().find(|c| c.count == 2).unwrap();
    assert!((pair.centroid.lat - 10.00025).abs() < 1e-9);
    assert!((pair.centroid.lng - 20.00025).abs() < 1e-9);
    assert_eq!(frame.clusters.iter().map(|c| c.count).sum::<usize>(), 3);
}

#[test]
fn test_clusters_and_heat_are_off_by_default() {
    let mut cache = PositionCache::new();
    cache.upsert("a", GeoPoint::new(10.0, 20.0), NOW);

    let frame = SpatialAggregator::default().recompute(&cache, &filters(), NOW);

    assert!(frame.clusters.is_empty());
    assert!(frame.heat.is_empty());
}

#[test]
fn test_heat_discs_decay_with_age() {
    let mut cache = PositionCache::new();
    cache.upsert("new", GeoPoint::new(1.0, 1.0), NOW);
    cache.upsert("half", GeoPoint::new(1.0, 1.0), NOW - 30_000);
    cache.upsert("gone", GeoPoint::new(1.0, 1.0), NOW - 61_000);

    let f = ViewFilters {
        heat: true,
        ..filters()
    };
    let frame = SpatialAggregator::new(150.0).recompute(&cache, &f, NOW);

    assert_eq!(frame.heat.len(), 2);
    let new = frame.heat.iter().find(|h| h.agent_id == "new").unwrap();
    assert_eq!(new.opacity, 0.8);
    assert_eq!(new.radius_m, 150.0);
    let half = frame.heat.iter().find(|h| h.agent_id == "half").unwrap();
    assert!((half.opacity - 0.4).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_coalesces_bursts() {
    let mut scheduler = CoalescingScheduler::new();
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..5 {
        let r = runs.clone();
        scheduler.schedule("recompute", DEBOUNCE_DELAY, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(scheduler.is_pending(&"recompute"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_pending(&"recompute"));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_cancel_and_independent_keys() {
    let mut scheduler = CoalescingScheduler::new();
    let runs = Arc::new(AtomicUsize::new(0));

    for key in ["clusters", "heat"] {
        let r = runs.clone();
        scheduler.schedule(key, Duration::from_millis(350), move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert_eq!(scheduler.pending_count(), 2);
    assert!(scheduler.cancel(&"heat"));
    assert!(!scheduler.cancel(&"heat"));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let r = runs.clone();
    scheduler.schedule("clusters", Duration::from_millis(350), move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.cancel_all();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.pending_count(), 0);
}
