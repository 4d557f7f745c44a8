//! Last-known position per agent

use crate::geo::GeoPoint;
use crate::models::LatestPosition;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Last observed position of one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerState {
    pub agent_id: String,
    pub position: GeoPoint,
    /// Unix milliseconds of the last observation
    pub last_seen_at: i64,
}

/// One entry per agent ever observed, plus which agents belong to the
/// currently scoped route.
///
/// Entries are never removed; stale agents drop out of view through the
/// recency filter instead.
#[derive(Debug, Clone, Default)]
pub struct PositionCache {
    markers: HashMap<String, MarkerState>,
    route_members: HashSet<String>,
}

impl PositionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position observed at `at_ms`
    pub fn upsert(&mut self, agent_id: &str, position: GeoPoint, at_ms: i64) {
        match self.markers.get_mut(agent_id) {
            Some(marker) => {
                marker.position = position;
                marker.last_seen_at = at_ms;
            }
            None => {
                self.markers.insert(
                    agent_id.to_string(),
                    MarkerState {
                        agent_id: agent_id.to_string(),
                        position,
                        last_seen_at: at_ms,
                    },
                );
            }
        }
    }

    /// Load the latest positions for a route, making each agent a member
    ///
    /// `observed_at_ms` is when the positions were recorded. A marker that
    /// was already seen later keeps its newer position.
    pub fn seed(&mut self, positions: &[LatestPosition], observed_at_ms: i64) {
        for p in positions {
            let newer = self
                .markers
                .get(&p.driver_id)
                .is_some_and(|m| m.last_seen_at > observed_at_ms);
            if !newer {
                self.upsert(&p.driver_id, GeoPoint::new(p.lat, p.lng), observed_at_ms);
            }
            self.mark_route_member(&p.driver_id);
        }
    }

    pub fn mark_route_member(&mut self, agent_id: &str) {
        if !self.route_members.contains(agent_id) {
            self.route_members.insert(agent_id.to_string());
        }
    }

    pub fn is_route_member(&self, agent_id: &str) -> bool {
        self.route_members.contains(agent_id)
    }

    /// Forget route membership when switching routes
    pub fn reset_route_members(&mut self) {
        self.route_members.clear();
    }

    pub fn get(&self, agent_id: &str) -> Option<&MarkerState> {
        self.markers.get(agent_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerState> {
        self.markers.values()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Agent ids in sorted order
    pub fn known_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markers.keys().cloned().collect();
        ids.sort();
        ids
    }
}
