//! Spatial aggregation for the live view
//!
//! This module decides what a map should draw:
//! - Position cache with route membership
//! - Recency and route visibility, grid clusters, heat decay
//! - Coalescing scheduler for debounced recomputes

mod aggregator;
mod cache;
mod scheduler;

#[cfg(test)]
mod tests;

pub use aggregator::{
    cell_size, debounce_delay, heat_opacity, ClusterCell, HeatDisc, MarkerView, RenderFrame,
    SpatialAggregator, ViewFilters, BASE_CELL_SIZE_DEG, BUSY_DEBOUNCE_DELAY,
    BUSY_MARKER_THRESHOLD, DEBOUNCE_DELAY, DEFAULT_HEAT_RADIUS_M, DEFAULT_RECENCY_WINDOW,
    HEAT_MAX_OPACITY, HEAT_MIN_OPACITY, MIN_CELL_SIZE_DEG,
};
pub use cache::{MarkerState, PositionCache};
pub use scheduler::CoalescingScheduler;
