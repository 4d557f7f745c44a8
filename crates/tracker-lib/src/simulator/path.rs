//! Distance-indexed polyline

use crate::geo::GeoPoint;

/// A route polyline with its cumulative distance table
///
/// `cumulative[i]` is the great-circle length from the first point to
/// point `i`, so `cumulative[0] == 0` and the last entry is the total.
#[derive(Debug, Clone, Default)]
pub struct PathTrack {
    points: Vec<GeoPoint>,
    cumulative: Vec<f64>,
}

impl PathTrack {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        let cumulative = cumulative_table(&points);
        Self { points, cumulative }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Total path length in meters
    pub fn total_length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Position `distance` meters along the path.
    ///
    /// Clamps to the endpoints outside `[0, total_length]`. Within a
    /// segment the position is a planar interpolation between its ends.
    /// Returns `None` only for an empty path.
    pub fn interpolate_at(&self, distance: f64) -> Option<GeoPoint> {
        let first = *self.points.first()?;
        let last = *self.points.last()?;
        if self.points.len() == 1 || distance <= 0.0 {
            return Some(first);
        }
        if distance >= self.total_length() {
            return Some(last);
        }

        // First index whose cumulative distance exceeds `distance`
        let upper = self.cumulative.partition_point(|&c| c <= distance);
        let i = upper.saturating_sub(1).min(self.points.len() - 2);

        let seg_len = self.cumulative[i + 1] - self.cumulative[i];
        let frac = if seg_len > 0.0 {
            (distance - self.cumulative[i]) / seg_len
        } else {
            0.0
        };
        Some(self.points[i].lerp(&self.points[i + 1], frac))
    }
}

/// Prefix sums of consecutive haversine distances
pub fn cumulative_table(points: &[GeoPoint]) -> Vec<f64> {
    let mut table = Vec::with_capacity(points.len());
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            total += points[i - 1].distance_m(p);
        }
        table.push(total);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> PathTrack {
        PathTrack::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.01),
            GeoPoint::new(0.01, 0.01),
        ])
    }

    #[test]
    fn test_cumulative_table_is_prefix_sum() {
        let t = track();
        let cum = t.cumulative();
        assert_eq!(cum.len(), 3);
        assert_eq!(cum[0], 0.0);
        let first = GeoPoint::new(0.0, 0.0).distance_m(&GeoPoint::new(0.0, 0.01));
        assert!((cum[1] - first).abs() < 1e-9);
        assert!(cum[2] > cum[1]);
        assert_eq!(t.total_length(), cum[2]);
    }

    #[test]
    fn test_endpoints_and_clamping() {
        let t = track();
        assert_eq!(t.interpolate_at(0.0), Some(GeoPoint::new(0.0, 0.0)));
        assert_eq!(t.interpolate_at(-50.0), Some(GeoPoint::new(0.0, 0.0)));
        assert_eq!(
            t.interpolate_at(t.total_length()),
            Some(GeoPoint::new(0.01, 0.01))
        );
        assert_eq!(t.interpolate_at(1e9), Some(GeoPoint::new(0.01, 0.01)));
    }

    #[test]
    fn test_interpolates_within_segment() {
        let t = track();
        let half = t.cumulative()[1] / 2.0;
        let p = t.interpolate_at(half).unwrap();
        assert!(p.lat.abs() < 1e-12);
        assert!((p.lng - 0.005).abs() < 1e-9);

        // Exactly on an interior vertex
        let v = t.interpolate_at(t.cumulative()[1]).unwrap();
        assert!((v.lng - 0.01).abs() < 1e-12);
        assert!(v.lat.abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_paths() {
        assert_eq!(PathTrack::new(vec![]).interpolate_at(10.0), None);
        assert_eq!(PathTrack::new(vec![]).total_length(), 0.0);

        let single = PathTrack::new(vec![GeoPoint::new(1.0, 2.0)]);
        assert_eq!(single.interpolate_at(100.0), Some(GeoPoint::new(1.0, 2.0)));
        assert_eq!(single.total_length(), 0.0);
    }

    #[test]
    fn test_duplicate_vertices_do_not_divide_by_zero() {
        let t = PathTrack::new(vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 0.01),
        ]);
        let p = t.interpolate_at(t.total_length() / 2.0).unwrap();
        assert!(p.lng.is_finite());
        assert!((p.lng - 0.005).abs() < 1e-9);
    }
}
