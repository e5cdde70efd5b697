//! Sparse 3-D landmarks.

use nalgebra::Vector3;

/// Sequential identifier of a [`MapPoint`], assigned on insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapPointId(pub u64);

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MP{}", self.0)
    }
}

/// A triangulated point. Never updated after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPoint {
    pub id: MapPointId,
    /// Position in the (unscaled) world frame.
    pub position: Vector3<f64>,
    /// Index of the frame whose motion estimate created this point.
    pub frame_index: u64,
}

/// Append-only point cloud.
///
/// Points are never removed, merged or moved, so the length is
/// non-decreasing for the whole session.
#[derive(Debug, Clone, Default)]
pub struct PointMap {
    points: Vec<MapPoint>,
}

impl PointMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append points created by frame `frame_index`; returns how many were added.
    pub fn extend<I>(&mut self, positions: I, frame_index: u64) -> usize
    where
        I: IntoIterator<Item = Vector3<f64>>,
    {
        let before = self.points.len();
        for position in positions {
            let id = MapPointId(self.points.len() as u64);
            self.points.push(MapPoint {
                id,
                position,
                frame_index,
            });
        }
        self.points.len() - before
    }

    pub fn points(&self) -> &[MapPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_assigns_sequential_ids() {
        let mut map = PointMap::new();
        let added = map.extend([Vector3::x(), Vector3::y()], 1);
        map.extend([Vector3::z()], 4);

        assert_eq!(added, 2);
        assert_eq!(map.len(), 3);
        let ids: Vec<_> = map.points().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![MapPointId(0), MapPointId(1), MapPointId(2)]);
        assert_eq!(map.points()[2].frame_index, 4);
    }

    #[test]
    fn test_mappoint_id_display() {
        assert_eq!(format!("{}", MapPointId(12)), "MP12");
    }
}
