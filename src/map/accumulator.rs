//! Composition of relative motions into a global pose, plus map growth.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;
use crate::map::{MapPoint, PointMap};

/// How a relative motion is folded into the accumulated pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseComposition {
    /// `T_new = T_rel ∘ T_old`; points are expressed in the world frame.
    #[default]
    Rigid,
    /// Rotations compose, translations are summed without rotating, and
    /// points are stored in the previous camera's frame. Kept for parity with
    /// recordings produced by earlier front ends.
    LegacyAdditive,
}

/// Owns the accumulated pose and the map.
#[derive(Debug, Clone, Default)]
pub struct PoseAccumulator {
    pose: SE3,
    map: PointMap,
    composition: PoseComposition,
}

impl PoseAccumulator {
    pub fn new(composition: PoseComposition) -> Self {
        Self {
            pose: SE3::identity(),
            map: PointMap::new(),
            composition,
        }
    }

    /// World-to-camera pose of the latest accepted frame.
    pub fn pose(&self) -> &SE3 {
        &self.pose
    }

    pub fn map(&self) -> &[MapPoint] {
        self.map.points()
    }

    pub fn composition(&self) -> PoseComposition {
        self.composition
    }

    /// Fold `relative` (previous camera → current camera) into the pose and
    /// append `points`, given in previous-camera coordinates.
    ///
    /// Returns the number of points appended.
    pub fn accumulate(&mut self, relative: &SE3, points: &[Vector3<f64>], frame_index: u64) -> usize {
        let added = match self.composition {
            PoseComposition::Rigid => {
                let cam_to_world = self.pose.inverse();
                self.map
                    .extend(points.iter().map(|p| cam_to_world.transform_point(p)), frame_index)
            }
            PoseComposition::LegacyAdditive => self.map.extend(points.iter().copied(), frame_index),
        };

        self.pose = match self.composition {
            PoseComposition::Rigid => relative.compose(&self.pose),
            PoseComposition::LegacyAdditive => {
                let mut rotation = relative.rotation * self.pose.rotation;
                rotation.renormalize();
                SE3::new(rotation, self.pose.translation + relative.translation)
            }
        };
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn step() -> SE3 {
        SE3::new(
            UnitQuaternion::from_euler_angles(0.0, 0.2, 0.0),
            Vector3::new(-1.0, 0.0, 0.0),
        )
    }

    #[test]
    fn test_rigid_composition() {
        let mut acc = PoseAccumulator::new(PoseComposition::Rigid);
        acc.accumulate(&step(), &[], 1);
        acc.accumulate(&step(), &[], 2);

        let expected = step().compose(&step());
        assert_relative_eq!(acc.pose().translation, expected.translation, epsilon = 1e-12);
        assert_relative_eq!(acc.pose().rotation.angle(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_rigid_points_land_in_world_frame() {
        let mut acc = PoseAccumulator::new(PoseComposition::Rigid);
        acc.accumulate(&step(), &[], 1);

        // A world point seen from the current camera must map back onto itself.
        let world = Vector3::new(0.5, -0.2, 4.0);
        let in_cam = acc.pose().transform_point(&world);
        acc.accumulate(&step(), &[in_cam], 2);

        assert_relative_eq!(acc.map()[0].position, world, epsilon = 1e-12);
        assert_eq!(acc.map()[0].frame_index, 2);
    }

    #[test]
    fn test_legacy_additive_translation() {
        let mut acc = PoseAccumulator::new(PoseComposition::LegacyAdditive);
        let p = Vector3::new(1.0, 2.0, 3.0);
        acc.accumulate(&step(), &[p], 1);
        acc.accumulate(&step(), &[p], 2);

        assert_relative_eq!(acc.pose().translation, Vector3::new(-2.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(acc.pose().rotation.angle(), 0.4, epsilon = 1e-12);
        assert_relative_eq!(acc.map()[1].position, p, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_stays_unit_after_many_steps() {
        let mut acc = PoseAccumulator::new(PoseComposition::Rigid);
        let small = SE3::new(
            UnitQuaternion::from_euler_angles(0.013, -0.007, 0.021),
            Vector3::new(0.01, 0.0, -0.02),
        );
        for i in 0..5000 {
            acc.accumulate(&small, &[], i);
        }

        assert_relative_eq!(acc.pose().rotation.quaternion().norm(), 1.0, epsilon = 1e-12);
        let r = acc.pose().rotation_matrix();
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
    }
}
