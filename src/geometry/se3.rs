//! Rigid-body transform used for camera poses.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

/// Rigid transform `p' = R * p + t`.
///
/// Camera poses produced by the pipeline use the world-to-camera
/// convention: `X_cam = rotation * X_world + translation`, with the world
/// frame fixed to the first camera.
#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a 3x3 matrix that is (numerically close to) a rotation.
    ///
    /// The nearest proper rotation is used, so small orthonormality errors
    /// from SVD-based estimation are absorbed here.
    pub fn from_rotation_matrix(r: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix(r);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            translation: -(rot_inv * self.translation),
            rotation: rot_inv,
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        let mut rotation = self.rotation * other.rotation;
        rotation.renormalize();
        Self {
            rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Camera centre in world coordinates for a world-to-camera pose.
    pub fn camera_center(&self) -> Vector3<f64> {
        -(self.rotation.inverse() * self.translation)
    }

    pub fn is_identity(&self, eps: f64) -> bool {
        self.rotation.angle() <= eps && self.translation.norm() <= eps
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
