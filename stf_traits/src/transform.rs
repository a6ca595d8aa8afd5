use bincode::{Decode, Encode};
use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::Mul;
use stf_clock::TfTime;

/// A rigid transform: rotation followed by translation.
///
/// A transform stored for the edge `parent -> child` maps points expressed in the child frame
/// into the parent frame: `p_parent = rotation * p_child + translation`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Transform {
    /// [x, y, z]
    pub translation: [f64; 3],
    /// Unit quaternion [x, y, z, w]
    pub rotation: [f64; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn new(translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self {
            translation,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Roll, pitch, yaw in radians, applied in the usual Z-Y-X order.
    pub fn from_rpy(translation: [f64; 3], roll: f64, pitch: f64, yaw: f64) -> Self {
        let q = DQuat::from_euler(glam::EulerRot::ZYX, yaw, pitch, roll);
        Self {
            translation,
            rotation: q.to_array(),
        }
    }

    #[inline]
    pub fn translation_vec(&self) -> DVec3 {
        DVec3::from_array(self.translation)
    }

    #[inline]
    pub fn rotation_quat(&self) -> DQuat {
        DQuat::from_array(self.rotation)
    }

    pub fn from_glam(translation: DVec3, rotation: DQuat) -> Self {
        Self {
            translation: translation.to_array(),
            rotation: rotation.to_array(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.translation.iter().all(|v| v.is_finite())
            && self.rotation.iter().all(|v| v.is_finite())
    }

    /// Returns a copy with a unit quaternion, or None when the rotation cannot be normalized.
    pub fn normalized(&self) -> Option<Self> {
        if !self.is_finite() {
            return None;
        }
        let q = self.rotation_quat();
        let len = q.length();
        if !len.is_finite() || len < 1e-9 {
            return None;
        }
        Some(Self::from_glam(self.translation_vec(), q / len))
    }

    pub fn inverse(&self) -> Self {
        let inv_rot = self.rotation_quat().inverse();
        let inv_trans = -(inv_rot * self.translation_vec());
        Self::from_glam(inv_trans, inv_rot)
    }

    pub fn transform_point(&self, point: [f64; 3]) -> [f64; 3] {
        (self.rotation_quat() * DVec3::from_array(point) + self.translation_vec()).to_array()
    }

    /// LERP on the translation and SLERP on the rotation.
    ///
    /// `ratio` 0 yields `self`, 1 yields `other`. Ratios above 1 extrapolate along the same motion.
    pub fn interpolate(&self, other: &Transform, ratio: f64) -> Transform {
        let translation = self.translation_vec().lerp(other.translation_vec(), ratio);
        let mut end = other.rotation_quat();
        // take the short way around
        if self.rotation_quat().dot(end) < 0.0 {
            end = -end;
        }
        let rotation = self.rotation_quat().slerp(end, ratio).normalize();
        Transform::from_glam(translation, rotation)
    }
}

/// Composition: `a * b` applies `b` first, so `T_a_b * T_b_c == T_a_c`.
impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        let rot = self.rotation_quat();
        let translation = rot * rhs.translation_vec() + self.translation_vec();
        Transform::from_glam(translation, rot * rhs.rotation_quat())
    }
}

impl Display for Transform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let [x, y, z] = self.translation;
        let [qx, qy, qz, qw] = self.rotation;
        write!(
            f,
            "t=[{x:.6}, {y:.6}, {z:.6}] q=[{qx:.6}, {qy:.6}, {qz:.6}, {qw:.6}]"
        )
    }
}

/// A transform observation between two frames at a given time.
///
/// For lookup results `parent_frame` is the target frame and `child_frame` the source frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct StampedTransform {
    pub transform: Transform,
    pub stamp: TfTime,
    pub parent_frame: String,
    pub child_frame: String,
}

impl StampedTransform {
    pub fn new(
        parent_frame: impl Into<String>,
        child_frame: impl Into<String>,
        stamp: impl Into<TfTime>,
        transform: Transform,
    ) -> Self {
        Self {
            transform,
            stamp: stamp.into(),
            parent_frame: parent_frame.into(),
            child_frame: child_frame.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn assert_transform_eq(a: &Transform, b: &Transform) {
        for i in 0..3 {
            assert_relative_eq!(a.translation[i], b.translation[i], epsilon = 1e-9);
        }
        // q and -q are the same rotation
        let dot = a.rotation_quat().dot(b.rotation_quat()).abs();
        assert_relative_eq!(dot, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let t = Transform::from_rpy([1.0, -2.0, 0.5], 0.1, 0.2, 0.3);
        assert_transform_eq(&(t * t.inverse()), &Transform::identity());
        assert_transform_eq(&(t.inverse() * t), &Transform::identity());
    }

    #[test]
    fn test_compose_order() {
        // world <- robot: robot sits at x=1, yawed 90 degrees
        let world_robot = Transform::from_rpy([1.0, 0.0, 0.0], 0.0, 0.0, FRAC_PI_2);
        // robot <- sensor: sensor sits 1m ahead of the robot
        let robot_sensor = Transform::from_translation([1.0, 0.0, 0.0]);
        let world_sensor = world_robot * robot_sensor;
        let p = world_sensor.transform_point([0.0, 0.0, 0.0]);
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(p[2], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_interpolate_midpoint() {
        let a = Transform::from_translation([0.0, 0.0, 0.0]);
        let b = Transform::from_rpy([2.0, 0.0, 0.0], 0.0, 0.0, FRAC_PI_2);
        let mid = a.interpolate(&b, 0.5);
        assert_relative_eq!(mid.translation[0], 1.0, epsilon = 1e-12);
        let expected = Transform::from_rpy([1.0, 0.0, 0.0], 0.0, 0.0, FRAC_PI_2 / 2.0);
        assert_transform_eq(&mid, &expected);
    }

    #[test]
    fn test_interpolate_endpoints_are_exact() {
        let a = Transform::from_rpy([0.3, 0.2, 0.1], 0.4, 0.0, 0.0);
        let b = Transform::from_rpy([1.0, 2.0, 3.0], 0.0, 0.5, 0.0);
        assert_transform_eq(&a.interpolate(&b, 0.0), &a);
        assert_transform_eq(&a.interpolate(&b, 1.0), &b);
    }

    #[test]
    fn test_normalized_rejects_degenerate_rotation() {
        let zero = Transform::new([0.0; 3], [0.0; 4]);
        assert!(zero.normalized().is_none());
        let nan = Transform::new([f64::NAN, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]);
        assert!(nan.normalized().is_none());
        let scaled = Transform::new([0.0; 3], [0.0, 0.0, 0.0, 2.0]).normalized().unwrap();
        assert_relative_eq!(scaled.rotation[3], 1.0);
    }
}
