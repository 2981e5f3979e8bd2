//! 3D transformation utilities

use crate::point::{Point3d, Vector3d};
use nalgebra::{Isometry3, Matrix4, UnitQuaternion};
use serde::{Deserialize, Serialize};

/// A 3D transformation that can be applied to points and point clouds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f64>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3d) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a rotation transformation from a quaternion
    pub fn rotation(rotation: UnitQuaternion<f64>) -> Self {
        Self {
            matrix: rotation.to_homogeneous(),
        }
    }

    /// Translation part of the transformation
    pub fn translation_part(&self) -> Vector3d {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Apply the transformation to a point
    pub fn transform_point(&self, point: &Point3d) -> Point3d {
        let homogeneous = self.matrix * point.to_homogeneous();
        Point3d::from_homogeneous(homogeneous).unwrap_or(*point)
    }

    /// Apply the transformation to a vector
    pub fn transform_vector(&self, vector: &Vector3d) -> Vector3d {
        self.matrix.fixed_view::<3, 3>(0, 0) * vector
    }

    /// Compose this transformation with another; `other` is applied first
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Get the inverse transformation
    pub fn inverse(self) -> Option<Self> {
        self.matrix.try_inverse().map(|matrix| Self { matrix })
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Isometry3<f64>> for Transform3D {
    fn from(isometry: Isometry3<f64>) -> Self {
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn translation_round_trip() {
        let t = Transform3D::translation(Vector3d::new(1.0, -2.0, 3.0));
        let p = t.transform_point(&Point3d::new(0.5, 0.5, 0.5));
        assert_relative_eq!(p, Point3d::new(1.5, -1.5, 3.5));
        let back = t.inverse().unwrap().transform_point(&p);
        assert_relative_eq!(back, Point3d::new(0.5, 0.5, 0.5), epsilon = 1e-12);
        assert_relative_eq!(t.translation_part(), Vector3d::new(1.0, -2.0, 3.0));
    }

    #[test]
    fn vectors_ignore_translation() {
        let t = Transform3D::translation(Vector3d::new(5.0, 5.0, 5.0));
        assert_relative_eq!(t.transform_vector(&Vector3d::x()), Vector3d::x());
    }

    #[test]
    fn compose_applies_right_first() {
        let rot = Transform3D::rotation(UnitQuaternion::from_axis_angle(
            &Vector3d::z_axis(),
            std::f64::consts::FRAC_PI_2,
        ));
        let shift = Transform3D::translation(Vector3d::new(1.0, 0.0, 0.0));
        let p = (rot * shift).transform_point(&Point3d::origin());
        assert_relative_eq!(p, Point3d::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }
}
