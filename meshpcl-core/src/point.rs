//! Point types and related functionality

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with double precision coordinates
pub type Point3d = Point3<f64>;

/// A 3D vector with double precision components
pub type Vector3d = Vector3<f64>;

/// An RGB color with one byte per channel
pub type Rgb = [u8; 3];

/// A point with color information
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColoredPoint3d {
    pub position: Point3d,
    pub color: Rgb,
}

/// A point paired with its unit surface normal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalPoint3d {
    pub position: Point3d,
    pub normal: Vector3d,
}

impl ColoredPoint3d {
    pub fn new(position: Point3d, color: Rgb) -> Self {
        Self { position, color }
    }
}

impl NormalPoint3d {
    pub fn new(position: Point3d, normal: Vector3d) -> Self {
        Self { position, normal }
    }
}

impl Default for ColoredPoint3d {
    fn default() -> Self {
        Self {
            position: Point3d::origin(),
            color: [255, 255, 255],
        }
    }
}

impl Default for NormalPoint3d {
    fn default() -> Self {
        Self {
            position: Point3d::origin(),
            normal: Vector3d::new(0.0, 0.0, 1.0),
        }
    }
}

/// Element type of a point cloud that the processing stages can move and average.
///
/// Color is carried by the element type, so a cloud is either colored on every
/// point or on none of them.
pub trait CloudPoint: Copy + Send + Sync {
    /// Whether points of this type carry a color
    const HAS_COLOR: bool;

    /// Position of the point
    fn position(&self) -> Point3d;

    /// Copy of the point moved to `position`, other attributes unchanged
    fn with_position(&self, position: Point3d) -> Self;

    /// Color of the point, if the type carries one
    fn color(&self) -> Option<Rgb> {
        None
    }

    /// Representative of a non-empty group: mean position and, for colored
    /// points, the rounded mean of each channel
    fn average(group: &[Self]) -> Self;
}

impl CloudPoint for Point3d {
    const HAS_COLOR: bool = false;

    fn position(&self) -> Point3d {
        *self
    }

    fn with_position(&self, position: Point3d) -> Self {
        position
    }

    fn average(group: &[Self]) -> Self {
        mean_position(group.iter().copied())
    }
}

impl CloudPoint for ColoredPoint3d {
    const HAS_COLOR: bool = true;

    fn position(&self) -> Point3d {
        self.position
    }

    fn with_position(&self, position: Point3d) -> Self {
        Self { position, color: self.color }
    }

    fn color(&self) -> Option<Rgb> {
        Some(self.color)
    }

    fn average(group: &[Self]) -> Self {
        let position = mean_position(group.iter().map(|p| p.position));
        let mut sums = [0u64; 3];
        for p in group {
            for (sum, channel) in sums.iter_mut().zip(p.color) {
                *sum += channel as u64;
            }
        }
        let n = group.len().max(1) as f64;
        let color = sums.map(|s| (s as f64 / n).round().clamp(0.0, 255.0) as u8);
        Self { position, color }
    }
}

impl CloudPoint for NormalPoint3d {
    const HAS_COLOR: bool = false;

    fn position(&self) -> Point3d {
        self.position
    }

    fn with_position(&self, position: Point3d) -> Self {
        Self { position, normal: self.normal }
    }

    fn average(group: &[Self]) -> Self {
        let position = mean_position(group.iter().map(|p| p.position));
        let sum = group.iter().fold(Vector3d::zeros(), |acc, p| acc + p.normal);
        let normal = sum.try_normalize(f64::EPSILON).unwrap_or_else(Vector3d::z);
        Self { position, normal }
    }
}

/// Arithmetic mean of a sequence of positions; the origin for an empty sequence
pub fn mean_position<I>(positions: I) -> Point3d
where
    I: IntoIterator<Item = Point3d>,
{
    let mut sum = Vector3d::zeros();
    let mut count = 0usize;
    for p in positions {
        sum += p.coords;
        count += 1;
    }
    if count == 0 {
        return Point3d::origin();
    }
    Point3d::from(sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn colored_average_rounds_channels() {
        let group = [
            ColoredPoint3d::new(Point3d::new(0.0, 0.0, 0.0), [10, 0, 255]),
            ColoredPoint3d::new(Point3d::new(2.0, 0.0, 0.0), [11, 1, 254]),
        ];
        let avg = ColoredPoint3d::average(&group);
        assert_relative_eq!(avg.position.x, 1.0);
        assert_eq!(avg.color, [11, 1, 255]);
    }

    #[test]
    fn plain_average_is_mean() {
        let group = [Point3d::new(1.0, 2.0, 3.0), Point3d::new(3.0, 2.0, 1.0)];
        let avg = Point3d::average(&group);
        assert_relative_eq!(avg, Point3d::new(2.0, 2.0, 2.0));
        assert!(!Point3d::HAS_COLOR);
        assert!(ColoredPoint3d::HAS_COLOR);
    }

    #[test]
    fn with_position_keeps_attributes() {
        let p = ColoredPoint3d::new(Point3d::new(1.0, 1.0, 1.0), [1, 2, 3]);
        let moved = p.with_position(Point3d::origin());
        assert_eq!(moved.color, [1, 2, 3]);
        assert_eq!(moved.position, Point3d::origin());
    }
}
