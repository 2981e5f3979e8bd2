//! Point cloud data structures and functionality

use crate::error::{Error, Result};
use crate::point::*;
use crate::transform::Transform3D;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Row/column arrangement of the points of a cloud
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CloudLayout {
    /// A flat list: height is 1 and width equals the point count
    #[default]
    Unorganized,
    /// An image-like grid, as produced by depth sensors
    Organized { width: usize, height: usize },
}

/// A generic point cloud container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointCloud<T> {
    pub points: Vec<T>,
    layout: CloudLayout,
}

/// A point cloud with 3D points
pub type PointCloud3d = PointCloud<Point3d>;

/// A point cloud with colored points
pub type ColoredPointCloud3d = PointCloud<ColoredPoint3d>;

/// A point cloud of positions with unit normals
pub type OrientedCloud = PointCloud<NormalPoint3d>;

impl<T> PointCloud<T> {
    /// Create a new empty point cloud
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            layout: CloudLayout::Unorganized,
        }
    }

    /// Create a new point cloud with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            layout: CloudLayout::Unorganized,
        }
    }

    /// Create an unorganized point cloud from a vector of points
    pub fn from_points(points: Vec<T>) -> Self {
        Self {
            points,
            layout: CloudLayout::Unorganized,
        }
    }

    /// Create an organized cloud; `width * height` must equal the point count
    pub fn organized(points: Vec<T>, width: usize, height: usize) -> Result<Self> {
        if width.checked_mul(height) != Some(points.len()) {
            return Err(Error::InvalidData(format!(
                "organized layout {}x{} does not match {} points",
                width,
                height,
                points.len()
            )));
        }
        Ok(Self {
            points,
            layout: CloudLayout::Organized { width, height },
        })
    }

    /// Get the number of points in the cloud
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn layout(&self) -> CloudLayout {
        self.layout
    }

    pub fn is_organized(&self) -> bool {
        matches!(self.layout, CloudLayout::Organized { .. })
    }

    /// Width of the layout; the point count for unorganized clouds
    pub fn width(&self) -> usize {
        match self.layout {
            CloudLayout::Organized { width, .. } => width,
            CloudLayout::Unorganized => self.points.len(),
        }
    }

    /// Height of the layout; 1 for unorganized clouds
    pub fn height(&self) -> usize {
        match self.layout {
            CloudLayout::Organized { height, .. } => height,
            CloudLayout::Unorganized => 1,
        }
    }

    /// Add a point to the cloud. An organized cloud becomes unorganized.
    pub fn push(&mut self, point: T) {
        self.points.push(point);
        self.layout = CloudLayout::Unorganized;
    }

    /// Get an iterator over the points
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.points.iter()
    }

    /// Build a cloud of the same length and layout by mapping every point
    pub fn map<U, F>(&self, f: F) -> PointCloud<U>
    where
        F: FnMut(&T) -> U,
    {
        PointCloud {
            points: self.points.iter().map(f).collect(),
            layout: self.layout,
        }
    }
}

impl<T: CloudPoint> PointCloud<T> {
    /// Positions of all points, in order
    pub fn positions(&self) -> Vec<Point3d> {
        self.points.iter().map(CloudPoint::position).collect()
    }

    /// Arithmetic mean of all positions, `None` for an empty cloud
    pub fn centroid(&self) -> Option<Point3d> {
        if self.points.is_empty() {
            return None;
        }
        Some(mean_position(self.points.iter().map(CloudPoint::position)))
    }

    /// Axis-aligned bounding box as `(min, max)`, `None` for an empty cloud
    pub fn bounding_box(&self) -> Option<(Point3d, Point3d)> {
        bounding_box(self.points.iter().map(CloudPoint::position))
    }

    /// Apply a transformation to the positions, keeping the other attributes
    pub fn transformed(&self, transform: &Transform3D) -> Self {
        self.map(|p| p.with_position(transform.transform_point(&p.position())))
    }
}

/// Axis-aligned bounding box of a sequence of positions
pub fn bounding_box<I>(positions: I) -> Option<(Point3d, Point3d)>
where
    I: IntoIterator<Item = Point3d>,
{
    let mut iter = positions.into_iter();
    let first = iter.next()?;
    let (mut min, mut max) = (first, first);
    for p in iter {
        min = min.inf(&p);
        max = max.sup(&p);
    }
    Some((min, max))
}

impl<T> Default for PointCloud<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for PointCloud<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<T> IntoIterator for PointCloud<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a PointCloud<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl<T> FromIterator<T> for PointCloud<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_points(Vec::from_iter(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn unorganized_layout_follows_len() {
        let mut cloud = PointCloud::from_points(vec![Point3d::origin(); 4]);
        assert_eq!((cloud.width(), cloud.height()), (4, 1));
        cloud.push(Point3d::new(1.0, 0.0, 0.0));
        assert_eq!(cloud.width() * cloud.height(), cloud.len());
    }

    #[test]
    fn organized_layout_is_checked() {
        let points = vec![Point3d::origin(); 6];
        let cloud = PointCloud::organized(points.clone(), 3, 2).unwrap();
        assert!(cloud.is_organized());
        assert_eq!((cloud.width(), cloud.height()), (3, 2));
        assert!(matches!(
            PointCloud::organized(points, 4, 2),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn push_drops_organization() {
        let mut cloud = PointCloud::organized(vec![Point3d::origin(); 4], 2, 2).unwrap();
        cloud.push(Point3d::origin());
        assert!(!cloud.is_organized());
        assert_eq!(cloud.width(), 5);
    }

    #[test]
    fn centroid_and_bounds() {
        let cloud = PointCloud::from_points(vec![
            Point3d::new(-1.0, 0.0, 2.0),
            Point3d::new(3.0, 4.0, 0.0),
        ]);
        assert_relative_eq!(cloud.centroid().unwrap(), Point3d::new(1.0, 2.0, 1.0));
        let (min, max) = cloud.bounding_box().unwrap();
        assert_relative_eq!(min, Point3d::new(-1.0, 0.0, 0.0));
        assert_relative_eq!(max, Point3d::new(3.0, 4.0, 2.0));
        assert!(PointCloud::<Point3d>::new().centroid().is_none());
    }
}
