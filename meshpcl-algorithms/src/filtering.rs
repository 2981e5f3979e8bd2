//! Filtering algorithms

use meshpcl_core::{CloudPoint, Error, PointCloud, Result};
use std::collections::HashMap;
use tracing::debug;

/// Voxel grid filtering
///
/// This algorithm reduces the density of a point cloud by grouping points into
/// cubic cells of edge `leaf_size` and replacing the points of every occupied
/// cell with their mean (position, and rounded color for colored clouds).
///
/// The lattice is aligned to the origin: a point `p` falls in cell
/// `floor(p / leaf_size)`. A cell mean always lies inside its cell, so running
/// the filter twice with the same leaf size keeps the point count, and leaf
/// sizes that are integer multiples of each other give non-increasing counts.
/// Other pairs of leaf sizes do not nest, so a coarser leaf can split points
/// a finer one merged: `(1.1, 0, 0)` and `(1.3, 0, 0)` share a cell at leaf
/// `1.0` but straddle the boundary at `1.2` when the leaf is `1.2`.
/// Output points appear in the order in which their cells were first occupied.
///
/// # Arguments
/// * `cloud` - Input point cloud
/// * `leaf_size` - Edge length of each cell, finite and positive
///
/// # Returns
/// * `Result<PointCloud<T>>` - Unorganized downsampled cloud
///
/// # Example
/// ```rust
/// use meshpcl_core::{PointCloud, Point3d};
/// use meshpcl_algorithms::voxel_grid_filter;
///
/// fn main() -> meshpcl_core::Result<()> {
///     let cloud = PointCloud::from_points(vec![
///         Point3d::new(0.0, 0.0, 0.0),
///         Point3d::new(0.1, 0.0, 0.0),
///         Point3d::new(0.0, 0.1, 0.0),
///         Point3d::new(0.5, 0.5, 0.5),
///     ]);
///
///     let filtered = voxel_grid_filter(&cloud, 0.2)?;
///     assert_eq!(filtered.len(), 2);
///     Ok(())
/// }
/// ```
pub fn voxel_grid_filter<T: CloudPoint>(cloud: &PointCloud<T>, leaf_size: f64) -> Result<PointCloud<T>> {
    if !(leaf_size.is_finite() && leaf_size > 0.0) {
        return Err(Error::config(format!(
            "voxel leaf size must be positive and finite, got {}",
            leaf_size
        )));
    }
    let (min, max) = cloud
        .bounding_box()
        .ok_or_else(|| Error::degenerate("cannot downsample an empty cloud"))?;

    let inverse_leaf = 1.0 / leaf_size;
    let cell_of = |v: f64| (v * inverse_leaf).floor();

    // Cell counts per axis must fit a 32-bit index, as for any dense voxel grid
    for axis in 0..3 {
        if !(min[axis].is_finite() && max[axis].is_finite()) {
            return Err(Error::InvalidData("cloud has non-finite coordinates".to_string()));
        }
        let cells = cell_of(max[axis]) - cell_of(min[axis]) + 1.0;
        if cells > i32::MAX as f64 {
            return Err(Error::config(format!(
                "leaf size {} is too small for an extent of {} along axis {}",
                leaf_size,
                max[axis] - min[axis],
                axis
            )));
        }
    }

    let mut slots: HashMap<[i64; 3], usize> = HashMap::new();
    let mut groups: Vec<Vec<T>> = Vec::new();
    for point in cloud.iter() {
        let p = point.position();
        let key = [cell_of(p.x) as i64, cell_of(p.y) as i64, cell_of(p.z) as i64];
        let slot = *slots.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(*point);
    }

    let points: Vec<T> = groups.iter().map(|group| T::average(group)).collect();
    debug!(
        input = cloud.len(),
        output = points.len(),
        leaf_size,
        "voxel grid filter"
    );
    Ok(PointCloud::from_points(points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use meshpcl_core::{ColoredPoint3d, Point3d};
    use proptest::prelude::*;

    #[test]
    fn rejects_bad_leaf_sizes() {
        let cloud = PointCloud::from_points(vec![Point3d::origin()]);
        for leaf in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(voxel_grid_filter(&cloud, leaf), Err(Error::Config(_))));
        }
    }

    #[test]
    fn empty_cloud_is_degenerate() {
        let cloud = PointCloud::<Point3d>::new();
        assert!(matches!(
            voxel_grid_filter(&cloud, 1.0),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn tiny_leaf_over_large_extent_is_rejected() {
        let cloud = PointCloud::from_points(vec![Point3d::origin(), Point3d::new(1.0e6, 0.0, 0.0)]);
        assert!(matches!(voxel_grid_filter(&cloud, 1.0e-6), Err(Error::Config(_))));
    }

    #[test]
    fn averages_points_per_cell_in_first_seen_order() {
        let cloud = PointCloud::from_points(vec![
            Point3d::new(1.2, 0.1, 0.1),
            Point3d::new(0.1, 0.1, 0.1),
            Point3d::new(1.4, 0.3, 0.1),
            Point3d::new(0.3, 0.1, 0.1),
        ]);
        let out = voxel_grid_filter(&cloud, 1.0).unwrap();
        assert_eq!(out.len(), 2);
        assert_relative_eq!(out[0], Point3d::new(1.3, 0.2, 0.1), epsilon = 1e-12);
        assert_relative_eq!(out[1], Point3d::new(0.2, 0.1, 0.1), epsilon = 1e-12);
    }

    #[test]
    fn colored_cells_get_rounded_mean_color() {
        let cloud = PointCloud::from_points(vec![
            ColoredPoint3d::new(Point3d::new(0.1, 0.1, 0.1), [0, 100, 255]),
            ColoredPoint3d::new(Point3d::new(0.2, 0.2, 0.2), [1, 101, 255]),
        ]);
        let out = voxel_grid_filter(&cloud, 0.5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].color, [1, 101, 255]);
    }

    #[test]
    fn negative_coordinates_use_floor_cells() {
        let cloud = PointCloud::from_points(vec![Point3d::new(-0.1, 0.0, 0.0), Point3d::new(0.1, 0.0, 0.0)]);
        assert_eq!(voxel_grid_filter(&cloud, 1.0).unwrap().len(), 2);
    }

    #[test]
    fn non_nested_leaf_sizes_are_not_monotone() {
        let cloud = PointCloud::from_points(vec![Point3d::new(1.1, 0.0, 0.0), Point3d::new(1.3, 0.0, 0.0)]);
        assert_eq!(voxel_grid_filter(&cloud, 1.0).unwrap().len(), 1);
        assert_eq!(voxel_grid_filter(&cloud, 1.2).unwrap().len(), 2);
    }

    fn cloud_strategy() -> impl Strategy<Value = PointCloud<Point3d>> {
        prop::collection::vec((-5.0f64..5.0, -5.0f64..5.0, -5.0f64..5.0), 1..400).prop_map(|v| {
            PointCloud::from_points(v.into_iter().map(|(x, y, z)| Point3d::new(x, y, z)).collect())
        })
    }

    proptest! {
        #[test]
        fn coarser_nested_leaf_never_adds_points(
            cloud in cloud_strategy(),
            leaf in 0.05f64..2.0,
            factor in 2u32..5,
        ) {
            let fine = voxel_grid_filter(&cloud, leaf).unwrap();
            let coarse = voxel_grid_filter(&cloud, leaf * factor as f64).unwrap();
            prop_assert!(coarse.len() <= fine.len());
            prop_assert!(fine.len() <= cloud.len());
        }

        #[test]
        fn downsampling_is_idempotent(cloud in cloud_strategy(), leaf in 0.05f64..2.0) {
            let once = voxel_grid_filter(&cloud, leaf).unwrap();
            let twice = voxel_grid_filter(&once, leaf).unwrap();
            prop_assert_eq!(once.len(), twice.len());
        }

        #[test]
        fn output_is_deterministic(cloud in cloud_strategy(), leaf in 0.05f64..2.0) {
            let a = voxel_grid_filter(&cloud, leaf).unwrap();
            let b = voxel_grid_filter(&cloud, leaf).unwrap();
            prop_assert_eq!(a.points, b.points);
        }
    }
}
