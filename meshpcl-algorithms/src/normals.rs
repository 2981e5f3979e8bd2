//! Normal estimation algorithms
//!
//! Normals are the eigenvector of the smallest eigenvalue of the covariance of
//! each point's `k` nearest neighbors (the point itself included). Covariance
//! alone leaves the sign open, so every normal is flipped according to a
//! [`NormalOrientation`] policy.

use crate::nearest_neighbor::KdTree;
use crate::parallel::{WorkerPool, WorkerPoolConfig, DEFAULT_WORKERS};
use meshpcl_core::{
    CloudLayout, CloudPoint, Error, Matrix3, NormalPoint3d, OrientedCloud, Point3d, PointCloud,
    Result, Vector3d,
};
use nalgebra::SymmetricEigen;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Relative tolerance under which two eigenvalues count as equal
const EIGEN_TIE_TOLERANCE: f64 = 1e-12;

/// How the sign of each estimated normal is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum NormalOrientation {
    /// Point away from the centroid of the whole cloud
    #[default]
    AwayFromCentroid,
    /// Point toward a sensor position
    TowardViewpoint(Point3d),
    /// Agree with a fixed direction
    Reference(Vector3d),
}

/// Configuration for normal estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalConfig {
    /// Neighborhood size, including the point itself
    pub k: usize,
    /// Sign policy
    pub orientation: NormalOrientation,
    /// Worker threads (clamped to 3..=8)
    pub workers: usize,
}

impl Default for NormalConfig {
    fn default() -> Self {
        Self {
            k: 10,
            orientation: NormalOrientation::AwayFromCentroid,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl NormalConfig {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_orientation(mut self, orientation: NormalOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.k < 3 {
            return Err(Error::config(format!(
                "normal estimation needs k >= 3 neighbors, got {}",
                self.k
            )));
        }
        if let NormalOrientation::Reference(direction) = self.orientation {
            if !(direction.norm() > 0.0) {
                return Err(Error::config("orientation reference direction must be non-zero"));
            }
        }
        Ok(())
    }
}

/// Per-point normal estimator backed by a KD-tree and a bounded worker pool
#[derive(Debug)]
pub struct NormalEstimator {
    config: NormalConfig,
    pool: WorkerPool,
}

impl NormalEstimator {
    /// Validate the configuration and create the worker pool
    pub fn new(config: NormalConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(
            &WorkerPoolConfig::default()
                .with_workers(config.workers)
                .with_thread_name_prefix("meshpcl-normals"),
        )?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &NormalConfig {
        &self.config
    }

    /// Estimate one unit normal per point, in input order
    ///
    /// # Arguments
    /// * `cloud` - Positions (colors, if any, are not carried over)
    ///
    /// # Returns
    /// * `Result<OrientedCloud>` - Same length and layout as the input
    pub fn estimate<T: CloudPoint>(&self, cloud: &PointCloud<T>) -> Result<OrientedCloud> {
        if cloud.len() < 3 {
            return Err(Error::degenerate(format!(
                "normal estimation needs at least 3 points, got {}",
                cloud.len()
            )));
        }

        let positions = cloud.positions();
        let tree = KdTree::build(&positions)?;
        let k = self.config.k;
        let centroid = cloud.centroid().unwrap_or_else(Point3d::origin);
        let orientation = self.config.orientation;

        let points: Vec<NormalPoint3d> = self.pool.map(&positions, |p| {
            let neighborhood: Vec<Point3d> = tree
                .k_nearest(p, k)
                .iter()
                .map(|n| positions[n.index])
                .collect();
            let normal = local_plane_normal(&neighborhood);
            NormalPoint3d::new(*p, orient(normal, p, &centroid, orientation))
        });

        debug!(
            workers = self.pool.workers(),
            k,
            "estimated normals"
        );
        info!(points = points.len(), "normal estimation complete");

        match cloud.layout() {
            CloudLayout::Organized { width, height } => PointCloud::organized(points, width, height),
            CloudLayout::Unorganized => Ok(PointCloud::from_points(points)),
        }
    }
}

/// Estimate normals with default settings and neighborhood size `k`
pub fn estimate_normals<T: CloudPoint>(cloud: &PointCloud<T>, k: usize) -> Result<OrientedCloud> {
    NormalEstimator::new(NormalConfig::default().with_k(k))?.estimate(cloud)
}

/// Unoriented unit normal of the best-fit plane through `neighborhood`
///
/// Eigenvalue ties (coplanar or collinear neighborhoods) resolve to the lowest
/// eigen index, so the result is deterministic.
pub fn local_plane_normal(neighborhood: &[Point3d]) -> Vector3d {
    let n = neighborhood.len().max(1) as f64;
    let mean = neighborhood
        .iter()
        .fold(Vector3d::zeros(), |acc, p| acc + p.coords)
        / n;

    let mut covariance = Matrix3::zeros();
    for p in neighborhood {
        let d = p.coords - mean;
        covariance += d * d.transpose();
    }
    covariance /= n;

    let eigen = SymmetricEigen::new(covariance);
    let values = eigen.eigenvalues;
    let scale = values.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    let smallest = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let chosen = (0..3)
        .find(|&i| values[i] <= smallest + EIGEN_TIE_TOLERANCE * scale)
        .unwrap_or(0);

    let v: Vector3d = eigen.eigenvectors.column(chosen).into_owned();
    v.try_normalize(f64::EPSILON).unwrap_or_else(Vector3d::z)
}

/// Flip `normal` according to the orientation policy
fn orient(normal: Vector3d, p: &Point3d, centroid: &Point3d, policy: NormalOrientation) -> Vector3d {
    let reference = match policy {
        NormalOrientation::AwayFromCentroid => p - centroid,
        NormalOrientation::TowardViewpoint(viewpoint) => viewpoint - p,
        NormalOrientation::Reference(direction) => direction,
    };
    let dot = normal.dot(&reference);
    if dot.abs() > EIGEN_TIE_TOLERANCE * reference.norm().max(f64::MIN_POSITIVE) {
        return if dot < 0.0 { -normal } else { normal };
    }
    // Undecided: make the dominant component positive
    let axis = normal.iamax();
    if normal[axis] < 0.0 {
        -normal
    } else {
        normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn plane_grid(n: usize) -> PointCloud<Point3d> {
        let mut points = Vec::new();
        for i in 0..n {
            for j in 0..n {
                points.push(Point3d::new(i as f64, j as f64, 0.0));
            }
        }
        PointCloud::from_points(points)
    }

    fn fibonacci_sphere(n: usize) -> PointCloud<Point3d> {
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                Point3d::new(r * theta.cos(), y, r * theta.sin())
            })
            .collect()
    }

    #[test]
    fn k_below_three_is_config_error() {
        assert!(matches!(
            NormalEstimator::new(NormalConfig::default().with_k(2)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn too_few_points_is_degenerate() {
        let cloud = PointCloud::from_points(vec![Point3d::origin(), Point3d::new(1.0, 0.0, 0.0)]);
        assert!(matches!(estimate_normals(&cloud, 3), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn plane_normals_are_consistent() {
        let oriented = estimate_normals(&plane_grid(10), 8).unwrap();
        assert_eq!(oriented.len(), 100);
        for p in oriented.iter() {
            assert_relative_eq!(p.normal, Vector3d::z(), epsilon = 1e-9);
        }
    }

    #[test]
    fn sphere_normals_point_outward() {
        let cloud = fibonacci_sphere(500);
        let oriented = estimate_normals(&cloud, 10).unwrap();
        for p in oriented.iter() {
            let radial = p.position.coords.normalize();
            assert!(p.normal.dot(&radial) > 0.95);
        }
    }

    #[test]
    fn viewpoint_orientation_faces_sensor() {
        let config = NormalConfig::default()
            .with_k(6)
            .with_orientation(NormalOrientation::TowardViewpoint(Point3d::new(0.0, 0.0, -10.0)));
        let oriented = NormalEstimator::new(config).unwrap().estimate(&plane_grid(6)).unwrap();
        assert!(oriented.iter().all(|p| p.normal.z < -0.99));
    }

    #[test]
    fn collinear_neighborhood_is_deterministic() {
        let line: Vec<Point3d> = (0..5).map(|i| Point3d::new(i as f64, 0.0, 0.0)).collect();
        let a = local_plane_normal(&line);
        let b = local_plane_normal(&line);
        assert_eq!(a, b);
        assert_relative_eq!(a.norm(), 1.0, epsilon = 1e-12);
        assert!(a.x.abs() < 1e-9);
    }

    #[test]
    fn organized_layout_is_kept() {
        let grid = plane_grid(4);
        let organized = PointCloud::organized(grid.points, 4, 4).unwrap();
        let oriented = estimate_normals(&organized, 5).unwrap();
        assert_eq!((oriented.width(), oriented.height()), (4, 4));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn normals_have_unit_length(
            coords in prop::collection::vec((-3.0f64..3.0, -3.0f64..3.0, -3.0f64..3.0), 3..200),
            k in 3usize..12,
        ) {
            let cloud = PointCloud::from_points(
                coords.into_iter().map(|(x, y, z)| Point3d::new(x, y, z)).collect(),
            );
            let oriented = estimate_normals(&cloud, k).unwrap();
            prop_assert_eq!(oriented.len(), cloud.len());
            for p in oriented.iter() {
                prop_assert!((p.normal.norm() - 1.0).abs() < 1e-4);
            }
        }
    }
}
