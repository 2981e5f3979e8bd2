//! Whole-cloud geometric operations

use meshpcl_core::{mean_position, CloudPoint, Error, PointCloud, Result, Transform3D, Vector3d};
use tracing::debug;

/// A cloud moved so that its centroid is at the origin
#[derive(Debug, Clone)]
pub struct Recentered<T> {
    /// The translated cloud
    pub cloud: PointCloud<T>,
    /// The translation that was applied; its inverse maps results back
    pub transform: Transform3D,
}

/// Translate a cloud so that its centroid is at the origin
///
/// The centroid is computed twice: once on the input, and once more on the
/// translated points to remove the rounding residue, which keeps the output
/// centroid well below `1e-6` even for scans with large absolute coordinates.
/// Colors and the organized layout pass through unchanged.
///
/// # Arguments
/// * `cloud` - Input point cloud
///
/// # Returns
/// * `Result<Recentered<T>>` - The centered copy and the applied translation
pub fn recenter<T: CloudPoint>(cloud: &PointCloud<T>) -> Result<Recentered<T>> {
    let centroid = cloud
        .centroid()
        .ok_or_else(|| Error::degenerate("cannot recenter an empty cloud"))?;

    let shifted = cloud.map(|p| p.with_position(p.position() - centroid.coords));
    let residual = mean_position(shifted.iter().map(CloudPoint::position)).coords;
    let centered = shifted.map(|p| p.with_position(p.position() - residual));

    let offset: Vector3d = -(centroid.coords + residual);
    debug!(
        points = cloud.len(),
        cx = centroid.x,
        cy = centroid.y,
        cz = centroid.z,
        "recentered cloud"
    );
    Ok(Recentered {
        cloud: centered,
        transform: Transform3D::translation(offset),
    })
}
