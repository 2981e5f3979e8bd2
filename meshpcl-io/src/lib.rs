//! I/O operations for point clouds and meshes
//!
//! Scans are read from PLY, PCD, XYZ and TXT files; reconstructed meshes are
//! written as binary little-endian PLY.

pub mod pcd;
pub mod ply;
pub mod xyz;

pub use pcd::PcdReader;
pub use ply::{read_ply_mesh, PlyMeshWriter, PlyReader};
pub use xyz::{TxtReader, XyzReader};

use meshpcl_core::{ColoredPoint3d, Error, Point3d, PointCloud, PolygonMesh, Result};
use std::path::Path;
use tracing::info;

/// A scan as read from disk, with or without per-point colors
#[derive(Debug, Clone)]
pub enum LoadedCloud {
    Plain(PointCloud<Point3d>),
    Colored(PointCloud<ColoredPoint3d>),
}

impl LoadedCloud {
    pub fn len(&self) -> usize {
        match self {
            LoadedCloud::Plain(cloud) => cloud.len(),
            LoadedCloud::Colored(cloud) => cloud.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_colored(&self) -> bool {
        matches!(self, LoadedCloud::Colored(_))
    }

    pub fn is_organized(&self) -> bool {
        match self {
            LoadedCloud::Plain(cloud) => cloud.is_organized(),
            LoadedCloud::Colored(cloud) => cloud.is_organized(),
        }
    }

    /// Positions only, colors dropped
    pub fn into_plain(self) -> PointCloud<Point3d> {
        match self {
            LoadedCloud::Plain(cloud) => cloud,
            LoadedCloud::Colored(cloud) => cloud.map(|p| p.position),
        }
    }
}

/// Trait for reading point clouds from files
pub trait PointCloudReader {
    fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud>;
}

/// Trait for writing meshes to files
pub trait MeshWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &PolygonMesh, path: P) -> Result<()>;
}

/// Auto-detect format and read point cloud
///
/// # Arguments
/// * `path` - A `.ply`, `.pcd`, `.xyz` or `.txt` file
///
/// # Returns
/// * `Result<LoadedCloud>` - The scan; colored when the format carries colors
pub fn read_point_cloud<P: AsRef<Path>>(path: P) -> Result<LoadedCloud> {
    let path = path.as_ref();
    let cloud = match extension(path).as_deref() {
        Some("ply") => PlyReader::read_point_cloud(path)?,
        Some("pcd") => PcdReader::read_point_cloud(path)?,
        Some("xyz") => XyzReader::read_point_cloud(path)?,
        Some("txt") => TxtReader::read_point_cloud(path)?,
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "unsupported point cloud format: {}",
                path.display()
            )))
        }
    };
    info!(
        path = %path.display(),
        points = cloud.len(),
        colored = cloud.is_colored(),
        organized = cloud.is_organized(),
        "loaded point cloud"
    );
    Ok(cloud)
}

/// Auto-detect format and write mesh
pub fn write_mesh<P: AsRef<Path>>(mesh: &PolygonMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    match extension(path).as_deref() {
        Some("ply") => PlyMeshWriter::write_mesh(mesh, path),
        _ => Err(Error::UnsupportedFormat(format!(
            "unsupported mesh format: {}",
            path.display()
        ))),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(str::to_ascii_lowercase)
}
