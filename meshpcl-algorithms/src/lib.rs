//! # meshpcl algorithms
//!
//! Point cloud preprocessing for surface reconstruction: a KD-tree spatial
//! index, voxel grid downsampling, centroid recentering, and per-point normal
//! estimation on a bounded worker pool.

pub mod filtering;
pub mod nearest_neighbor;
pub mod normals;
pub mod parallel;
pub mod point_cloud_ops;

// Re-export commonly used items
pub use filtering::*;
pub use nearest_neighbor::*;
pub use normals::*;
pub use parallel::*;
pub use point_cloud_ops::*;
