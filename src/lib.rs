//! # meshpcl
//!
//! Surface mesh reconstruction from 3D point cloud scans.
//!
//! This is the umbrella crate that provides convenient access to all meshpcl
//! functionality. You can use this crate to get everything in one place, or use
//! individual crates for more granular control over dependencies.
//!
//! ## Crates
//!
//! - **Core**: points, point clouds, polygon meshes and the error type
//! - **Algorithms**: KD tree, voxel downsampling, recentering, normal estimation
//! - **I/O**: PLY, PCD, XYZ and TXT ingestion; binary PLY mesh export
//! - **Reconstruction**: Poisson and greedy projection, and the pipeline that
//!   chains every stage
//!
//! ## Quick Start
//!
//! ```rust
//! use meshpcl::prelude::*;
//!
//! fn main() -> meshpcl::Result<()> {
//!     // A 10 x 10 patch of a plane
//!     let cloud: PointCloud<Point3d> = (0..100)
//!         .map(|i| Point3d::new((i % 10) as f64, (i / 10) as f64, 0.0))
//!         .collect();
//!
//!     let config = PipelineConfig::default()
//!         .with_strategy(StrategyKind::GreedyProjection)
//!         .with_leaf_size(0.5)
//!         .with_greedy(GreedyProjectionConfig::default().with_search_radius(2.0));
//!     let output = ReconstructionPipeline::new(config)?.run(&cloud)?;
//!     assert!(output.mesh.face_count() > 0);
//!     Ok(())
//! }
//! ```

// Re-export core functionality
pub use meshpcl_core::*;

// Re-export sub-crates
pub use meshpcl_algorithms as algorithms;
pub use meshpcl_io as io;
pub use meshpcl_reconstruction as reconstruction;

/// Convenient imports for common use cases
pub mod prelude {
    pub use meshpcl_core::*;

    pub use meshpcl_algorithms::{
        estimate_normals, recenter, voxel_grid_filter, KdTree, NormalConfig, NormalEstimator, NormalOrientation,
    };

    pub use meshpcl_io::{read_point_cloud, read_ply_mesh, write_mesh, LoadedCloud, MeshWriter, PointCloudReader};

    pub use meshpcl_reconstruction::{
        greedy_projection, poisson_reconstruction, GreedyProjection, GreedyProjectionConfig, PipelineConfig,
        PipelineOutput, PoissonConfig, PoissonReconstructor, ReconstructionMethod, ReconstructionPipeline,
        StrategyKind, SurfaceReconstructor,
    };
}
