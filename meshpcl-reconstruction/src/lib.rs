//! # meshpcl Reconstruction
//!
//! Surface reconstruction from oriented point clouds.
//!
//! Two strategies are provided: screened Poisson reconstruction, which solves
//! for an indicator function on a cascade of nested lattices and extracts its
//! iso-surface with marching cubes, and greedy projection triangulation, which
//! grows a mesh directly over the input points. [`ReconstructionPipeline`]
//! chains downsampling, recentering and normal estimation in front of either.

pub mod greedy_projection;
pub mod marching_cubes;
pub mod pipeline;
pub mod poisson;
pub mod reconstructor;

// Re-export commonly used items
pub use greedy_projection::*;
pub use marching_cubes::*;
pub use pipeline::*;
pub use poisson::*;
pub use reconstructor::*;
