//! Core data structures and traits for meshpcl
//!
//! This crate provides the shared vocabulary of the reconstruction pipeline:
//! points, point clouds with their layout, polygon meshes, the error taxonomy
//! and the search trait implemented by spatial indices.

pub mod point;
pub mod point_cloud;
pub mod mesh;
pub mod traits;
pub mod transform;
pub mod error;

pub use point::*;
pub use point_cloud::*;
pub use mesh::*;
pub use traits::*;
pub use transform::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Point3, UnitQuaternion, Vector3};
