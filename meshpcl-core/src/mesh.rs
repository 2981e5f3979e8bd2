//! Mesh data structures and functionality

use crate::error::{Error, Result};
use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One face: three or more vertex indices in winding order
pub type Face = Vec<usize>;

/// A polygon mesh with optionally colored vertices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolygonMesh {
    pub vertices: Vec<Point3d>,
    pub colors: Option<Vec<Rgb>>,
    pub faces: Vec<Face>,
}

impl PolygonMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3d>, faces: Vec<Face>) -> Self {
        Self {
            vertices,
            colors: None,
            faces,
        }
    }

    /// Create a mesh from vertices and triangles
    pub fn from_triangles(vertices: Vec<Point3d>, triangles: &[[usize; 3]]) -> Self {
        let faces = triangles.iter().map(|t| t.to_vec()).collect();
        Self::from_vertices_and_faces(vertices, faces)
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh and return its index
    pub fn add_vertex(&mut self, vertex: Point3d) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: Face) {
        self.faces.push(face);
    }

    /// Set vertex colors; ignored unless there is one color per vertex
    pub fn set_colors(&mut self, colors: Vec<Rgb>) {
        if colors.len() == self.vertices.len() {
            self.colors = Some(colors);
        }
    }

    /// Whether every face has exactly three vertices
    pub fn is_triangle_mesh(&self) -> bool {
        self.faces.iter().all(|f| f.len() == 3)
    }

    /// Check face arity, index range and color count
    pub fn validate(&self) -> Result<()> {
        let n = self.vertices.len();
        for (i, face) in self.faces.iter().enumerate() {
            if face.len() < 3 {
                return Err(Error::InvalidData(format!(
                    "face {} has only {} vertices",
                    i,
                    face.len()
                )));
            }
            if let Some(&bad) = face.iter().find(|&&v| v >= n) {
                return Err(Error::InvalidData(format!(
                    "face {} references vertex {} of {}",
                    i, bad, n
                )));
            }
        }
        if let Some(colors) = &self.colors {
            if colors.len() != n {
                return Err(Error::InvalidData(format!(
                    "{} colors for {} vertices",
                    colors.len(),
                    n
                )));
            }
        }
        Ok(())
    }

    /// Number of faces sharing each undirected edge
    pub fn edge_face_counts(&self) -> HashMap<(usize, usize), usize> {
        let mut counts = HashMap::new();
        for face in &self.faces {
            for i in 0..face.len() {
                let a = face[i];
                let b = face[(i + 1) % face.len()];
                *counts.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of distinct undirected edges
    pub fn edge_count(&self) -> usize {
        self.edge_face_counts().len()
    }

    /// Number of edges used by exactly one face
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_face_counts().values().filter(|&&c| c == 1).count()
    }

    /// Euler characteristic V - E + F, counting only referenced vertices
    pub fn euler_characteristic(&self) -> i64 {
        let mut used = vec![false; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                if let Some(slot) = used.get_mut(v) {
                    *slot = true;
                }
            }
        }
        let v = used.iter().filter(|&&u| u).count() as i64;
        v - self.edge_count() as i64 + self.faces.len() as i64
    }

    /// Area-weighted normal of a face (Newell's method), not normalized
    pub fn face_normal(&self, face: usize) -> Vector3d {
        let face = &self.faces[face];
        let mut normal = Vector3d::zeros();
        for i in 0..face.len() {
            let a = self.vertices[face[i]];
            let b = self.vertices[face[(i + 1) % face.len()]];
            normal += a.coords.cross(&b.coords);
        }
        normal * 0.5
    }

    /// Total area of all faces
    pub fn surface_area(&self) -> f64 {
        (0..self.faces.len()).map(|i| self.face_normal(i).norm()).sum()
    }

    /// Signed enclosed volume; positive for closed meshes with outward winding
    pub fn signed_volume(&self) -> f64 {
        let mut volume = 0.0;
        for face in &self.faces {
            let a = self.vertices[face[0]].coords;
            for i in 1..face.len().saturating_sub(1) {
                let b = self.vertices[face[i]].coords;
                let c = self.vertices[face[i + 1]].coords;
                volume += a.dot(&b.cross(&c));
            }
        }
        volume / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tetrahedron() -> PolygonMesh {
        let vertices = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        PolygonMesh::from_triangles(vertices, &[[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]])
    }

    #[test]
    fn closed_tetrahedron_topology() {
        let mesh = tetrahedron();
        assert!(mesh.validate().is_ok());
        assert_eq!(mesh.edge_count(), 6);
        assert_eq!(mesh.boundary_edge_count(), 0);
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn quad_face_area_and_normal() {
        let vertices = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(2.0, 1.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
        ];
        let mesh = PolygonMesh::from_vertices_and_faces(vertices, vec![vec![0, 1, 2, 3]]);
        assert!(!mesh.is_triangle_mesh());
        assert_relative_eq!(mesh.surface_area(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.face_normal(0).z, 2.0, epsilon = 1e-12);
        assert_eq!(mesh.boundary_edge_count(), 4);
    }

    #[test]
    fn validate_rejects_bad_faces() {
        let mut mesh = tetrahedron();
        mesh.faces.push(vec![0, 1, 7]);
        assert!(matches!(mesh.validate(), Err(Error::InvalidData(_))));

        let mut mesh = tetrahedron();
        mesh.faces.push(vec![0, 1]);
        assert!(mesh.validate().is_err());

        let mut mesh = tetrahedron();
        mesh.colors = Some(vec![[0, 0, 0]; 3]);
        assert!(mesh.validate().is_err());
    }
}
