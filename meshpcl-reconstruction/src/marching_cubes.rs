//! Marching cubes iso-surface extraction
//!
//! Extracts the level set of a scalar field sampled on a regular cubic
//! lattice, either from a dense grid or from a list of cells that need not
//! cover the whole lattice. Intersection vertices are shared by every cell that meets at a
//! lattice edge, so a closed level set comes out as a closed mesh. Faces are
//! wound so that their normals point toward increasing field values.
//!
//! Extraction runs over z-slabs of cells in parallel; each slab produces its
//! own patch and the patches are stitched in slab order, which keeps the
//! output independent of scheduling.

use meshpcl_algorithms::{WorkerPool, DEFAULT_WORKERS};
use meshpcl_core::{Error, Face, Point3d, PolygonMesh, Result, Vector3d};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Cube corner offsets in table order
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Corner pairs of the twelve cube edges in table order
const EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// Edge table: bit `i` is set when edge `i` crosses the level set (256 cases)
const EDGE_TABLE: [u16; 256] = [
    0x0, 0x109, 0x203, 0x30a, 0x406, 0x50f, 0x605, 0x70c,
    0x80c, 0x905, 0xa0f, 0xb06, 0xc0a, 0xd03, 0xe09, 0xf00,
    0x190, 0x99, 0x393, 0x29a, 0x596, 0x49f, 0x795, 0x69c,
    0x99c, 0x895, 0xb9f, 0xa96, 0xd9a, 0xc93, 0xf99, 0xe90,
    0x230, 0x339, 0x33, 0x13a, 0x636, 0x73f, 0x435, 0x53c,
    0xa3c, 0xb35, 0x83f, 0x936, 0xe3a, 0xf33, 0xc39, 0xd30,
    0x3a0, 0x2a9, 0x1a3, 0xaa, 0x7a6, 0x6af, 0x5a5, 0x4ac,
    0xbac, 0xaa5, 0x9af, 0x8a6, 0xfaa, 0xea3, 0xda9, 0xca0,
    0x460, 0x569, 0x663, 0x76a, 0x66, 0x16f, 0x265, 0x36c,
    0xc6c, 0xd65, 0xe6f, 0xf66, 0x86a, 0x963, 0xa69, 0xb60,
    0x5f0, 0x4f9, 0x7f3, 0x6fa, 0x1f6, 0xff, 0x3f5, 0x2fc,
    0xdfc, 0xcf5, 0xfff, 0xef6, 0x9fa, 0x8f3, 0xbf9, 0xaf0,
    0x650, 0x759, 0x453, 0x55a, 0x256, 0x35f, 0x55, 0x15c,
    0xe5c, 0xf55, 0xc5f, 0xd56, 0xa5a, 0xb53, 0x859, 0x950,
    0x7c0, 0x6c9, 0x5c3, 0x4ca, 0x3c6, 0x2cf, 0x1c5, 0xcc,
    0xfcc, 0xec5, 0xdcf, 0xcc6, 0xbca, 0xac3, 0x9c9, 0x8c0,
    0x8c0, 0x9c9, 0xac3, 0xbca, 0xcc6, 0xdcf, 0xec5, 0xfcc,
    0xcc, 0x1c5, 0x2cf, 0x3c6, 0x4ca, 0x5c3, 0x6c9, 0x7c0,
    0x950, 0x859, 0xb53, 0xa5a, 0xd56, 0xc5f, 0xf55, 0xe5c,
    0x15c, 0x55, 0x35f, 0x256, 0x55a, 0x453, 0x759, 0x650,
    0xaf0, 0xbf9, 0x8f3, 0x9fa, 0xef6, 0xfff, 0xcf5, 0xdfc,
    0x2fc, 0x3f5, 0xff, 0x1f6, 0x6fa, 0x7f3, 0x4f9, 0x5f0,
    0xb60, 0xa69, 0x963, 0x86a, 0xf66, 0xe6f, 0xd65, 0xc6c,
    0x36c, 0x265, 0x16f, 0x66, 0x76a, 0x663, 0x569, 0x460,
    0xca0, 0xda9, 0xea3, 0xfaa, 0x8a6, 0x9af, 0xaa5, 0xbac,
    0x4ac, 0x5a5, 0x6af, 0x7a6, 0xaa, 0x1a3, 0x2a9, 0x3a0,
    0xd30, 0xc39, 0xf33, 0xe3a, 0x936, 0x83f, 0xb35, 0xa3c,
    0x53c, 0x435, 0x73f, 0x636, 0x13a, 0x33, 0x339, 0x230,
    0xe90, 0xf99, 0xc93, 0xd9a, 0xa96, 0xb9f, 0x895, 0x99c,
    0x69c, 0x795, 0x49f, 0x596, 0x29a, 0x393, 0x99, 0x190,
    0xf00, 0xe09, 0xd03, 0xc0a, 0xb06, 0xa0f, 0x905, 0x80c,
    0x70c, 0x605, 0x50f, 0x406, 0x30a, 0x203, 0x109, 0x0,
];

/// Triangle table: up to 5 triangles (15 edge indices) per case, terminated by -1
const TRIANGLE_TABLE: [[i8; 16]; 256] = [
    [-1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 8, 3, 9, 8, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 1, 2, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 2, 10, 0, 2, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 8, 3, 2, 10, 8, 10, 9, 8, -1, -1, -1, -1, -1, -1, -1],
    [3, 11, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 11, 2, 8, 11, 0, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 11, 2, 1, 9, 11, 9, 8, 11, -1, -1, -1, -1, -1, -1, -1],
    [3, 10, 1, 11, 10, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 10, 1, 0, 8, 10, 8, 11, 10, -1, -1, -1, -1, -1, -1, -1],
    [3, 9, 0, 3, 11, 9, 11, 10, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 8, 10, 10, 8, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 7, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 3, 0, 7, 3, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 1, 9, 4, 7, 1, 7, 3, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 4, 7, 3, 0, 4, 1, 2, 10, -1, -1, -1, -1, -1, -1, -1],
    [9, 2, 10, 9, 0, 2, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1],
    [2, 10, 9, 2, 9, 7, 2, 7, 3, 7, 9, 4, -1, -1, -1, -1],
    [8, 4, 7, 3, 11, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 4, 7, 11, 2, 4, 2, 0, 4, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 1, 8, 4, 7, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1],
    [4, 7, 11, 9, 4, 11, 9, 11, 2, 9, 2, 1, -1, -1, -1, -1],
    [3, 10, 1, 3, 11, 10, 7, 8, 4, -1, -1, -1, -1, -1, -1, -1],
    [1, 11, 10, 1, 4, 11, 1, 0, 4, 7, 11, 4, -1, -1, -1, -1],
    [4, 7, 8, 9, 0, 11, 9, 11, 10, 11, 0, 3, -1, -1, -1, -1],
    [4, 7, 11, 4, 11, 9, 9, 11, 10, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, 0, 8, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 5, 4, 1, 5, 0, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 5, 4, 8, 3, 5, 3, 1, 5, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 9, 5, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 1, 2, 10, 4, 9, 5, -1, -1, -1, -1, -1, -1, -1],
    [5, 2, 10, 5, 4, 2, 4, 0, 2, -1, -1, -1, -1, -1, -1, -1],
    [2, 10, 5, 3, 2, 5, 3, 5, 4, 3, 4, 8, -1, -1, -1, -1],
    [9, 5, 4, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 11, 2, 0, 8, 11, 4, 9, 5, -1, -1, -1, -1, -1, -1, -1],
    [0, 5, 4, 0, 1, 5, 2, 3, 11, -1, -1, -1, -1, -1, -1, -1],
    [2, 1, 5, 2, 5, 8, 2, 8, 11, 4, 8, 5, -1, -1, -1, -1],
    [10, 3, 11, 10, 1, 3, 9, 5, 4, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 5, 0, 8, 1, 8, 10, 1, 8, 11, 10, -1, -1, -1, -1],
    [5, 4, 0, 5, 0, 11, 5, 11, 10, 11, 0, 3, -1, -1, -1, -1],
    [5, 4, 8, 5, 8, 10, 10, 8, 11, -1, -1, -1, -1, -1, -1, -1],
    [9, 7, 8, 5, 7, 9, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 3, 0, 9, 5, 3, 5, 7, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 7, 8, 0, 1, 7, 1, 5, 7, -1, -1, -1, -1, -1, -1, -1],
    [1, 5, 3, 3, 5, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 7, 8, 9, 5, 7, 10, 1, 2, -1, -1, -1, -1, -1, -1, -1],
    [10, 1, 2, 9, 5, 0, 5, 3, 0, 5, 7, 3, -1, -1, -1, -1],
    [8, 0, 2, 8, 2, 5, 8, 5, 7, 10, 5, 2, -1, -1, -1, -1],
    [2, 10, 5, 2, 5, 3, 3, 5, 7, -1, -1, -1, -1, -1, -1, -1],
    [7, 9, 5, 7, 8, 9, 3, 11, 2, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 7, 9, 7, 2, 9, 2, 0, 2, 7, 11, -1, -1, -1, -1],
    [2, 3, 11, 0, 1, 8, 1, 7, 8, 1, 5, 7, -1, -1, -1, -1],
    [11, 2, 1, 11, 1, 7, 7, 1, 5, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 8, 8, 5, 7, 10, 1, 3, 10, 3, 11, -1, -1, -1, -1],
    [5, 7, 0, 5, 0, 9, 7, 11, 0, 1, 0, 10, 11, 10, 0, -1],
    [11, 10, 0, 11, 0, 3, 10, 5, 0, 8, 0, 7, 5, 7, 0, -1],
    [11, 10, 5, 7, 11, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [10, 6, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 1, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 8, 3, 1, 9, 8, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 5, 2, 6, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 5, 1, 2, 6, 3, 0, 8, -1, -1, -1, -1, -1, -1, -1],
    [9, 6, 5, 9, 0, 6, 0, 2, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 9, 8, 5, 8, 2, 5, 2, 6, 3, 2, 8, -1, -1, -1, -1],
    [2, 3, 11, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 0, 8, 11, 2, 0, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 2, 3, 11, 5, 10, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 1, 9, 2, 9, 11, 2, 9, 8, 11, -1, -1, -1, -1],
    [6, 3, 11, 6, 5, 3, 5, 1, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 11, 0, 11, 5, 0, 5, 1, 5, 11, 6, -1, -1, -1, -1],
    [3, 11, 6, 0, 3, 6, 0, 6, 5, 0, 5, 9, -1, -1, -1, -1],
    [6, 5, 9, 6, 9, 11, 11, 9, 8, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 4, 7, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 3, 0, 4, 7, 3, 6, 5, 10, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 5, 10, 6, 8, 4, 7, -1, -1, -1, -1, -1, -1, -1],
    [10, 6, 5, 1, 9, 7, 1, 7, 3, 7, 9, 4, -1, -1, -1, -1],
    [6, 1, 2, 6, 5, 1, 4, 7, 8, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 5, 5, 2, 6, 3, 0, 4, 3, 4, 7, -1, -1, -1, -1],
    [8, 4, 7, 9, 0, 5, 0, 6, 5, 0, 2, 6, -1, -1, -1, -1],
    [7, 3, 9, 7, 9, 4, 3, 2, 9, 5, 9, 6, 2, 6, 9, -1],
    [3, 11, 2, 7, 8, 4, 10, 6, 5, -1, -1, -1, -1, -1, -1, -1],
    [5, 10, 6, 4, 7, 2, 4, 2, 0, 2, 7, 11, -1, -1, -1, -1],
    [0, 1, 9, 4, 7, 8, 2, 3, 11, 5, 10, 6, -1, -1, -1, -1],
    [9, 2, 1, 9, 11, 2, 9, 4, 11, 7, 11, 4, 5, 10, 6, -1],
    [8, 4, 7, 3, 11, 5, 3, 5, 1, 5, 11, 6, -1, -1, -1, -1],
    [5, 1, 11, 5, 11, 6, 1, 0, 11, 7, 11, 4, 0, 4, 11, -1],
    [0, 5, 9, 0, 6, 5, 0, 3, 6, 11, 6, 3, 8, 4, 7, -1],
    [6, 5, 9, 6, 9, 11, 4, 7, 9, 7, 11, 9, -1, -1, -1, -1],
    [10, 4, 9, 6, 4, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 10, 6, 4, 9, 10, 0, 8, 3, -1, -1, -1, -1, -1, -1, -1],
    [10, 0, 1, 10, 6, 0, 6, 4, 0, -1, -1, -1, -1, -1, -1, -1],
    [8, 3, 1, 8, 1, 6, 8, 6, 4, 6, 1, 10, -1, -1, -1, -1],
    [1, 4, 9, 1, 2, 4, 2, 6, 4, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 1, 2, 9, 2, 4, 9, 2, 6, 4, -1, -1, -1, -1],
    [0, 2, 4, 4, 2, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 3, 2, 8, 2, 4, 4, 2, 6, -1, -1, -1, -1, -1, -1, -1],
    [10, 4, 9, 10, 6, 4, 11, 2, 3, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 2, 2, 8, 11, 4, 9, 10, 4, 10, 6, -1, -1, -1, -1],
    [3, 11, 2, 0, 1, 6, 0, 6, 4, 6, 1, 10, -1, -1, -1, -1],
    [6, 4, 1, 6, 1, 10, 4, 8, 1, 2, 1, 11, 8, 11, 1, -1],
    [9, 6, 4, 9, 3, 6, 9, 1, 3, 11, 6, 3, -1, -1, -1, -1],
    [8, 11, 1, 8, 1, 0, 11, 6, 1, 9, 1, 4, 6, 4, 1, -1],
    [3, 11, 6, 3, 6, 0, 0, 6, 4, -1, -1, -1, -1, -1, -1, -1],
    [6, 4, 8, 11, 6, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 10, 6, 7, 8, 10, 8, 9, 10, -1, -1, -1, -1, -1, -1, -1],
    [0, 7, 3, 0, 10, 7, 0, 9, 10, 6, 7, 10, -1, -1, -1, -1],
    [10, 6, 7, 1, 10, 7, 1, 7, 8, 1, 8, 0, -1, -1, -1, -1],
    [10, 6, 7, 10, 7, 1, 1, 7, 3, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 6, 1, 6, 8, 1, 8, 9, 8, 6, 7, -1, -1, -1, -1],
    [2, 6, 9, 2, 9, 1, 6, 7, 9, 0, 9, 3, 7, 3, 9, -1],
    [7, 8, 0, 7, 0, 6, 6, 0, 2, -1, -1, -1, -1, -1, -1, -1],
    [7, 3, 2, 6, 7, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 11, 10, 6, 8, 10, 8, 9, 8, 6, 7, -1, -1, -1, -1],
    [2, 0, 7, 2, 7, 11, 0, 9, 7, 6, 7, 10, 9, 10, 7, -1],
    [1, 8, 0, 1, 7, 8, 1, 10, 7, 6, 7, 10, 2, 3, 11, -1],
    [11, 2, 1, 11, 1, 7, 10, 6, 1, 6, 7, 1, -1, -1, -1, -1],
    [8, 9, 6, 8, 6, 7, 9, 1, 6, 11, 6, 3, 1, 3, 6, -1],
    [0, 9, 1, 11, 6, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 8, 0, 7, 0, 6, 3, 11, 0, 11, 6, 0, -1, -1, -1, -1],
    [7, 11, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 6, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 8, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 9, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 1, 9, 8, 3, 1, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1],
    [10, 1, 2, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 3, 0, 8, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1],
    [2, 9, 0, 2, 10, 9, 6, 11, 7, -1, -1, -1, -1, -1, -1, -1],
    [6, 11, 7, 2, 10, 3, 10, 8, 3, 10, 9, 8, -1, -1, -1, -1],
    [7, 2, 3, 6, 2, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [7, 0, 8, 7, 6, 0, 6, 2, 0, -1, -1, -1, -1, -1, -1, -1],
    [2, 7, 6, 2, 3, 7, 0, 1, 9, -1, -1, -1, -1, -1, -1, -1],
    [1, 6, 2, 1, 8, 6, 1, 9, 8, 8, 7, 6, -1, -1, -1, -1],
    [10, 7, 6, 10, 1, 7, 1, 3, 7, -1, -1, -1, -1, -1, -1, -1],
    [10, 7, 6, 1, 7, 10, 1, 8, 7, 1, 0, 8, -1, -1, -1, -1],
    [0, 3, 7, 0, 7, 10, 0, 10, 9, 6, 10, 7, -1, -1, -1, -1],
    [7, 6, 10, 7, 10, 8, 8, 10, 9, -1, -1, -1, -1, -1, -1, -1],
    [6, 8, 4, 11, 8, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 6, 11, 3, 0, 6, 0, 4, 6, -1, -1, -1, -1, -1, -1, -1],
    [8, 6, 11, 8, 4, 6, 9, 0, 1, -1, -1, -1, -1, -1, -1, -1],
    [9, 4, 6, 9, 6, 3, 9, 3, 1, 11, 3, 6, -1, -1, -1, -1],
    [6, 8, 4, 6, 11, 8, 2, 10, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 3, 0, 11, 0, 6, 11, 0, 4, 6, -1, -1, -1, -1],
    [4, 11, 8, 4, 6, 11, 0, 2, 9, 2, 10, 9, -1, -1, -1, -1],
    [10, 9, 3, 10, 3, 2, 9, 4, 3, 11, 3, 6, 4, 6, 3, -1],
    [8, 2, 3, 8, 4, 2, 4, 6, 2, -1, -1, -1, -1, -1, -1, -1],
    [0, 4, 2, 4, 6, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 9, 0, 2, 3, 4, 2, 4, 6, 4, 3, 8, -1, -1, -1, -1],
    [1, 9, 4, 1, 4, 2, 2, 4, 6, -1, -1, -1, -1, -1, -1, -1],
    [8, 1, 3, 8, 6, 1, 8, 4, 6, 6, 10, 1, -1, -1, -1, -1],
    [10, 1, 0, 10, 0, 6, 6, 0, 4, -1, -1, -1, -1, -1, -1, -1],
    [4, 6, 3, 4, 3, 8, 6, 10, 3, 0, 3, 9, 10, 9, 3, -1],
    [10, 9, 4, 6, 10, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 5, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 4, 9, 5, 11, 7, 6, -1, -1, -1, -1, -1, -1, -1],
    [5, 0, 1, 5, 4, 0, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1],
    [11, 7, 6, 8, 3, 4, 3, 5, 4, 3, 1, 5, -1, -1, -1, -1],
    [9, 5, 4, 10, 1, 2, 7, 6, 11, -1, -1, -1, -1, -1, -1, -1],
    [6, 11, 7, 1, 2, 10, 0, 8, 3, 4, 9, 5, -1, -1, -1, -1],
    [7, 6, 11, 5, 4, 10, 4, 2, 10, 4, 0, 2, -1, -1, -1, -1],
    [3, 4, 8, 3, 5, 4, 3, 2, 5, 10, 5, 2, 11, 7, 6, -1],
    [7, 2, 3, 7, 6, 2, 5, 4, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 5, 4, 0, 8, 6, 0, 6, 2, 6, 8, 7, -1, -1, -1, -1],
    [3, 6, 2, 3, 7, 6, 1, 5, 0, 5, 4, 0, -1, -1, -1, -1],
    [6, 2, 8, 6, 8, 7, 2, 1, 8, 4, 8, 5, 1, 5, 8, -1],
    [9, 5, 4, 10, 1, 6, 1, 7, 6, 1, 3, 7, -1, -1, -1, -1],
    [1, 6, 10, 1, 7, 6, 1, 0, 7, 8, 7, 0, 9, 5, 4, -1],
    [4, 0, 10, 4, 10, 5, 0, 3, 10, 6, 10, 7, 3, 7, 10, -1],
    [7, 6, 10, 7, 10, 8, 5, 4, 10, 4, 8, 10, -1, -1, -1, -1],
    [6, 9, 5, 6, 11, 9, 11, 8, 9, -1, -1, -1, -1, -1, -1, -1],
    [3, 6, 11, 0, 6, 3, 0, 5, 6, 0, 9, 5, -1, -1, -1, -1],
    [0, 11, 8, 0, 5, 11, 0, 1, 5, 5, 6, 11, -1, -1, -1, -1],
    [6, 11, 3, 6, 3, 5, 5, 3, 1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 10, 9, 5, 11, 9, 11, 8, 11, 5, 6, -1, -1, -1, -1],
    [0, 11, 3, 0, 6, 11, 0, 9, 6, 5, 6, 9, 1, 2, 10, -1],
    [11, 8, 5, 11, 5, 6, 8, 0, 5, 10, 5, 2, 0, 2, 5, -1],
    [6, 11, 3, 6, 3, 5, 2, 10, 3, 10, 5, 3, -1, -1, -1, -1],
    [5, 8, 9, 5, 2, 8, 5, 6, 2, 3, 8, 2, -1, -1, -1, -1],
    [9, 5, 6, 9, 6, 0, 0, 6, 2, -1, -1, -1, -1, -1, -1, -1],
    [1, 5, 8, 1, 8, 0, 5, 6, 8, 3, 8, 2, 6, 2, 8, -1],
    [1, 5, 6, 2, 1, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 3, 6, 1, 6, 10, 3, 8, 6, 5, 6, 9, 8, 9, 6, -1],
    [10, 1, 0, 10, 0, 6, 9, 5, 0, 5, 6, 0, -1, -1, -1, -1],
    [0, 3, 8, 5, 6, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [10, 5, 6, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 5, 10, 7, 5, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [11, 5, 10, 11, 7, 5, 8, 3, 0, -1, -1, -1, -1, -1, -1, -1],
    [5, 11, 7, 5, 10, 11, 1, 9, 0, -1, -1, -1, -1, -1, -1, -1],
    [10, 7, 5, 10, 11, 7, 9, 8, 1, 8, 3, 1, -1, -1, -1, -1],
    [11, 1, 2, 11, 7, 1, 7, 5, 1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 1, 2, 7, 1, 7, 5, 7, 2, 11, -1, -1, -1, -1],
    [9, 7, 5, 9, 2, 7, 9, 0, 2, 2, 11, 7, -1, -1, -1, -1],
    [7, 5, 2, 7, 2, 11, 5, 9, 2, 3, 2, 8, 9, 8, 2, -1],
    [2, 5, 10, 2, 3, 5, 3, 7, 5, -1, -1, -1, -1, -1, -1, -1],
    [8, 2, 0, 8, 5, 2, 8, 7, 5, 10, 2, 5, -1, -1, -1, -1],
    [9, 0, 1, 5, 10, 3, 5, 3, 7, 3, 10, 2, -1, -1, -1, -1],
    [9, 8, 2, 9, 2, 1, 8, 7, 2, 10, 2, 5, 7, 5, 2, -1],
    [1, 3, 5, 3, 7, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 7, 0, 7, 1, 1, 7, 5, -1, -1, -1, -1, -1, -1, -1],
    [9, 0, 3, 9, 3, 5, 5, 3, 7, -1, -1, -1, -1, -1, -1, -1],
    [9, 8, 7, 5, 9, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [5, 8, 4, 5, 10, 8, 10, 11, 8, -1, -1, -1, -1, -1, -1, -1],
    [5, 0, 4, 5, 11, 0, 5, 10, 11, 11, 3, 0, -1, -1, -1, -1],
    [0, 1, 9, 8, 4, 10, 8, 10, 11, 10, 4, 5, -1, -1, -1, -1],
    [10, 11, 4, 10, 4, 5, 11, 3, 4, 9, 4, 1, 3, 1, 4, -1],
    [2, 5, 1, 2, 8, 5, 2, 11, 8, 4, 5, 8, -1, -1, -1, -1],
    [0, 4, 11, 0, 11, 3, 4, 5, 11, 2, 11, 1, 5, 1, 11, -1],
    [0, 2, 5, 0, 5, 9, 2, 11, 5, 4, 5, 8, 11, 8, 5, -1],
    [9, 4, 5, 2, 11, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 5, 10, 3, 5, 2, 3, 4, 5, 3, 8, 4, -1, -1, -1, -1],
    [5, 10, 2, 5, 2, 4, 4, 2, 0, -1, -1, -1, -1, -1, -1, -1],
    [3, 10, 2, 3, 5, 10, 3, 8, 5, 4, 5, 8, 0, 1, 9, -1],
    [5, 10, 2, 5, 2, 4, 1, 9, 2, 9, 4, 2, -1, -1, -1, -1],
    [8, 4, 5, 8, 5, 3, 3, 5, 1, -1, -1, -1, -1, -1, -1, -1],
    [0, 4, 5, 1, 0, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [8, 4, 5, 8, 5, 3, 9, 0, 5, 0, 3, 5, -1, -1, -1, -1],
    [9, 4, 5, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 11, 7, 4, 9, 11, 9, 10, 11, -1, -1, -1, -1, -1, -1, -1],
    [0, 8, 3, 4, 9, 7, 9, 11, 7, 9, 10, 11, -1, -1, -1, -1],
    [1, 10, 11, 1, 11, 4, 1, 4, 0, 7, 4, 11, -1, -1, -1, -1],
    [3, 1, 4, 3, 4, 8, 1, 10, 4, 7, 4, 11, 10, 11, 4, -1],
    [4, 11, 7, 9, 11, 4, 9, 2, 11, 9, 1, 2, -1, -1, -1, -1],
    [9, 7, 4, 9, 11, 7, 9, 1, 11, 2, 11, 1, 0, 8, 3, -1],
    [11, 7, 4, 11, 4, 2, 2, 4, 0, -1, -1, -1, -1, -1, -1, -1],
    [11, 7, 4, 11, 4, 2, 8, 3, 4, 3, 2, 4, -1, -1, -1, -1],
    [2, 9, 10, 2, 7, 9, 2, 3, 7, 7, 4, 9, -1, -1, -1, -1],
    [9, 10, 7, 9, 7, 4, 10, 2, 7, 8, 7, 0, 2, 0, 7, -1],
    [3, 7, 10, 3, 10, 2, 7, 4, 10, 1, 10, 0, 4, 0, 10, -1],
    [1, 10, 2, 8, 7, 4, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 1, 4, 1, 7, 7, 1, 3, -1, -1, -1, -1, -1, -1, -1],
    [4, 9, 1, 4, 1, 7, 0, 8, 1, 8, 7, 1, -1, -1, -1, -1],
    [4, 0, 3, 7, 4, 3, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [4, 8, 7, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [9, 10, 8, 10, 11, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 9, 3, 9, 11, 11, 9, 10, -1, -1, -1, -1, -1, -1, -1],
    [0, 1, 10, 0, 10, 8, 8, 10, 11, -1, -1, -1, -1, -1, -1, -1],
    [3, 1, 10, 11, 3, 10, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 2, 11, 1, 11, 9, 9, 11, 8, -1, -1, -1, -1, -1, -1, -1],
    [3, 0, 9, 3, 9, 11, 1, 2, 9, 2, 11, 9, -1, -1, -1, -1],
    [0, 2, 11, 8, 0, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [3, 2, 11, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 8, 2, 8, 10, 10, 8, 9, -1, -1, -1, -1, -1, -1, -1],
    [9, 10, 2, 0, 9, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [2, 3, 8, 2, 8, 10, 0, 1, 8, 1, 10, 8, -1, -1, -1, -1],
    [1, 10, 2, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [1, 3, 8, 9, 1, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 9, 1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [0, 3, 8, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
    [-1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1, -1],
];

/// Placement of a regular cubic lattice of vertices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lattice {
    /// World position of vertex (0, 0, 0)
    pub origin: Point3d,
    /// Distance between neighboring vertices
    pub spacing: f64,
    /// Vertices per axis
    pub vertices: [usize; 3],
}

impl Lattice {
    /// Linear index of a vertex, `x` varying fastest
    #[inline]
    pub fn index(&self, [x, y, z]: [usize; 3]) -> usize {
        x + self.vertices[0] * (y + self.vertices[1] * z)
    }

    pub fn position(&self, [x, y, z]: [usize; 3]) -> Point3d {
        self.origin + Vector3d::new(x as f64, y as f64, z as f64) * self.spacing
    }
}

/// One lattice cell with the field values at its corners, in table order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatticeCell {
    /// Lattice coordinates of corner 0
    pub key: [usize; 3],
    pub values: [f64; 8],
}

impl LatticeCell {
    /// True when the corners lie on both sides of `iso`
    pub fn straddles(&self, iso: f64) -> bool {
        let below = self.values.iter().filter(|&&v| v < iso).count();
        below > 0 && below < 8
    }

    /// Trilinear value at a fractional offset inside the cell
    pub fn interpolate(&self, frac: [f64; 3]) -> f64 {
        CORNERS
            .iter()
            .zip(&self.values)
            .map(|(offset, value)| {
                let weight: f64 = (0..3)
                    .map(|axis| if offset[axis] == 1 { frac[axis] } else { 1.0 - frac[axis] })
                    .product();
                weight * value
            })
            .sum()
    }

    /// The eight cells of the next finer lattice inside this one
    ///
    /// `exact` gives the value of a finer vertex when one is known; the
    /// others are interpolated from this cell's corners.
    pub fn subdivide(&self, exact: impl Fn([usize; 3]) -> Option<f64>) -> [LatticeCell; 8] {
        let mut fine = [[[0.0f64; 3]; 3]; 3];
        for (dz, plane) in fine.iter_mut().enumerate() {
            for (dy, row) in plane.iter_mut().enumerate() {
                for (dx, value) in row.iter_mut().enumerate() {
                    let key = [2 * self.key[0] + dx, 2 * self.key[1] + dy, 2 * self.key[2] + dz];
                    *value = exact(key).unwrap_or_else(|| {
                        self.interpolate([dx as f64 / 2.0, dy as f64 / 2.0, dz as f64 / 2.0])
                    });
                }
            }
        }

        let mut children = [LatticeCell {
            key: [0; 3],
            values: [0.0; 8],
        }; 8];
        for (child, cell) in children.iter_mut().enumerate() {
            let offset = [child & 1, (child >> 1) & 1, (child >> 2) & 1];
            cell.key = [0, 1, 2].map(|axis| 2 * self.key[axis] + offset[axis]);
            for (corner, value) in cell.values.iter_mut().enumerate() {
                let at = [0, 1, 2].map(|axis| offset[axis] + CORNERS[corner][axis]);
                *value = fine[at[2]][at[1]][at[0]];
            }
        }
        children
    }
}

/// Scalar samples on the vertices of a regular cubic lattice
///
/// Values are stored with `x` varying fastest, then `y`, then `z`.
#[derive(Debug, Clone)]
pub struct ScalarGrid {
    lattice: Lattice,
    values: Vec<f64>,
}

impl ScalarGrid {
    /// Wrap existing samples
    pub fn from_values(dims: [usize; 3], origin: Point3d, spacing: f64, values: Vec<f64>) -> Result<Self> {
        let len = Self::check_shape(dims, spacing)?;
        if values.len() != len {
            return Err(Error::InvalidData(format!(
                "grid of {:?} vertices needs {} values, got {}",
                dims,
                len,
                values.len()
            )));
        }
        Ok(Self {
            lattice: Lattice {
                origin,
                spacing,
                vertices: dims,
            },
            values,
        })
    }

    fn check_shape(dims: [usize; 3], spacing: f64) -> Result<usize> {
        if dims.iter().any(|&d| d < 2) {
            return Err(Error::config(format!(
                "a scalar grid needs at least 2 vertices per axis, got {:?}",
                dims
            )));
        }
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(Error::config(format!(
                "grid spacing must be positive and finite, got {}",
                spacing
            )));
        }
        dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| Error::config(format!("grid of {:?} vertices is too large", dims)))
    }

    /// Vertices per axis
    pub fn dims(&self) -> [usize; 3] {
        self.lattice.vertices
    }

    pub fn lattice(&self) -> &Lattice {
        &self.lattice
    }

    #[inline]
    fn value_at(&self, vertex: [usize; 3]) -> f64 {
        self.values[self.lattice.index(vertex)]
    }

    /// Every cell of the grid, ordered by `z`, then `y`, then `x`
    pub fn cells(&self) -> Vec<LatticeCell> {
        let [nx, ny, nz] = self.dims();
        let mut cells = Vec::with_capacity((nx - 1) * (ny - 1) * (nz - 1));
        for z in 0..nz - 1 {
            for y in 0..ny - 1 {
                for x in 0..nx - 1 {
                    let values = CORNERS.map(|offset| self.value_at([x + offset[0], y + offset[1], z + offset[2]]));
                    cells.push(LatticeCell { key: [x, y, z], values });
                }
            }
        }
        cells
    }
}

/// Face layout of the extracted surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FaceOutput {
    /// Triangles straight from the case table
    #[default]
    Triangles,
    /// One polygon per connected patch of each cell
    Polygons,
    /// Cell polygons triangulated around an added barycenter vertex
    FannedPolygons,
}

impl FaceOutput {
    /// Map the polygon/manifold flag pair to a layout
    pub fn from_flags(output_polygons: bool, manifold: bool) -> Self {
        match (output_polygons, manifold) {
            (true, _) => FaceOutput::Polygons,
            (false, true) => FaceOutput::FannedPolygons,
            (false, false) => FaceOutput::Triangles,
        }
    }
}

/// Configuration for Marching Cubes algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarchingCubesConfig {
    /// Isosurface level (scalar value to extract)
    pub iso_level: f64,
    /// Cell layers per parallel slab
    pub slab_depth: usize,
    /// Face layout
    pub output: FaceOutput,
}

impl Default for MarchingCubesConfig {
    fn default() -> Self {
        Self {
            iso_level: 0.0,
            slab_depth: 8,
            output: FaceOutput::Triangles,
        }
    }
}

impl MarchingCubesConfig {
    pub fn with_iso_level(mut self, iso_level: f64) -> Self {
        self.iso_level = iso_level;
        self
    }

    pub fn with_slab_depth(mut self, slab_depth: usize) -> Self {
        self.slab_depth = slab_depth;
        self
    }

    pub fn with_output(mut self, output: FaceOutput) -> Self {
        self.output = output;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.iso_level.is_finite() {
            return Err(Error::config(format!("iso level must be finite, got {}", self.iso_level)));
        }
        if self.slab_depth == 0 {
            return Err(Error::config("iso-surface slab depth must be at least 1"));
        }
        Ok(())
    }
}

/// Vertices and faces of one z-slab, indexed locally
#[derive(Debug, Default)]
struct SlabPatch {
    /// Lattice edge of each vertex; `None` for barycenters, which are never shared
    keys: Vec<Option<u64>>,
    positions: Vec<Point3d>,
    faces: Vec<Face>,
}

impl SlabPatch {
    fn push_vertex(&mut self, key: Option<u64>, position: Point3d) -> usize {
        self.keys.push(key);
        self.positions.push(position);
        self.positions.len() - 1
    }
}

/// Marching Cubes implementation
#[derive(Debug, Clone)]
pub struct MarchingCubes {
    config: MarchingCubesConfig,
}

impl MarchingCubes {
    /// Create a new Marching Cubes instance
    pub fn new(config: MarchingCubesConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MarchingCubesConfig {
        &self.config
    }

    /// Extract the iso-surface of `grid`
    ///
    /// # Arguments
    /// * `grid` - Sampled scalar field
    /// * `pool` - Workers that process the z-slabs
    ///
    /// # Returns
    /// * `Result<PolygonMesh>` - The surface, or a reconstruction error when
    ///   the level set does not cross the grid
    pub fn extract(&self, grid: &ScalarGrid, pool: &WorkerPool) -> Result<PolygonMesh> {
        self.extract_cells(grid.lattice(), &grid.cells(), pool)
    }

    /// Extract the iso-surface through a subset of the cells of `lattice`
    ///
    /// Cells are processed in the given order; consecutive cells in the same
    /// block of `slab_depth` z-layers form one parallel slab. Vertices on
    /// shared lattice edges are merged across slabs, so a list sorted by `z`
    /// gives the fewest slabs.
    pub fn extract_cells(&self, lattice: &Lattice, cells: &[LatticeCell], pool: &WorkerPool) -> Result<PolygonMesh> {
        let depth = self.config.slab_depth;
        let mut slabs = Vec::new();
        let mut start = 0;
        while start < cells.len() {
            let block = cells[start].key[2] / depth;
            let end = start + cells[start..].iter().take_while(|cell| cell.key[2] / depth == block).count();
            slabs.push(start..end);
            start = end;
        }

        let patches = pool.map(&slabs, |range| self.extract_slab(lattice, &cells[range.clone()]));

        let mut mesh = PolygonMesh::new();
        let mut shared: HashMap<u64, usize> = HashMap::new();
        for patch in patches {
            let mut remap = Vec::with_capacity(patch.positions.len());
            for (key, position) in patch.keys.iter().zip(patch.positions) {
                let index = match key {
                    Some(key) => *shared.entry(*key).or_insert_with(|| mesh.add_vertex(position)),
                    None => mesh.add_vertex(position),
                };
                remap.push(index);
            }
            for face in patch.faces {
                mesh.add_face(face.into_iter().map(|i| remap[i]).collect());
            }
        }

        if mesh.faces.is_empty() {
            return Err(Error::reconstruction(format!(
                "no iso-surface found at level {}",
                self.config.iso_level
            )));
        }

        debug!(
            cells = cells.len(),
            slabs = slabs.len(),
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            iso = self.config.iso_level,
            "extracted iso-surface"
        );
        Ok(mesh)
    }

    /// Process one slab of cells
    fn extract_slab(&self, lattice: &Lattice, cells: &[LatticeCell]) -> SlabPatch {
        let iso = self.config.iso_level;
        let mut patch = SlabPatch::default();
        let mut local: HashMap<u64, usize> = HashMap::new();

        for cell in cells {
            let mut cube_index = 0usize;
            for (corner, value) in cell.values.iter().enumerate() {
                if *value < iso {
                    cube_index |= 1 << corner;
                }
            }

            let crossed = EDGE_TABLE[cube_index];
            if crossed == 0 {
                continue;
            }

            let mut edge_vertices = [usize::MAX; 12];
            for (edge, slot) in edge_vertices.iter_mut().enumerate() {
                if crossed & (1 << edge) != 0 {
                    *slot = edge_vertex(lattice, cell, edge, iso, &mut patch, &mut local);
                }
            }

            // Reversed table order gives normals along increasing values
            let triangles: Vec<[usize; 3]> = TRIANGLE_TABLE[cube_index]
                .chunks(3)
                .take_while(|t| t[0] >= 0)
                .map(|t| {
                    [
                        edge_vertices[t[0] as usize],
                        edge_vertices[t[2] as usize],
                        edge_vertices[t[1] as usize],
                    ]
                })
                .filter(|t| t.iter().all(|&v| v != usize::MAX))
                .collect();

            self.emit_cell(&triangles, &mut patch);
        }
        patch
    }

    fn emit_cell(&self, triangles: &[[usize; 3]], patch: &mut SlabPatch) {
        match self.config.output {
            FaceOutput::Triangles => {
                patch.faces.extend(triangles.iter().map(|t| t.to_vec()));
            }
            FaceOutput::Polygons => {
                patch.faces.extend(cell_polygons(triangles));
            }
            FaceOutput::FannedPolygons => {
                for polygon in cell_polygons(triangles) {
                    if polygon.len() == 3 {
                        patch.faces.push(polygon);
                        continue;
                    }
                    let center = polygon
                        .iter()
                        .fold(Point3d::origin(), |acc, &v| acc + patch.positions[v].coords)
                        / polygon.len() as f64;
                    let hub = patch.push_vertex(None, center);
                    for (i, &v) in polygon.iter().enumerate() {
                        patch.faces.push(vec![v, polygon[(i + 1) % polygon.len()], hub]);
                    }
                }
            }
        }
    }
}

/// Slab-local index of the vertex on `edge` of `cell`
fn edge_vertex(
    lattice: &Lattice,
    cell: &LatticeCell,
    edge: usize,
    iso: f64,
    patch: &mut SlabPatch,
    local: &mut HashMap<u64, usize>,
) -> usize {
    let [a, b] = EDGES[edge];
    let axis = (0..3).find(|&i| CORNERS[a][i] != CORNERS[b][i]).unwrap_or(0);
    let (lower, upper) = if CORNERS[a][axis] < CORNERS[b][axis] {
        (a, b)
    } else {
        (b, a)
    };
    let lower_key = [0, 1, 2].map(|i| cell.key[i] + CORNERS[lower][i]);

    let key = lattice.index(lower_key) as u64 * 3 + axis as u64;
    if let Some(&index) = local.get(&key) {
        return index;
    }

    let (v_lower, v_upper) = (cell.values[lower], cell.values[upper]);
    let t = ((iso - v_lower) / (v_upper - v_lower)).clamp(0.0, 1.0);
    let mut position = lattice.position(lower_key);
    position[axis] += t * lattice.spacing;

    let index = patch.push_vertex(Some(key), position);
    local.insert(key, index);
    index
}

/// Merge the triangles of one cell into one polygon per edge-connected patch
///
/// A patch whose boundary is not a single simple loop keeps its triangles.
fn cell_polygons(triangles: &[[usize; 3]]) -> Vec<Face> {
    let mut component: Vec<usize> = (0..triangles.len()).collect();
    for i in 0..triangles.len() {
        for j in i + 1..triangles.len() {
            if shares_edge(&triangles[i], &triangles[j]) && component[i] != component[j] {
                let (from, to) = (component[j], component[i]);
                for c in component.iter_mut().filter(|c| **c == from) {
                    *c = to;
                }
            }
        }
    }

    let mut polygons = Vec::new();
    let mut seen = Vec::new();
    for &label in &component {
        if seen.contains(&label) {
            continue;
        }
        seen.push(label);
        let members: Vec<[usize; 3]> = triangles
            .iter()
            .zip(&component)
            .filter(|&(_, &c)| c == label)
            .map(|(t, _)| *t)
            .collect();
        match boundary_loop(&members) {
            Some(polygon) => polygons.push(polygon),
            None => polygons.extend(members.iter().map(|t| t.to_vec())),
        }
    }
    polygons
}

fn shares_edge(a: &[usize; 3], b: &[usize; 3]) -> bool {
    a.iter().filter(|v| b.contains(v)).count() >= 2
}

/// The boundary of a consistently wound patch as one loop
fn boundary_loop(triangles: &[[usize; 3]]) -> Option<Face> {
    if triangles.len() == 1 {
        return Some(triangles[0].to_vec());
    }
    let directed: Vec<(usize, usize)> = triangles
        .iter()
        .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
        .collect();
    let boundary: Vec<(usize, usize)> = directed
        .iter()
        .filter(|(a, b)| !directed.contains(&(*b, *a)))
        .copied()
        .collect();

    let mut next: HashMap<usize, usize> = HashMap::new();
    for &(a, b) in &boundary {
        if next.insert(a, b).is_some() {
            return None;
        }
    }

    let start = boundary.first()?.0;
    let mut polygon = vec![start];
    let mut current = *next.get(&start)?;
    while current != start {
        if polygon.len() > boundary.len() {
            return None;
        }
        polygon.push(current);
        current = *next.get(&current)?;
    }
    (polygon.len() == boundary.len()).then_some(polygon)
}

/// Extract the `iso_level` surface with default settings
pub fn marching_cubes(grid: &ScalarGrid, iso_level: f64) -> Result<PolygonMesh> {
    let pool = WorkerPool::with_workers(DEFAULT_WORKERS)?;
    MarchingCubes::new(MarchingCubesConfig::default().with_iso_level(iso_level))?.extract(grid, &pool)
}
