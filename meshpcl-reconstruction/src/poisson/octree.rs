//! Reconstruction domain, per-level lattices, the sparse sample octree and
//! the vertex sets that carry unknowns

use meshpcl_core::{bounding_box, Error, Point3d, Result, Vector3d};
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// Finest cells of margin added on each side of the scaled bounding cube
const MARGIN_CELLS: f64 = 4.0;

/// The cube in which the indicator function is solved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Domain {
    /// Minimum corner
    pub origin: Point3d,
    /// Edge length
    pub side: f64,
    /// Finest octree level
    pub depth: usize,
}

impl Domain {
    /// Cube centered on the bounding box of `positions`, with side `scale`
    /// times the largest extent plus a margin of finest cells
    pub fn enclosing(positions: &[Point3d], depth: usize, scale: f64) -> Result<Self> {
        let (min, max) = bounding_box(positions.iter().copied())
            .ok_or_else(|| Error::degenerate("cannot fit a domain around no samples"))?;
        let extent = (max - min).max();
        if !(extent.is_finite() && extent > 0.0) {
            return Err(Error::degenerate(format!(
                "samples span no volume (largest extent {})",
                extent
            )));
        }

        let cells = (1u64 << depth) as f64;
        let side = scale * extent * (1.0 + 2.0 * MARGIN_CELLS / cells);
        let center = nalgebra::center(&min, &max);
        Ok(Self {
            origin: center - Vector3d::repeat(side / 2.0),
            side,
            depth,
        })
    }

    /// Vertex lattice of octree level `level`
    pub fn level(&self, level: usize) -> LevelGrid {
        let cells = 1usize << level;
        LevelGrid {
            level,
            cells,
            spacing: self.side / cells as f64,
            origin: self.origin,
        }
    }

    /// Node of `level` containing `p`, clamped into the domain
    pub fn node_key(&self, p: &Point3d, level: usize) -> NodeKey {
        let cells = 1u64 << level;
        let mut key = [0usize; 3];
        for axis in 0..3 {
            let cell = ((p[axis] - self.origin[axis]) / self.side * cells as f64).floor();
            key[axis] = cell.clamp(0.0, (cells - 1) as f64) as usize;
        }
        key
    }
}

/// Vertex or node coordinates on one level, `x` first
pub type NodeKey = [usize; 3];

/// Geometry of the `(2^level + 1)^3` vertices of one octree level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelGrid {
    pub level: usize,
    /// Cells per axis
    pub cells: usize,
    /// Cell width
    pub spacing: f64,
    pub origin: Point3d,
}

impl LevelGrid {
    /// Vertices per axis
    #[inline]
    pub fn side(&self) -> usize {
        self.cells + 1
    }

    /// Vertices of the full lattice, whether or not they carry unknowns
    pub fn vertex_count(&self) -> usize {
        self.side().pow(3)
    }

    /// Vertices off the domain boundary
    pub fn interior_count(&self) -> usize {
        (self.cells - 1).pow(3)
    }

    /// True unless the vertex lies on the domain boundary
    #[inline]
    pub fn is_interior(&self, [i, j, k]: NodeKey) -> bool {
        let inner = 1..self.cells;
        inner.contains(&i) && inner.contains(&j) && inner.contains(&k)
    }

    pub fn position(&self, [i, j, k]: NodeKey) -> Point3d {
        self.origin + Vector3d::new(i as f64, j as f64, k as f64) * self.spacing
    }

    /// Containing cell of `p` and the fractional offset inside it
    pub fn locate(&self, p: &Point3d) -> (NodeKey, [f64; 3]) {
        let mut cell = [0usize; 3];
        let mut frac = [0.0f64; 3];
        for axis in 0..3 {
            let g = (p[axis] - self.origin[axis]) / self.spacing;
            let base = g.floor().clamp(0.0, (self.cells - 1) as f64);
            cell[axis] = base as usize;
            frac[axis] = (g - base).clamp(0.0, 1.0);
        }
        (cell, frac)
    }
}

/// Sample counts of every occupied node, per level
#[derive(Debug, Clone)]
pub struct SampleOctree {
    domain: Domain,
    counts: Vec<HashMap<NodeKey, usize>>,
}

impl SampleOctree {
    /// Count `positions` into the nodes of every level down to the domain depth
    pub fn build(domain: &Domain, positions: &[Point3d]) -> Self {
        let mut counts = vec![HashMap::new(); domain.depth + 1];
        for p in positions {
            for (level, nodes) in counts.iter_mut().enumerate() {
                *nodes.entry(domain.node_key(p, level)).or_insert(0) += 1;
            }
        }
        Self {
            domain: *domain,
            counts,
        }
    }

    pub fn depth(&self) -> usize {
        self.domain.depth
    }

    /// Samples in the node of `level` around `p`
    pub fn count(&self, p: &Point3d, level: usize) -> usize {
        self.counts
            .get(level)
            .and_then(|nodes| nodes.get(&self.domain.node_key(p, level)))
            .copied()
            .unwrap_or(0)
    }

    /// Occupied nodes at `level`
    pub fn occupied_nodes(&self, level: usize) -> usize {
        self.counts.get(level).map_or(0, HashMap::len)
    }

    /// Keys of the occupied nodes at `level`, in no particular order
    pub fn nodes(&self, level: usize) -> impl Iterator<Item = &NodeKey> + '_ {
        self.counts.get(level).into_iter().flat_map(HashMap::keys)
    }

    /// Every node of `level` within `margin` nodes (per axis) of an occupied one
    pub fn dilated(&self, level: usize, margin: usize) -> HashSet<NodeKey> {
        let last = (1usize << level) - 1;
        let mut near = HashSet::new();
        for node in self.nodes(level) {
            let lo = node.map(|c| c.saturating_sub(margin));
            let hi = node.map(|c| (c + margin).min(last));
            for k in lo[2]..=hi[2] {
                for j in lo[1]..=hi[1] {
                    for i in lo[0]..=hi[0] {
                        near.insert([i, j, k]);
                    }
                }
            }
        }
        near
    }

    /// Deepest level whose node around `p` holds at least
    /// `samples_per_node` samples, with that node's count
    pub fn splat_level(&self, p: &Point3d, samples_per_node: f64) -> (usize, usize) {
        for level in (0..=self.depth()).rev() {
            let count = self.count(p, level);
            if count as f64 >= samples_per_node {
                return (level, count);
            }
        }
        (0, self.count(p, 0))
    }
}

/// The vertices of one level that carry unknowns, sorted by `(z, y, x)`
///
/// Every other vertex of the level is fixed: boundary vertices hold the
/// boundary value and the rest take the prolonged coarser solution.
#[derive(Debug, Clone)]
pub struct ActiveSet {
    grid: LevelGrid,
    keys: Vec<NodeKey>,
    lookup: HashMap<NodeKey, usize>,
}

impl ActiveSet {
    /// All interior vertices of `grid`
    pub fn full(grid: LevelGrid, max_vertices: usize) -> Result<Self> {
        check_budget(&grid, grid.interior_count(), max_vertices)?;
        let inner = 1..grid.cells;
        let mut keys = Vec::with_capacity(grid.interior_count());
        for k in inner.clone() {
            for j in inner.clone() {
                for i in inner.clone() {
                    keys.push([i, j, k]);
                }
            }
        }
        Ok(Self::from_keys(grid, keys))
    }

    /// Interior vertices within `ring` vertices of an occupied node of the
    /// grid's level
    ///
    /// Fails with a configuration error once the band grows past
    /// `max_vertices`.
    pub fn band(grid: LevelGrid, octree: &SampleOctree, ring: usize, max_vertices: usize) -> Result<Self> {
        let mut band = HashSet::new();
        for node in octree.nodes(grid.level) {
            // A node spans vertices node..=node + 1
            let lo = node.map(|c| c.saturating_sub(ring).max(1));
            let hi = node.map(|c| (c + 1 + ring).min(grid.cells - 1));
            for k in lo[2]..=hi[2] {
                for j in lo[1]..=hi[1] {
                    for i in lo[0]..=hi[0] {
                        band.insert([i, j, k]);
                    }
                }
            }
            check_budget(&grid, band.len(), max_vertices)?;
        }
        Ok(Self::from_keys(grid, band.into_iter().collect()))
    }

    fn from_keys(grid: LevelGrid, mut keys: Vec<NodeKey>) -> Self {
        keys.sort_unstable_by_key(|&[i, j, k]| (k, j, i));
        let lookup = keys.iter().enumerate().map(|(index, &key)| (key, index)).collect();
        Self { grid, keys, lookup }
    }

    pub fn grid(&self) -> &LevelGrid {
        &self.grid
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[NodeKey] {
        &self.keys
    }

    /// Unknown of a vertex, if it has one
    #[inline]
    pub fn index_of(&self, key: &NodeKey) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    /// Index ranges of consecutive blocks of `layers` z-layers
    pub fn slabs(&self, layers: usize) -> Vec<Range<usize>> {
        let layers = layers.max(1);
        let mut slabs = Vec::new();
        let mut start = 0;
        while start < self.keys.len() {
            let block = self.keys[start][2] / layers;
            let end = start + self.keys[start..].partition_point(|key| key[2] / layers == block);
            slabs.push(start..end);
            start = end;
        }
        slabs
    }

    /// Index range of the unknowns in row `(y, z)` with `x` in `lo..=hi`
    pub fn row(&self, y: usize, z: usize, lo: usize, hi: usize) -> Range<usize> {
        let order = |key: &NodeKey| (key[2], key[1], key[0]);
        let start = self.keys.partition_point(|key| order(key) < (z, y, lo));
        let end = self.keys.partition_point(|key| order(key) <= (z, y, hi));
        start..end.max(start)
    }
}

fn check_budget(grid: &LevelGrid, vertices: usize, max_vertices: usize) -> Result<()> {
    if vertices > max_vertices {
        return Err(Error::config(format!(
            "level {} needs at least {} unknowns, above the limit of {}; lower the depth or raise the limit",
            grid.level, vertices, max_vertices
        )));
    }
    Ok(())
}
