//! The indicator function across the levels of the cascade
//!
//! Each level stores χ only at its active vertices. A vertex without an
//! unknown takes the boundary value on the domain boundary and otherwise the
//! trilinear prolongation of the next coarser level, so χ is defined at
//! every vertex of every level.

use super::octree::{ActiveSet, LevelGrid, NodeKey, SampleOctree};
use super::solver::BOUNDARY_VALUE;
use crate::marching_cubes::{Lattice, LatticeCell, ScalarGrid};
use meshpcl_algorithms::WorkerPool;
use meshpcl_core::{Error, Point3d, Result};
use tracing::debug;

/// Cells refined per parallel work item
const REFINE_CHUNK: usize = 1024;

/// Solved unknowns of one level
#[derive(Debug, Clone)]
pub struct LevelField {
    pub set: ActiveSet,
    pub values: Vec<f64>,
}

/// Solved levels, coarse to fine, each one level deeper than the last
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    levels: Vec<LevelField>,
}

impl Hierarchy {
    pub fn push(&mut self, set: ActiveSet, values: Vec<f64>) {
        self.levels.push(LevelField { set, values });
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// χ at a vertex of the `step`-th solved level
    pub fn value(&self, step: usize, key: NodeKey) -> f64 {
        let field = &self.levels[step];
        if !field.set.grid().is_interior(key) {
            return BOUNDARY_VALUE;
        }
        match field.set.index_of(&key) {
            Some(index) => field.values[index],
            None if step == 0 => BOUNDARY_VALUE,
            None => self.prolong(step - 1, key),
        }
    }

    /// Value of a vertex without an unknown on `grid`, the level just below
    /// the finest solved one
    pub fn fixed_value(&self, grid: &LevelGrid, key: NodeKey) -> f64 {
        if !grid.is_interior(key) || self.levels.is_empty() {
            return BOUNDARY_VALUE;
        }
        self.prolong(self.levels.len() - 1, key)
    }

    /// Trilinear interpolation of level `step` at a vertex of the next level
    fn prolong(&self, step: usize, fine: NodeKey) -> f64 {
        let mut value = 0.0;
        for c in 0..8 {
            let offset = [c & 1, (c >> 1) & 1, (c >> 2) & 1];
            let mut weight = 1.0;
            let mut coarse = [0usize; 3];
            for axis in 0..3 {
                coarse[axis] = fine[axis] / 2 + offset[axis];
                // Even vertices coincide with a coarse one, odd ones lie halfway
                weight *= match (fine[axis] % 2, offset[axis]) {
                    (0, 0) => 1.0,
                    (0, _) => 0.0,
                    _ => 0.5,
                };
            }
            if weight != 0.0 {
                value += weight * self.value(step, coarse);
            }
        }
        value
    }

    /// Trilinear value of χ at `p` on the finest level, clamped to the domain
    pub fn sample(&self, p: &Point3d) -> f64 {
        let Some(finest) = self.levels.len().checked_sub(1) else {
            return BOUNDARY_VALUE;
        };
        let grid = self.levels[finest].set.grid();
        let (cell, frac) = grid.locate(p);
        let values = corner_keys(cell).map(|key| self.value(finest, key));
        LatticeCell { key: cell, values }.interpolate(frac)
    }

    /// Vertex lattice of the finest level
    pub fn lattice(&self) -> Option<Lattice> {
        self.levels.last().map(|field| {
            let grid = field.set.grid();
            Lattice {
                origin: grid.origin,
                spacing: grid.spacing,
                vertices: [grid.side(); 3],
            }
        })
    }

    /// Finest-level cells through which the `iso` level set passes
    ///
    /// Starting from every cell of the coarsest level, a cell is subdivided
    /// when it straddles `iso` or lies within `margin` nodes of a sample at
    /// its level, so thin features that a coarse cell misses are still found
    /// near the samples. The result is ordered by `z`, then `y`, then `x`.
    pub fn surface_cells(
        &self,
        iso: f64,
        octree: &SampleOctree,
        margin: usize,
        pool: &WorkerPool,
    ) -> Result<Vec<LatticeCell>> {
        let coarsest = self
            .levels
            .first()
            .ok_or_else(|| Error::reconstruction("indicator function has no solved level"))?;
        let grid = coarsest.set.grid();
        let dense = ScalarGrid::from_values(
            [grid.side(); 3],
            grid.origin,
            grid.spacing,
            pool.map_range(grid.vertex_count(), |v| {
                let side = grid.side();
                self.value(0, [v % side, (v / side) % side, v / (side * side)])
            }),
        )?;
        let mut cells = dense.cells();

        for step in 1..self.levels.len() {
            let coarse_level = self.levels[step - 1].set.grid().level;
            let near = octree.dilated(coarse_level, margin);
            let fine = &self.levels[step];
            let exact = |key: NodeKey| {
                if !fine.set.grid().is_interior(key) {
                    Some(BOUNDARY_VALUE)
                } else {
                    fine.set.index_of(&key).map(|index| fine.values[index])
                }
            };

            let chunks: Vec<&[LatticeCell]> = cells.chunks(REFINE_CHUNK).collect();
            let refined = pool.map(&chunks, |chunk| {
                chunk
                    .iter()
                    .filter(|cell| cell.straddles(iso) || near.contains(&cell.key))
                    .flat_map(|cell| cell.subdivide(exact))
                    .collect::<Vec<_>>()
            });
            cells = refined.concat();
            debug!(level = fine.set.grid().level, candidates = cells.len(), "refined surface cells");
        }

        cells.retain(|cell| cell.straddles(iso));
        cells.sort_unstable_by_key(|cell| (cell.key[2], cell.key[1], cell.key[0]));
        Ok(cells)
    }
}

/// The eight corners of a cell, in table order
fn corner_keys([i, j, k]: NodeKey) -> [NodeKey; 8] {
    [
        [i, j, k],
        [i + 1, j, k],
        [i + 1, j + 1, k],
        [i, j + 1, k],
        [i, j, k + 1],
        [i + 1, j, k + 1],
        [i + 1, j + 1, k + 1],
        [i, j + 1, k + 1],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poisson::octree::Domain;
    use approx::assert_relative_eq;

    fn domain() -> Domain {
        Domain::enclosing(&[Point3d::new(0.0, 0.0, 0.0), Point3d::new(1.0, 1.0, 1.0)], 4, 1.0).unwrap()
    }

    fn linear(p: Point3d) -> f64 {
        1.0 + p.x - 2.0 * p.y + 3.0 * p.z
    }

    /// Coarse level 2 holding a linear field, finest level 3 with a small band
    fn two_levels() -> (Hierarchy, SampleOctree) {
        let domain = domain();
        let points = [Point3d::new(0.5, 0.5, 0.5)];
        let octree = SampleOctree::build(&domain, &points);
        let mut hierarchy = Hierarchy::default();

        let coarse = ActiveSet::full(domain.level(2), usize::MAX).unwrap();
        let values = coarse.keys().iter().map(|&key| linear(coarse.grid().position(key))).collect();
        hierarchy.push(coarse, values);

        let grid = domain.level(3);
        let band = ActiveSet::band(grid, &octree, 0, usize::MAX).unwrap();
        let values = band.keys().iter().map(|&key| linear(grid.position(key)) + 0.25).collect();
        hierarchy.push(band, values);
        (hierarchy, octree)
    }

    #[test]
    fn prolongation_reproduces_linear_fields_away_from_the_boundary() {
        let domain = domain();
        let mut hierarchy = Hierarchy::default();
        let coarse = ActiveSet::full(domain.level(2), usize::MAX).unwrap();
        let values = coarse.keys().iter().map(|&key| linear(coarse.grid().position(key))).collect();
        hierarchy.push(coarse, values);

        let fine = domain.level(3);
        // Fine vertices whose coarse parents are all interior
        for k in 2..=6 {
            for j in 2..=6 {
                for i in 2..=6 {
                    let key = [i, j, k];
                    assert_relative_eq!(hierarchy.fixed_value(&fine, key), linear(fine.position(key)), epsilon = 1e-9);
                }
            }
        }
        assert_eq!(hierarchy.fixed_value(&fine, [0, 3, 3]), BOUNDARY_VALUE);
    }

    #[test]
    fn values_prefer_unknowns_then_prolongation() {
        let (hierarchy, _) = two_levels();
        let band = &hierarchy.levels[1].set;
        let grid = *band.grid();

        let solved = band.keys()[0];
        assert_relative_eq!(hierarchy.value(1, solved), linear(grid.position(solved)) + 0.25, epsilon = 1e-12);
        let outside = [2, 2, 2];
        assert!(band.index_of(&outside).is_none());
        assert_relative_eq!(hierarchy.value(1, outside), linear(grid.position(outside)), epsilon = 1e-9);
        assert_eq!(hierarchy.value(1, [8, 2, 2]), BOUNDARY_VALUE);

        let p = grid.position(solved);
        assert_relative_eq!(hierarchy.sample(&p), linear(p) + 0.25, epsilon = 1e-9);
        assert_eq!(hierarchy.lattice().map(|l| l.vertices), Some([9; 3]));
    }

    #[test]
    fn surface_cells_match_a_dense_scan() {
        let (hierarchy, octree) = two_levels();
        let pool = WorkerPool::with_workers(3).unwrap();
        let iso = 1.93;
        let cells = hierarchy.surface_cells(iso, &octree, 1, &pool).unwrap();
        assert!(!cells.is_empty());
        assert!(cells.windows(2).all(|w| (w[0].key[2], w[0].key[1], w[0].key[0]) < (w[1].key[2], w[1].key[1], w[1].key[0])));

        // Every cell of the finest level that straddles the level set, found by brute force
        let cells_per_axis = hierarchy.levels[1].set.grid().cells;
        let mut expected = Vec::new();
        for k in 0..cells_per_axis {
            for j in 0..cells_per_axis {
                for i in 0..cells_per_axis {
                    let values = corner_keys([i, j, k]).map(|key| hierarchy.value(1, key));
                    let cell = LatticeCell { key: [i, j, k], values };
                    if cell.straddles(iso) {
                        expected.push(cell);
                    }
                }
            }
        }
        assert_eq!(cells.len(), expected.len());
        for (found, brute) in cells.iter().zip(&expected) {
            assert_eq!(found.key, brute.key);
            for (a, b) in found.values.iter().zip(&brute.values) {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }
        }
    }
}
