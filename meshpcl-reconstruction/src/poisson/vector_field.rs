//! Splatting oriented samples into the divergence of the normal field
//!
//! Every sample spreads its (area weighted) normal with a separable tent
//! kernel. The divergence at a lattice vertex is the difference of the field
//! across the six half-edges around it, which only needs the kernel itself.

use super::octree::{ActiveSet, LevelGrid};
use meshpcl_algorithms::WorkerPool;
use meshpcl_core::{Point3d, Vector3d};

/// Kernel radius never drops below this many cells of the solve level
const MIN_KERNEL_CELLS: f64 = 1.5;

/// One oriented sample prepared for splatting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Point3d,
    /// Normal to splat; unit length unless confidence weighting is on
    pub normal: Vector3d,
    /// Confidence of the sample in the screening term and iso value
    pub weight: f64,
    /// Width of the octree node the sample was splatted from
    pub radius: f64,
    /// Surface area the sample stands for
    pub area: f64,
}

/// Vertex range touched by one sample at one level (inclusive bounds)
#[derive(Debug, Clone, Copy)]
struct Support {
    lo: [usize; 3],
    hi: [usize; 3],
    radius: f64,
}

impl Support {
    fn new(grid: &LevelGrid, sample: &Sample) -> Self {
        let radius = sample.radius.max(MIN_KERNEL_CELLS * grid.spacing);
        let last = (grid.cells - 1) as f64;
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        for axis in 0..3 {
            let offset = sample.position[axis] - grid.origin[axis];
            lo[axis] = ((offset - radius) / grid.spacing).floor().clamp(1.0, last) as usize;
            hi[axis] = ((offset + radius) / grid.spacing).ceil().clamp(1.0, last) as usize;
        }
        Self { lo, hi, radius }
    }
}

/// Separable tent kernel of radius `r`, normalized to unit integral
#[inline]
fn tent(d: &Vector3d, r: f64) -> f64 {
    let k = |x: f64| (1.0 - x.abs() / r).max(0.0);
    k(d.x) * k(d.y) * k(d.z) / (r * r * r)
}

/// Right-hand side of the Poisson system at every unknown of `set`
///
/// The unknowns are split into slabs of `slab_layers` z-layers and every
/// worker fills its own slab.
///
/// # Arguments
/// * `set` - Unknowns of the solve level
/// * `samples` - Prepared samples
/// * `pool` - Worker pool
/// * `slab_layers` - z-layers per parallel block
///
/// # Returns
/// * `Vec<f64>` - One value per unknown, in the order of `set`
pub fn divergence(set: &ActiveSet, samples: &[Sample], pool: &WorkerPool, slab_layers: usize) -> Vec<f64> {
    let grid = set.grid();
    let supports: Vec<Support> = samples.iter().map(|s| Support::new(grid, s)).collect();
    let half = 0.5 * grid.spacing;
    let keys = set.keys();

    let slabs = pool.map(&set.slabs(slab_layers), |range| {
        let mut slab = vec![0.0; range.len()];
        let first_layer = keys[range.start][2];
        let last_layer = keys[range.end - 1][2];

        for (sample, support) in samples.iter().zip(&supports) {
            let k_lo = support.lo[2].max(first_layer);
            let k_hi = support.hi[2].min(last_layer);
            for k in k_lo..=k_hi {
                for j in support.lo[1]..=support.hi[1] {
                    for v in set.row(j, k, support.lo[0], support.hi[0]) {
                        let d = grid.position(keys[v]) - sample.position;
                        let mut flux = 0.0;
                        for axis in 0..3 {
                            let mut below = d;
                            below[axis] -= half;
                            let mut above = d;
                            above[axis] += half;
                            flux += sample.normal[axis] * (tent(&below, support.radius) - tent(&above, support.radius));
                        }
                        slab[v - range.start] += grid.spacing * sample.area * flux;
                    }
                }
            }
        }
        slab
    });
    slabs.concat()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poisson::octree::{Domain, SampleOctree};
    use approx::assert_relative_eq;

    fn single_sample_grid() -> (LevelGrid, Sample) {
        let corners = [Point3d::new(-1.0, -1.0, -1.0), Point3d::new(1.0, 1.0, 1.0)];
        let domain = Domain::enclosing(&corners, 4, 1.0).unwrap();
        let grid = domain.level(4);
        let sample = Sample {
            position: Point3d::new(0.01, -0.02, 0.03),
            normal: Vector3d::z(),
            weight: 1.0,
            radius: 2.0 * grid.spacing,
            area: 0.1,
        };
        (grid, sample)
    }

    #[test]
    fn tent_integrates_to_one() {
        let r = 0.7;
        let step = r / 20.0;
        let mut total = 0.0;
        for i in -20..=20 {
            for j in -20..=20 {
                for k in -20..=20 {
                    let d = Vector3d::new(i as f64, j as f64, k as f64) * step;
                    total += tent(&d, r) * step * step * step;
                }
            }
        }
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn slab_size_does_not_change_the_result() {
        let (grid, sample) = single_sample_grid();
        let set = ActiveSet::full(grid, usize::MAX).unwrap();
        let pool = WorkerPool::with_workers(3).unwrap();
        let a = divergence(&set, &[sample], &pool, 1);
        let b = divergence(&set, &[sample], &pool, 5);
        let c = divergence(&set, &[sample], &pool, 100);
        assert_eq!(a.len(), set.len());
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn divergence_is_antisymmetric_along_the_normal() {
        let (grid, sample) = single_sample_grid();
        let set = ActiveSet::full(grid, usize::MAX).unwrap();
        let pool = WorkerPool::with_workers(3).unwrap();
        let rhs = divergence(&set, &[sample], &pool, 4);
        let at = |i: usize, j: usize, k: usize| rhs[set.index_of(&[i, j, k]).unwrap()];

        // Along an upward normal the column sums to a sink below the sample and a source above
        let (cell, _) = grid.locate(&sample.position);
        let below: f64 = (1..=cell[2]).map(|k| at(cell[0], cell[1], k)).sum();
        let above: f64 = (cell[2] + 1..grid.cells).map(|k| at(cell[0], cell[1], k)).sum();
        assert!(below < 0.0);
        assert!(above > 0.0);

        // A divergence of a compactly supported field sums to zero
        let total: f64 = rhs.iter().sum();
        assert!(total.abs() < 1e-12);
    }

    #[test]
    fn band_entries_match_the_full_lattice() {
        let (grid, sample) = single_sample_grid();
        let domain = Domain::enclosing(&[Point3d::new(-1.0, -1.0, -1.0), Point3d::new(1.0, 1.0, 1.0)], 4, 1.0).unwrap();
        let octree = SampleOctree::build(&domain, &[sample.position]);
        let full = ActiveSet::full(grid, usize::MAX).unwrap();
        let band = ActiveSet::band(grid, &octree, 2, usize::MAX).unwrap();
        let pool = WorkerPool::with_workers(3).unwrap();

        let dense = divergence(&full, &[sample], &pool, 3);
        let sparse = divergence(&band, &[sample], &pool, 3);
        assert_eq!(sparse.len(), band.len());
        for (key, value) in band.keys().iter().zip(&sparse) {
            assert_eq!(*value, dense[full.index_of(key).unwrap()]);
        }
    }
}
