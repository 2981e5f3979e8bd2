//! Screened Poisson solve on one level of the cascade
//!
//! Each level solves `L χ + β S χ = b` with conjugate gradients, where `L` is
//! the 7-point Laplacian, `S` pulls χ toward the sample values through
//! trilinear interpolation, and only the vertices of an [`ActiveSet`] are
//! unknowns. Every other vertex is fixed (boundary vertices at one half, the
//! rest at the prolonged coarser solution), and its contribution is moved to
//! the right-hand side.

use super::octree::{ActiveSet, NodeKey};
use meshpcl_algorithms::WorkerPool;
use meshpcl_core::{Error, Point3d, Result};
use tracing::{debug, warn};

/// Indicator value on the domain boundary
pub const BOUNDARY_VALUE: f64 = 0.5;

/// Neighbor slot of a fixed vertex
const FIXED: usize = usize::MAX;

/// Lattice offsets of the six face neighbors
const NEIGHBORS: [[isize; 3]; 6] = [[-1, 0, 0], [1, 0, 0], [0, -1, 0], [0, 1, 0], [0, 0, -1], [0, 0, 1]];

/// A footprint corner: an unknown, or a vertex with a known value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Active(usize),
    Fixed(f64),
}

/// Trilinear footprint of one sample on a level
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    /// The eight vertices around the sample
    pub slots: [Slot; 8],
    pub weights: [f64; 8],
    /// Sample confidence
    pub confidence: f64,
}

impl Footprint {
    /// `fixed` gives the value of every vertex without an unknown
    pub fn new(set: &ActiveSet, position: &Point3d, confidence: f64, fixed: impl Fn(NodeKey) -> f64) -> Self {
        let (cell, frac) = set.grid().locate(position);
        let mut slots = [Slot::Fixed(0.0); 8];
        let mut weights = [0.0f64; 8];
        for c in 0..8 {
            let offset = [c & 1, (c >> 1) & 1, (c >> 2) & 1];
            let key = [cell[0] + offset[0], cell[1] + offset[1], cell[2] + offset[2]];
            slots[c] = match set.index_of(&key) {
                Some(index) => Slot::Active(index),
                None => Slot::Fixed(fixed(key)),
            };
            weights[c] = (0..3)
                .map(|axis| if offset[axis] == 1 { frac[axis] } else { 1.0 - frac[axis] })
                .product();
        }
        Self {
            slots,
            weights,
            confidence,
        }
    }

    /// Interpolated value at the sample, given the unknowns
    #[inline]
    pub fn interpolate(&self, unknowns: &[f64]) -> f64 {
        self.active_part(unknowns) + self.fixed_part()
    }

    #[inline]
    fn active_part(&self, unknowns: &[f64]) -> f64 {
        self.slots
            .iter()
            .zip(&self.weights)
            .map(|(slot, &w)| match slot {
                Slot::Active(v) => w * unknowns[*v],
                Slot::Fixed(_) => 0.0,
            })
            .sum()
    }

    fn fixed_part(&self) -> f64 {
        self.slots
            .iter()
            .zip(&self.weights)
            .map(|(slot, &w)| match slot {
                Slot::Fixed(value) => w * value,
                Slot::Active(_) => 0.0,
            })
            .sum()
    }
}

/// Matrix-free screened Laplacian restricted to the unknowns of one level
pub struct ScreenedLaplacian<'a> {
    set: &'a ActiveSet,
    /// Unknown of each face neighbor, or `FIXED`
    neighbors: Vec<[usize; 6]>,
    /// Sum of the fixed face-neighbor values of each unknown
    fixed_load: Vec<f64>,
    footprints: &'a [Footprint],
    /// Footprint corners incident to each unknown, as (footprint, weight)
    incidence_starts: Vec<usize>,
    incidences: Vec<(usize, f64)>,
    screening: f64,
    block_len: usize,
    pool: &'a WorkerPool,
}

impl<'a> ScreenedLaplacian<'a> {
    /// `fixed` gives the value of every vertex without an unknown; blocks
    /// of roughly `slab_layers` z-layers are processed in parallel
    pub fn new(
        set: &'a ActiveSet,
        footprints: &'a [Footprint],
        screening: f64,
        slab_layers: usize,
        pool: &'a WorkerPool,
        fixed: impl Fn(NodeKey) -> f64 + Sync + Send,
    ) -> Self {
        let rows = pool.map(set.keys(), |key| {
            let mut slots = [FIXED; 6];
            let mut load = 0.0;
            for (slot, offset) in slots.iter_mut().zip(NEIGHBORS) {
                // Unknowns are interior, so every neighbor exists
                let neighbor = [0, 1, 2].map(|axis| key[axis].wrapping_add_signed(offset[axis]));
                match set.index_of(&neighbor) {
                    Some(index) => *slot = index,
                    None => load += fixed(neighbor),
                }
            }
            (slots, load)
        });
        let (neighbors, fixed_load): (Vec<[usize; 6]>, Vec<f64>) = rows.into_iter().unzip();

        let mut counts = vec![0usize; set.len() + 1];
        for footprint in footprints {
            for slot in &footprint.slots {
                if let Slot::Active(v) = slot {
                    counts[*v + 1] += 1;
                }
            }
        }
        for v in 0..set.len() {
            counts[v + 1] += counts[v];
        }
        let mut cursor = counts.clone();
        let mut incidences = vec![(0usize, 0.0f64); counts[set.len()]];
        for (index, footprint) in footprints.iter().enumerate() {
            for (slot, &w) in footprint.slots.iter().zip(&footprint.weights) {
                if let Slot::Active(v) = slot {
                    incidences[cursor[*v]] = (index, w);
                    cursor[*v] += 1;
                }
            }
        }

        let slabs = set.slabs(slab_layers).len().max(1);
        Self {
            set,
            neighbors,
            fixed_load,
            footprints,
            incidence_starts: counts,
            incidences,
            screening,
            block_len: set.len().div_ceil(slabs).max(1),
            pool,
        }
    }

    pub fn set(&self) -> &ActiveSet {
        self.set
    }

    /// Unknowns per parallel block
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// `output = A · input` over the unknowns
    pub fn apply(&self, input: &[f64], output: &mut [f64]) {
        let projected: Vec<f64> = if self.screening == 0.0 {
            Vec::new()
        } else {
            self.pool
                .map(self.footprints, |f| self.screening * f.confidence * f.active_part(input))
        };

        self.pool.for_each_block(output, self.block_len, |block, chunk| {
            let start = block * self.block_len;
            for (offset, out) in chunk.iter_mut().enumerate() {
                let v = start + offset;
                let mut value = 6.0 * input[v];
                for &n in &self.neighbors[v] {
                    if n != FIXED {
                        value -= input[n];
                    }
                }
                if !projected.is_empty() {
                    let incident = &self.incidences[self.incidence_starts[v]..self.incidence_starts[v + 1]];
                    value += incident.iter().map(|&(f, w)| w * projected[f]).sum::<f64>();
                }
                *out = value;
            }
        });
    }

    /// Right-hand side over the unknowns with the fixed vertices moved over
    pub fn load(&self, divergence: &[f64]) -> Vec<f64> {
        let fixed_screening: Vec<f64> = self
            .footprints
            .iter()
            .map(|f| self.screening * f.confidence * f.fixed_part())
            .collect();
        self.pool.map_range(self.set.len(), |v| {
            let incident = &self.incidences[self.incidence_starts[v]..self.incidence_starts[v + 1]];
            divergence[v] + self.fixed_load[v] - incident.iter().map(|&(f, w)| w * fixed_screening[f]).sum::<f64>()
        })
    }
}

/// Stopping rule of one level solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub max_iterations: usize,
    /// Relative residual at which the solve stops
    pub tolerance: f64,
}

/// Outcome of one level solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelReport {
    pub level: usize,
    /// Vertices solved for at this level
    pub unknowns: usize,
    pub iterations: usize,
    pub relative_residual: f64,
    pub converged: bool,
}

/// Solve one level with conjugate gradients, starting from `initial`
///
/// `divergence` and `initial` hold one entry per unknown. The residual is
/// measured relative to the right-hand side with the fixed vertices moved
/// over. A direction with non-positive curvature or a non-finite value
/// aborts the solve with a reconstruction error.
pub fn solve_level(
    operator: &ScreenedLaplacian<'_>,
    divergence: &[f64],
    initial: Vec<f64>,
    settings: &SolverSettings,
    pool: &WorkerPool,
) -> Result<(Vec<f64>, LevelReport)> {
    let level = operator.set().grid().level;
    let len = operator.set().len();
    let block = operator.block_len();

    let rhs = operator.load(divergence);
    let reference_norm = dot(&rhs, &rhs, block, pool).sqrt();

    let mut x = initial;
    let mut scratch = vec![0.0; len];
    operator.apply(&x, &mut scratch);
    let mut r: Vec<f64> = pool.map_range(len, |v| rhs[v] - scratch[v]);
    let mut p = r.clone();
    let mut rr = dot(&r, &r, block, pool);
    let threshold = settings.tolerance * reference_norm;

    let mut iterations = 0;
    while iterations < settings.max_iterations && rr.sqrt() > threshold {
        operator.apply(&p, &mut scratch);
        let curvature = dot(&p, &scratch, block, pool);
        if !(curvature.is_finite() && curvature > 0.0) {
            return Err(Error::reconstruction(format!(
                "conjugate gradient broke down at level {} (curvature {})",
                level, curvature
            )));
        }
        let alpha = rr / curvature;
        axpy(alpha, &p, &mut x, block, pool);
        axpy(-alpha, &scratch, &mut r, block, pool);

        let rr_next = dot(&r, &r, block, pool);
        if !rr_next.is_finite() {
            return Err(Error::reconstruction(format!("indicator solve diverged at level {}", level)));
        }
        let beta = rr_next / rr;
        rr = rr_next;
        pool.for_each_block(&mut p, block, |b, chunk| {
            let start = b * block;
            for (offset, value) in chunk.iter_mut().enumerate() {
                *value = r[start + offset] + beta * *value;
            }
        });
        iterations += 1;
    }

    let relative_residual = if reference_norm > 0.0 {
        rr.sqrt() / reference_norm
    } else {
        rr.sqrt()
    };
    let report = LevelReport {
        level,
        unknowns: len,
        iterations,
        relative_residual,
        converged: rr.sqrt() <= threshold,
    };
    if report.converged {
        debug!(level, unknowns = len, iterations, relative_residual, "solved level");
    } else {
        warn!(
            level,
            unknowns = len,
            iterations,
            relative_residual,
            "indicator solve stopped before reaching tolerance"
        );
    }
    Ok((x, report))
}

/// Inner product summed block by block in a fixed order
fn dot(a: &[f64], b: &[f64], block: usize, pool: &WorkerPool) -> f64 {
    let blocks = a.len().div_ceil(block);
    let partial = pool.map_range(blocks, |i| {
        let range = i * block..((i + 1) * block).min(a.len());
        a[range.clone()].iter().zip(&b[range]).map(|(x, y)| x * y).sum::<f64>()
    });
    partial.iter().sum()
}

/// `y += alpha * x`
fn axpy(alpha: f64, x: &[f64], y: &mut [f64], block: usize, pool: &WorkerPool) {
    pool.for_each_block(y, block, |b, chunk| {
        let start = b * block;
        for (offset, value) in chunk.iter_mut().enumerate() {
            *value += alpha * x[start + offset];
        }
    });
}
