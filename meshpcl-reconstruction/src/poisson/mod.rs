//! Screened Poisson surface reconstruction
//!
//! The oriented samples define a vector field whose divergence drives a
//! screened Poisson equation for an indicator function χ over a cube around
//! the samples. χ is solved level by level, from a coarse lattice up to the
//! configured depth, and the surface is the level set of χ at the weighted
//! mean of its values at the samples.
//!
//! Only the coarsest level is solved on its whole lattice. Finer levels solve
//! for the vertices in a band around the octree nodes that hold samples and
//! take the prolonged coarser solution everywhere else, so memory grows with
//! the number of occupied nodes rather than with the lattice volume.

pub mod field;
pub mod octree;
pub mod solver;
pub mod vector_field;

use crate::marching_cubes::{FaceOutput, Lattice, LatticeCell, MarchingCubes, MarchingCubesConfig};
use field::Hierarchy;
use meshpcl_algorithms::{WorkerPool, WorkerPoolConfig, DEFAULT_WORKERS};
use meshpcl_core::{Error, OrientedCloud, Point3d, PolygonMesh, Result};
use octree::{ActiveSet, Domain, SampleOctree};
use serde::{Deserialize, Serialize};
use solver::{Footprint, LevelReport, ScreenedLaplacian, SolverSettings};
use tracing::{debug, info};
use vector_field::Sample;

/// Fewest samples a reconstruction accepts
pub const MIN_POISSON_POINTS: usize = 4;
/// Deepest supported octree level
pub const MAX_DEPTH: usize = 9;
/// Levels solved below the finest one
const CASCADE_LEVELS: usize = 4;
/// Coarsest level of the cascade
const MIN_CASCADE_LEVEL: usize = 2;
/// Vertices around each occupied node that are solved for on finer levels
const BAND_RING: usize = 2;
/// Nodes around the samples in which cells are refined during extraction
const REFINE_MARGIN: usize = 2;
/// Default limit on the unknowns of one level
pub const DEFAULT_MAX_LEVEL_VERTICES: usize = 1 << 22;

/// Configuration parameters for Poisson reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoissonConfig {
    /// Maximum octree depth; the finest lattice has `2^depth` cells per axis
    pub depth: usize,
    /// Weight of the screening term that pins χ to the iso value at samples
    pub point_weight: f64,
    /// Minimum samples in the node a sample is splatted from
    pub samples_per_node: f64,
    /// Ratio between the domain cube and the bounding box
    pub scale: f64,
    /// Weight samples by their normal magnitude
    pub confidence: bool,
    /// z-layers per parallel block of the solve
    pub solver_divide: usize,
    /// z-layers per parallel block of the extraction
    pub iso_divide: usize,
    /// Emit one polygon per cell patch instead of triangles
    pub output_polygons: bool,
    /// Triangulate cell polygons around an added center vertex
    pub manifold: bool,
    /// Conjugate gradient iterations per level
    pub solver_iterations: usize,
    /// Relative residual at which a level solve stops
    pub solver_tolerance: f64,
    /// Most unknowns one level may have before the solve is refused
    pub max_level_vertices: usize,
    /// Worker threads (clamped to 3..=8)
    pub workers: usize,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            depth: 7,
            point_weight: 4.0,
            samples_per_node: 1.5,
            scale: 1.1,
            confidence: true,
            solver_divide: 8,
            iso_divide: 8,
            output_polygons: false,
            manifold: true,
            solver_iterations: 300,
            solver_tolerance: 1e-6,
            max_level_vertices: DEFAULT_MAX_LEVEL_VERTICES,
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PoissonConfig {
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_point_weight(mut self, point_weight: f64) -> Self {
        self.point_weight = point_weight;
        self
    }

    pub fn with_samples_per_node(mut self, samples_per_node: f64) -> Self {
        self.samples_per_node = samples_per_node;
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_confidence(mut self, confidence: bool) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_output_polygons(mut self, output_polygons: bool) -> Self {
        self.output_polygons = output_polygons;
        self
    }

    pub fn with_manifold(mut self, manifold: bool) -> Self {
        self.manifold = manifold;
        self
    }

    pub fn with_solver_divide(mut self, solver_divide: usize) -> Self {
        self.solver_divide = solver_divide;
        self
    }

    pub fn with_iso_divide(mut self, iso_divide: usize) -> Self {
        self.iso_divide = iso_divide;
        self
    }

    pub fn with_max_level_vertices(mut self, max_level_vertices: usize) -> Self {
        self.max_level_vertices = max_level_vertices;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_DEPTH).contains(&self.depth) {
            return Err(Error::config(format!(
                "Poisson depth must be in 1..={}, got {}",
                MAX_DEPTH, self.depth
            )));
        }
        if !(self.point_weight.is_finite() && self.point_weight >= 0.0) {
            return Err(Error::config(format!(
                "point weight must be finite and non-negative, got {}",
                self.point_weight
            )));
        }
        if !(self.samples_per_node.is_finite() && self.samples_per_node >= 1.0) {
            return Err(Error::config(format!(
                "samples per node must be at least 1, got {}",
                self.samples_per_node
            )));
        }
        if !(self.scale.is_finite() && self.scale >= 1.0) {
            return Err(Error::config(format!(
                "scale must be at least 1 so the domain covers the samples, got {}",
                self.scale
            )));
        }
        if self.solver_divide == 0 || self.iso_divide == 0 {
            return Err(Error::config("solver and iso block sizes must be at least 1"));
        }
        if self.solver_iterations == 0 {
            return Err(Error::config("solver needs at least one iteration"));
        }
        if !(self.solver_tolerance.is_finite() && self.solver_tolerance > 0.0) {
            return Err(Error::config(format!(
                "solver tolerance must be positive, got {}",
                self.solver_tolerance
            )));
        }
        if self.max_level_vertices == 0 {
            return Err(Error::config("the per-level unknown limit must be at least 1"));
        }
        Ok(())
    }

    /// Face layout requested by the polygon and manifold flags
    pub fn face_output(&self) -> FaceOutput {
        FaceOutput::from_flags(self.output_polygons, self.manifold)
    }
}

/// The solved indicator function
#[derive(Debug, Clone)]
pub struct IndicatorField {
    /// χ on every solved level
    pub hierarchy: Hierarchy,
    /// Sample counts of the octree the levels were built from
    pub octree: SampleOctree,
    /// Weighted mean of χ at the samples
    pub iso_value: f64,
    /// One report per solved level, coarse to fine
    pub levels: Vec<LevelReport>,
}

impl IndicatorField {
    /// χ at `p`, clamped to the domain
    pub fn sample(&self, p: &Point3d) -> f64 {
        self.hierarchy.sample(p)
    }

    /// Vertex lattice of the finest level
    pub fn lattice(&self) -> Result<Lattice> {
        self.hierarchy
            .lattice()
            .ok_or_else(|| Error::reconstruction("indicator function has no solved level"))
    }

    /// Finest-level cells the iso-surface passes through
    pub fn surface_cells(&self, pool: &WorkerPool) -> Result<Vec<LatticeCell>> {
        self.hierarchy
            .surface_cells(self.iso_value, &self.octree, REFINE_MARGIN, pool)
    }
}

/// Poisson surface reconstruction with its own worker pool
#[derive(Debug)]
pub struct PoissonReconstructor {
    config: PoissonConfig,
    pool: WorkerPool,
}

impl PoissonReconstructor {
    /// Validate the configuration and create the worker pool
    pub fn new(config: PoissonConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(
            &WorkerPoolConfig::default()
                .with_workers(config.workers)
                .with_thread_name_prefix("meshpcl-poisson"),
        )?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PoissonConfig {
        &self.config
    }

    /// Reconstruct a closed surface from oriented samples
    ///
    /// # Arguments
    /// * `cloud` - At least four samples with non-zero normals
    ///
    /// # Returns
    /// * `Result<PolygonMesh>` - Surface oriented along the sample normals
    ///
    /// # Example
    /// ```rust
    /// use meshpcl_core::{NormalPoint3d, OrientedCloud, Point3d};
    /// use meshpcl_reconstruction::{PoissonConfig, PoissonReconstructor};
    ///
    /// fn main() -> meshpcl_core::Result<()> {
    ///     let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    ///     let cloud: OrientedCloud = (0..400)
    ///         .map(|i| {
    ///             let y = 1.0 - 2.0 * (i as f64 + 0.5) / 400.0;
    ///             let r = (1.0 - y * y).sqrt();
    ///             let p = Point3d::new(r * (golden * i as f64).cos(), y, r * (golden * i as f64).sin());
    ///             NormalPoint3d::new(p, p.coords)
    ///         })
    ///         .collect();
    ///
    ///     let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(4))?;
    ///     let mesh = poisson.reconstruct(&cloud)?;
    ///     assert_eq!(mesh.euler_characteristic(), 2);
    ///     Ok(())
    /// }
    /// ```
    pub fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh> {
        let field = self.indicator(cloud)?;
        let extractor = MarchingCubes::new(
            MarchingCubesConfig::default()
                .with_iso_level(field.iso_value)
                .with_slab_depth(self.config.iso_divide)
                .with_output(self.config.face_output()),
        )?;
        let cells = field.surface_cells(&self.pool)?;
        let mesh = extractor.extract_cells(&field.lattice()?, &cells, &self.pool)?;

        info!(
            samples = cloud.len(),
            depth = self.config.depth,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Poisson reconstruction complete"
        );
        Ok(mesh)
    }

    /// Solve for the indicator function without extracting a surface
    pub fn indicator(&self, cloud: &OrientedCloud) -> Result<IndicatorField> {
        let samples = self.prepare_samples(cloud)?;
        let positions: Vec<Point3d> = samples.iter().map(|s| s.position).collect();
        let domain = Domain::enclosing(&positions, self.config.depth, self.config.scale)?;

        let octree = SampleOctree::build(&domain, &positions);
        let samples: Vec<Sample> = samples
            .into_iter()
            .map(|mut sample| {
                let (level, count) = octree.splat_level(&sample.position, self.config.samples_per_node);
                let width = domain.side / (1u64 << level) as f64;
                sample.radius = width;
                sample.area = width * width / count.max(1) as f64;
                sample
            })
            .collect();
        debug!(
            depth = self.config.depth,
            side = domain.side,
            finest_nodes = octree.occupied_nodes(self.config.depth),
            "built sample octree"
        );

        let total_area: f64 = samples.iter().map(|s| s.area).sum();
        let total_weight: f64 = samples.iter().map(|s| s.weight).sum();
        let settings = SolverSettings {
            max_iterations: self.config.solver_iterations,
            tolerance: self.config.solver_tolerance,
        };

        let depth = self.config.depth;
        let first = depth.saturating_sub(CASCADE_LEVELS).max(MIN_CASCADE_LEVEL).min(depth);
        let mut hierarchy = Hierarchy::default();
        let mut levels = Vec::new();
        let mut weighted_sum = 0.0;

        for level in first..=depth {
            let grid = domain.level(level);
            let set = if level == first {
                ActiveSet::full(grid, self.config.max_level_vertices)?
            } else {
                ActiveSet::band(grid, &octree, BAND_RING, self.config.max_level_vertices)?
            };
            let fixed = |key| hierarchy.fixed_value(&grid, key);

            let rhs = vector_field::divergence(&set, &samples, &self.pool, self.config.solver_divide);
            let footprints: Vec<Footprint> = self
                .pool
                .map(&samples, |s| Footprint::new(&set, &s.position, s.weight, fixed));
            let screening = self.config.point_weight * total_area / (total_weight * grid.spacing);
            let operator =
                ScreenedLaplacian::new(&set, &footprints, screening, self.config.solver_divide, &self.pool, fixed);

            // Coarser levels seed the guess; the first level starts from the boundary value
            let initial = self.pool.map(set.keys(), |&key| fixed(key));
            let (values, report) = solver::solve_level(&operator, &rhs, initial, &settings, &self.pool)?;
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::reconstruction(format!(
                    "indicator function has non-finite values at level {}",
                    level
                )));
            }
            if level == depth {
                weighted_sum = footprints
                    .iter()
                    .map(|f| f.confidence * f.interpolate(&values))
                    .sum::<f64>();
            }
            levels.push(report);
            hierarchy.push(set, values);
        }

        if hierarchy.is_empty() {
            return Err(Error::reconstruction("indicator cascade solved no level"));
        }
        let iso_value = weighted_sum / total_weight;
        debug!(
            iso_value,
            levels = levels.len(),
            finest_unknowns = levels.last().map_or(0, |l| l.unknowns),
            "solved indicator function"
        );

        Ok(IndicatorField {
            hierarchy,
            octree,
            iso_value,
            levels,
        })
    }

    /// Check the input and turn every point into a sample with its confidence
    fn prepare_samples(&self, cloud: &OrientedCloud) -> Result<Vec<Sample>> {
        if cloud.len() < MIN_POISSON_POINTS {
            return Err(Error::degenerate(format!(
                "Poisson reconstruction needs at least {} points, got {}",
                MIN_POISSON_POINTS,
                cloud.len()
            )));
        }

        cloud
            .iter()
            .enumerate()
            .map(|(index, point)| {
                let magnitude = point.normal.norm();
                if !(magnitude.is_finite() && magnitude > 0.0) {
                    return Err(Error::degenerate(format!(
                        "point {} has a zero or non-finite normal",
                        index
                    )));
                }
                if !point.position.coords.iter().all(|c| c.is_finite()) {
                    return Err(Error::degenerate(format!("point {} has a non-finite position", index)));
                }
                let (normal, weight) = if self.config.confidence {
                    (point.normal, magnitude)
                } else {
                    (point.normal / magnitude, 1.0)
                };
                Ok(Sample {
                    position: point.position,
                    normal,
                    weight,
                    radius: 0.0,
                    area: 0.0,
                })
            })
            .collect()
    }
}

/// Reconstruct with the given configuration
pub fn poisson_reconstruction(cloud: &OrientedCloud, config: &PoissonConfig) -> Result<PolygonMesh> {
    PoissonReconstructor::new(config.clone())?.reconstruct(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshpcl_core::{NormalPoint3d, Vector3d};

    fn sphere(n: usize) -> OrientedCloud {
        let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
        (0..n)
            .map(|i| {
                let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - y * y).sqrt();
                let theta = golden * i as f64;
                let p = Point3d::new(r * theta.cos(), y, r * theta.sin());
                NormalPoint3d::new(p, p.coords)
            })
            .collect()
    }

    #[test]
    fn config_validation() {
        let bad = [
            PoissonConfig::default().with_depth(0),
            PoissonConfig::default().with_depth(MAX_DEPTH + 1),
            PoissonConfig::default().with_scale(0.4),
            PoissonConfig::default().with_samples_per_node(0.5),
            PoissonConfig::default().with_point_weight(-1.0),
            PoissonConfig::default().with_iso_divide(0),
            PoissonConfig::default().with_solver_divide(0),
            PoissonConfig::default().with_max_level_vertices(0),
        ];
        for config in bad {
            assert!(matches!(PoissonReconstructor::new(config), Err(Error::Config(_))));
        }
        assert!(PoissonConfig::default().validate().is_ok());
    }

    #[test]
    fn defaults_follow_the_documented_values() {
        let config = PoissonConfig::default();
        assert_eq!(config.depth, 7);
        assert_eq!(config.point_weight, 4.0);
        assert_eq!(config.samples_per_node, 1.5);
        assert_eq!(config.scale, 1.1);
        assert!(config.confidence);
        assert_eq!((config.solver_divide, config.iso_divide), (8, 8));
        assert!(!config.output_polygons);
        assert!(config.manifold);
        assert_eq!(config.face_output(), FaceOutput::FannedPolygons);
        assert_eq!(config.max_level_vertices, DEFAULT_MAX_LEVEL_VERTICES);
    }

    #[test]
    fn too_few_points_is_degenerate() {
        let cloud = sphere(3);
        let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(3)).unwrap();
        assert!(matches!(poisson.reconstruct(&cloud), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn zero_normal_is_degenerate() {
        let mut cloud = sphere(50);
        cloud.points[7].normal = Vector3d::zeros();
        let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(3)).unwrap();
        assert!(matches!(poisson.reconstruct(&cloud), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn indicator_is_low_inside_and_high_outside() {
        let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(5)).unwrap();
        let field = poisson.indicator(&sphere(800)).unwrap();
        assert!(field.levels.iter().all(|l| l.converged));
        assert_eq!(field.levels.len(), 4);
        assert!(field.sample(&Point3d::origin()) < field.iso_value);
        assert!(field.sample(&Point3d::new(1.3, 0.0, 0.0)) > field.iso_value);
        // The coarsest level covers its whole interior, finer ones a band
        let dense = field.levels.iter().map(|l| (1usize << l.level) - 1).map(|n| n * n * n);
        let counts: Vec<(usize, usize)> = field.levels.iter().map(|l| l.unknowns).zip(dense).collect();
        assert_eq!(counts[0].0, counts[0].1);
        assert!(counts[1..].iter().all(|&(unknowns, interior)| unknowns <= interior));
    }

    #[test]
    fn deepest_level_is_solved_on_a_band() {
        let cloud = sphere(300);
        let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(MAX_DEPTH)).unwrap();
        let field = poisson.indicator(&cloud).unwrap();
        assert_eq!(field.levels.len(), CASCADE_LEVELS + 1);

        let finest = field.levels.last().unwrap();
        assert_eq!(finest.level, MAX_DEPTH);
        // At most a 6^3 block of vertices per occupied node, a tiny share of the lattice
        let occupied = field.octree.occupied_nodes(MAX_DEPTH);
        assert!(occupied <= cloud.len());
        assert!(finest.unknowns <= occupied * 216);
        let lattice = ((1usize << MAX_DEPTH) + 1).pow(3);
        assert!(finest.unknowns * 1000 < lattice);

        assert!(field.iso_value.is_finite());
        assert!(field.sample(&Point3d::origin()) < field.iso_value);
        assert!(field.sample(&Point3d::new(1.2, 0.0, 0.0)) > field.iso_value);
    }

    #[test]
    fn level_over_the_unknown_limit_is_refused() {
        let config = PoissonConfig::default().with_depth(MAX_DEPTH).with_max_level_vertices(20_000);
        let poisson = PoissonReconstructor::new(config).unwrap();
        assert!(matches!(poisson.indicator(&sphere(300)), Err(Error::Config(_))));
        assert!(matches!(poisson.reconstruct(&sphere(300)), Err(Error::Config(_))));
    }

    #[test]
    fn sphere_is_closed_and_outward() {
        let poisson = PoissonReconstructor::new(PoissonConfig::default().with_depth(5)).unwrap();
        let mesh = poisson.reconstruct(&sphere(1000)).unwrap();
        assert!(mesh.validate().is_ok());
        assert!(mesh.is_triangle_mesh());
        assert_eq!(mesh.boundary_edge_count(), 0);
        assert_eq!(mesh.euler_characteristic(), 2);
        let volume = mesh.signed_volume();
        assert!((volume - 4.0 / 3.0 * std::f64::consts::PI).abs() < 0.25, "volume {}", volume);
    }

    #[test]
    fn without_confidence_normal_length_does_not_matter() {
        let mut scaled = sphere(300);
        for p in scaled.points.iter_mut() {
            p.normal *= 3.0;
        }
        let config = PoissonConfig::default().with_depth(4).with_confidence(false);
        let a = poisson_reconstruction(&sphere(300), &config).unwrap();
        let b = poisson_reconstruction(&scaled, &config).unwrap();
        assert_eq!(a.vertex_count(), b.vertex_count());
        assert_eq!(a.face_count(), b.face_count());
    }
}
