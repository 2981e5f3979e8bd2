//! Point cloud to mesh reconstruction pipeline
//!
//! Stages run strictly in order, each on a freshly owned copy of the
//! previous stage's output:
//!
//! 1. voxel grid downsampling
//! 2. recentering on the centroid
//! 3. normal estimation
//! 4. surface reconstruction with the configured strategy
//!
//! Parallelism lives inside the stages; the pipeline itself is sequential.

use crate::greedy_projection::GreedyProjectionConfig;
use crate::poisson::PoissonConfig;
use crate::reconstructor::{ReconstructionMethod, StrategyKind, SurfaceReconstructor};
use meshpcl_algorithms::{recenter, voxel_grid_filter, KdTree, NormalConfig, NormalEstimator};
use meshpcl_core::{CloudPoint, Error, PointCloud, PolygonMesh, Result, Rgb, Transform3D};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for the reconstruction pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Reconstruction strategy
    pub strategy: StrategyKind,
    /// Voxel edge length of the downsampling stage
    pub leaf_size: f64,
    pub normals: NormalConfig,
    pub poisson: PoissonConfig,
    pub greedy: GreedyProjectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::ImplicitPoisson,
            leaf_size: 0.01,
            normals: NormalConfig::default(),
            poisson: PoissonConfig::default(),
            greedy: GreedyProjectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_leaf_size(mut self, leaf_size: f64) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    pub fn with_normals(mut self, normals: NormalConfig) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_poisson(mut self, poisson: PoissonConfig) -> Self {
        self.poisson = poisson;
        self
    }

    pub fn with_greedy(mut self, greedy: GreedyProjectionConfig) -> Self {
        self.greedy = greedy;
        self
    }

    /// Check every stage's parameters
    pub fn validate(&self) -> Result<()> {
        if !(self.leaf_size.is_finite() && self.leaf_size > 0.0) {
            return Err(Error::config(format!(
                "voxel leaf size must be positive and finite, got {}",
                self.leaf_size
            )));
        }
        self.normals.validate()?;
        match self.strategy {
            StrategyKind::ImplicitPoisson => self.poisson.validate(),
            StrategyKind::GreedyProjection => self.greedy.validate(),
        }
    }
}

/// Wall time of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed: Duration,
}

/// Point counts and timings of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub input_points: usize,
    pub downsampled_points: usize,
    pub mesh_vertices: usize,
    pub mesh_faces: usize,
    pub stages: Vec<StageTiming>,
}

impl PipelineStats {
    /// Sum of all stage times
    pub fn total_elapsed(&self) -> Duration {
        self.stages.iter().map(|s| s.elapsed).sum()
    }
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// The mesh, in the recentered frame
    pub mesh: PolygonMesh,
    /// Translation applied by the recentering stage
    pub transform: Transform3D,
    pub stats: PipelineStats,
}

impl PipelineOutput {
    /// The mesh moved back to the coordinates of the input cloud
    pub fn mesh_in_input_frame(&self) -> Result<PolygonMesh> {
        let inverse = self
            .transform
            .inverse()
            .ok_or_else(|| Error::reconstruction("recentering transform is not invertible"))?;
        let mut mesh = self.mesh.clone();
        for vertex in mesh.vertices.iter_mut() {
            *vertex = inverse.transform_point(vertex);
        }
        Ok(mesh)
    }
}

/// A validated pipeline with its strategy built up front
#[derive(Debug)]
pub struct ReconstructionPipeline {
    config: PipelineConfig,
    normals: NormalEstimator,
    method: ReconstructionMethod,
}

impl ReconstructionPipeline {
    /// Validate `config` and build every stage
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let normals = NormalEstimator::new(config.normals.clone())?;
        let method = ReconstructionMethod::new(config.strategy, &config.poisson, &config.greedy)?;
        Ok(Self {
            config,
            normals,
            method,
        })
    }

    /// Pipeline for a numeric strategy selector (1 Poisson, 2 greedy projection)
    /// with default stage settings
    pub fn from_selector(selector: i64, leaf_size: f64) -> Result<Self> {
        let strategy = StrategyKind::from_selector(selector)?;
        Self::new(
            PipelineConfig::default()
                .with_strategy(strategy)
                .with_leaf_size(leaf_size),
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn method(&self) -> &ReconstructionMethod {
        &self.method
    }

    /// Run all stages on `cloud`
    ///
    /// # Arguments
    /// * `cloud` - Raw scan, with or without colors
    ///
    /// # Returns
    /// * `Result<PipelineOutput>` - The mesh (colored when the scan is), the
    ///   recentering transform and per-stage statistics
    pub fn run<T: CloudPoint>(&self, cloud: &PointCloud<T>) -> Result<PipelineOutput> {
        if cloud.is_empty() {
            return Err(Error::degenerate("input cloud is empty"));
        }
        info!(
            points = cloud.len(),
            strategy = %self.method.kind(),
            leaf_size = self.config.leaf_size,
            "starting reconstruction"
        );

        let mut stats = PipelineStats {
            input_points: cloud.len(),
            ..PipelineStats::default()
        };

        let downsampled = timed(&mut stats, "downsample", || voxel_grid_filter(cloud, self.config.leaf_size))?;
        stats.downsampled_points = downsampled.len();
        info!(points = downsampled.len(), "downsampled cloud");
        if downsampled.len() < self.method.min_points() {
            return Err(Error::degenerate(format!(
                "{} needs at least {} points after downsampling, got {}; try a smaller leaf size",
                self.method.name(),
                self.method.min_points(),
                downsampled.len()
            )));
        }

        let recentered = timed(&mut stats, "recenter", || recenter(&downsampled))?;
        let oriented = timed(&mut stats, "normals", || self.normals.estimate(&recentered.cloud))?;
        let mut mesh = timed(&mut stats, "reconstruct", || self.method.reconstruct(&oriented))?;

        if T::HAS_COLOR {
            if let Some(colors) = self.vertex_colors(&mesh, &recentered.cloud)? {
                mesh.set_colors(colors);
            }
        }
        mesh.validate()?;

        stats.mesh_vertices = mesh.vertex_count();
        stats.mesh_faces = mesh.face_count();
        info!(
            vertices = stats.mesh_vertices,
            faces = stats.mesh_faces,
            elapsed_ms = stats.total_elapsed().as_secs_f64() * 1e3,
            "reconstruction finished"
        );

        Ok(PipelineOutput {
            mesh,
            transform: recentered.transform,
            stats,
        })
    }

    /// One color per mesh vertex, taken from the nearest cloud point
    fn vertex_colors<T: CloudPoint>(&self, mesh: &PolygonMesh, cloud: &PointCloud<T>) -> Result<Option<Vec<Rgb>>> {
        let colors: Vec<Rgb> = cloud.iter().filter_map(CloudPoint::color).collect();
        if colors.len() != cloud.len() {
            return Ok(None);
        }
        // Greedy projection keeps the cloud points as its vertices
        if self.method.kind() == StrategyKind::GreedyProjection && mesh.vertex_count() == cloud.len() {
            return Ok(Some(colors));
        }

        let tree = KdTree::from_cloud(cloud)?;
        let transferred = mesh
            .vertices
            .iter()
            .map(|v| {
                tree.k_nearest(v, 1)
                    .first()
                    .map(|n| colors[n.index])
                    .unwrap_or_default()
            })
            .collect();
        debug!(vertices = mesh.vertex_count(), "transferred colors to mesh vertices");
        Ok(Some(transferred))
    }
}

/// Run `stage`, recording its wall time
fn timed<R>(stats: &mut PipelineStats, stage: &str, run: impl FnOnce() -> Result<R>) -> Result<R> {
    let started = Instant::now();
    let output = run()?;
    let elapsed = started.elapsed();
    debug!(stage, elapsed_ms = elapsed.as_secs_f64() * 1e3, "stage finished");
    stats.stages.push(StageTiming {
        stage: stage.to_string(),
        elapsed,
    });
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshpcl_core::Point3d;

    #[test]
    fn unknown_selector_is_config_error() {
        assert!(matches!(
            ReconstructionPipeline::from_selector(9, 0.1),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bad_leaf_size_is_config_error() {
        for leaf in [0.0, -0.5, f64::NAN] {
            assert!(matches!(
                ReconstructionPipeline::from_selector(1, leaf),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn bad_normal_k_is_config_error() {
        let config = PipelineConfig::default().with_normals(NormalConfig::default().with_k(2));
        assert!(matches!(ReconstructionPipeline::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn empty_cloud_is_degenerate() {
        let pipeline = ReconstructionPipeline::from_selector(2, 0.1).unwrap();
        assert!(matches!(
            pipeline.run(&PointCloud::<Point3d>::new()),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn cloud_collapsing_into_few_voxels_is_degenerate() {
        let cloud = PointCloud::from_points(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(0.01, 0.0, 0.0),
            Point3d::new(0.0, 0.01, 0.0),
            Point3d::new(0.0, 0.0, 0.01),
            Point3d::new(0.01, 0.01, 0.01),
        ]);
        let pipeline = ReconstructionPipeline::from_selector(1, 1.0).unwrap();
        assert!(matches!(pipeline.run(&cloud), Err(Error::DegenerateInput(_))));
    }
}
