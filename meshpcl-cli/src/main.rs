//! meshpcl: reconstruct a surface mesh from a point cloud scan.
//!
//! ```bash
//! # Poisson reconstruction of a PCD scan, 1 cm voxels
//! meshpcl scan.pcd 1 0.01 out/
//!
//! # Greedy projection of a colored text scan with debug logging
//! RUST_LOG=debug meshpcl scan.txt gp3 0.5 out/ --radius 10 --mu 5
//! ```
//!
//! The mesh is written to `<OUTPUT_DIR>/cloud_mesh.ply`. Set `RUST_LOG` or
//! pass `-v`/`-vv` to control log output.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use meshpcl_algorithms::NormalConfig;
use meshpcl_io::{read_point_cloud, write_mesh, LoadedCloud};
use meshpcl_reconstruction::{
    GreedyProjectionConfig, PipelineConfig, PipelineOutput, PoissonConfig, ReconstructionPipeline, StrategyKind,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File name of the exported mesh inside the output directory
const MESH_FILE_NAME: &str = "cloud_mesh.ply";

/// Reconstruct a polygon mesh from a point cloud.
#[derive(Parser, Debug)]
#[command(name = "meshpcl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input scan (.ply, .pcd, .xyz or .txt)
    input: PathBuf,

    /// Reconstruction method: 1 or "poisson", 2 or "gp3"
    method: String,

    /// Voxel edge length used to downsample the scan
    #[arg(allow_negative_numbers = true)]
    leaf_size: f64,

    /// Existing directory that receives cloud_mesh.ply
    output_dir: PathBuf,

    /// Neighbors per normal estimate
    #[arg(long, default_value_t = 10)]
    normal_k: usize,

    /// Worker threads for parallel stages (clamped to 3..=8)
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Poisson octree depth
    #[arg(long, default_value_t = 7)]
    depth: usize,

    /// Poisson screening weight
    #[arg(long, default_value_t = 4.0)]
    point_weight: f64,

    /// Poisson minimum samples per octree node
    #[arg(long, default_value_t = 1.5)]
    samples_per_node: f64,

    /// Poisson domain scale relative to the bounding box
    #[arg(long, default_value_t = 1.1)]
    scale: f64,

    /// Emit Poisson cell polygons instead of triangles
    #[arg(long)]
    polygons: bool,

    /// Triangulate Poisson cell polygons around a center vertex (ignored with --polygons)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    manifold: bool,

    /// Weight Poisson samples by their normal length
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    confidence: bool,

    /// z-layers per parallel block of the Poisson solve
    #[arg(long, default_value_t = 8)]
    solver_divide: usize,

    /// z-layers per parallel block of the Poisson iso-surface extraction
    #[arg(long, default_value_t = 8)]
    iso_divide: usize,

    /// Greedy projection neighborhood radius
    #[arg(long, default_value_t = 10.0)]
    radius: f64,

    /// Greedy projection edge length multiplier
    #[arg(long, default_value_t = 5.0)]
    mu: f64,

    /// Greedy projection neighbors per query
    #[arg(long, default_value_t = 100)]
    max_neighbors: usize,

    /// Check point normals against the surface angle during greedy projection
    #[arg(long)]
    normal_consistency: bool,

    /// Write the mesh in the scan's coordinates instead of the recentered frame
    #[arg(long)]
    input_frame: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let strategy: StrategyKind = self
            .method
            .parse()
            .with_context(|| format!("invalid reconstruction method '{}'", self.method))?;

        Ok(PipelineConfig::default()
            .with_strategy(strategy)
            .with_leaf_size(self.leaf_size)
            .with_normals(
                NormalConfig::default()
                    .with_k(self.normal_k)
                    .with_workers(self.workers),
            )
            .with_poisson(
                PoissonConfig::default()
                    .with_depth(self.depth)
                    .with_point_weight(self.point_weight)
                    .with_samples_per_node(self.samples_per_node)
                    .with_scale(self.scale)
                    .with_output_polygons(self.polygons)
                    .with_manifold(self.manifold)
                    .with_confidence(self.confidence)
                    .with_solver_divide(self.solver_divide)
                    .with_iso_divide(self.iso_divide)
                    .with_workers(self.workers),
            )
            .with_greedy(
                GreedyProjectionConfig::default()
                    .with_search_radius(self.radius)
                    .with_mu(self.mu)
                    .with_max_nearest_neighbors(self.max_neighbors)
                    .with_normal_consistency(self.normal_consistency),
            ))
    }
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

/// The output directory must already exist
fn check_output_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        bail!("output directory {} does not exist", dir.display());
    }
    if !dir.is_dir() {
        bail!("output path {} is not a directory", dir.display());
    }
    Ok(dir.join(MESH_FILE_NAME))
}

fn reconstruct(pipeline: &ReconstructionPipeline, cloud: &LoadedCloud) -> meshpcl_core::Result<PipelineOutput> {
    match cloud {
        LoadedCloud::Plain(cloud) => pipeline.run(cloud),
        LoadedCloud::Colored(cloud) => pipeline.run(cloud),
    }
}

fn run(cli: &Cli) -> Result<PathBuf> {
    let mesh_path = check_output_dir(&cli.output_dir)?;
    let pipeline = ReconstructionPipeline::new(cli.pipeline_config()?)
        .context("invalid reconstruction parameters")?;

    let cloud = read_point_cloud(&cli.input)
        .with_context(|| format!("failed to load point cloud {}", cli.input.display()))?;
    let output = reconstruct(&pipeline, &cloud).context("reconstruction failed")?;

    let mesh = if cli.input_frame {
        output.mesh_in_input_frame()?
    } else {
        output.mesh.clone()
    };
    write_mesh(&mesh, &mesh_path)
        .with_context(|| format!("failed to write mesh to {}", mesh_path.display()))?;

    for stage in &output.stats.stages {
        info!(stage = %stage.stage, elapsed_ms = stage.elapsed.as_secs_f64() * 1e3, "stage timing");
    }
    Ok(mesh_path)
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(path) => println!("saved mesh in: {}", path.display()),
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            std::process::exit(1);
        }
    }
}
