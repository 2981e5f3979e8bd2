//! Scan file in, PLY mesh out, through the umbrella crate

use meshpcl::prelude::*;
use std::fmt::Write as _;
use std::fs;
use tempfile::tempdir;

/// `x y z r g b` lines of a unit sphere around `(3, 4, 5)`
fn sphere_scan(n: usize) -> String {
    let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    let mut out = String::from("# synthetic sphere\n");
    for i in 0..n {
        let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
        let r = (1.0 - y * y).sqrt();
        let theta = golden * i as f64;
        writeln!(out, "{} {} {} 90 160 {}", 3.0 + r * theta.cos(), 4.0 + y, 5.0 + r * theta.sin(), i % 256).unwrap();
    }
    out
}

fn reconstruct(cloud: &LoadedCloud, pipeline: &ReconstructionPipeline) -> PipelineOutput {
    match cloud {
        LoadedCloud::Plain(c) => pipeline.run(c).unwrap(),
        LoadedCloud::Colored(c) => pipeline.run(c).unwrap(),
    }
}

#[test]
fn test_poisson_scan_to_ply() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sphere.txt");
    fs::write(&input, sphere_scan(1500)).unwrap();

    let cloud = read_point_cloud(&input).unwrap();
    assert!(cloud.is_colored());
    let pipeline = ReconstructionPipeline::new(
        PipelineConfig::default()
            .with_leaf_size(0.01)
            .with_poisson(PoissonConfig::default().with_depth(5)),
    )
    .unwrap();
    let output = reconstruct(&cloud, &pipeline);

    let path = dir.path().join("cloud_mesh.ply");
    write_mesh(&output.mesh, &path).unwrap();
    let mesh = read_ply_mesh(&path).unwrap();

    assert_eq!(mesh.vertices, output.mesh.vertices);
    assert_eq!(mesh.faces, output.mesh.faces);
    assert_eq!(mesh.colors, output.mesh.colors);
    assert_eq!(mesh.euler_characteristic(), 2);
    assert!(mesh.colors.unwrap().iter().all(|c| c[0] == 90 && c[1] == 160));
}

#[test]
fn test_greedy_mesh_maps_back_to_scan_frame() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("sphere.txt");
    fs::write(&input, sphere_scan(1000)).unwrap();

    let cloud = read_point_cloud(&input).unwrap();
    let pipeline = ReconstructionPipeline::new(
        PipelineConfig::default()
            .with_strategy(StrategyKind::GreedyProjection)
            .with_leaf_size(0.01)
            .with_greedy(GreedyProjectionConfig::default().with_search_radius(0.3)),
    )
    .unwrap();
    let output = reconstruct(&cloud, &pipeline);
    let restored = output.mesh_in_input_frame().unwrap();

    let center = Point3d::new(3.0, 4.0, 5.0);
    for v in &restored.vertices {
        assert!(((v - center).norm() - 1.0).abs() < 1e-6);
    }
    assert!(restored.face_count() > 0);
}

#[test]
fn test_too_coarse_leaf_size_is_degenerate() {
    let cloud: PointCloud<Point3d> = (0..50).map(|i| Point3d::new(i as f64 * 1e-3, 0.0, 0.0)).collect();
    let pipeline = ReconstructionPipeline::from_selector(1, 10.0).unwrap();
    assert!(matches!(pipeline.run(&cloud), Err(Error::DegenerateInput(_))));
}
