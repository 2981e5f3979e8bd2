//! Integration tests for meshpcl-reconstruction
//!
//! These run both strategies on synthetic scans and drive the full pipeline
//! from raw points to a validated mesh.

use approx::assert_relative_eq;
use meshpcl_algorithms::NormalConfig;
use meshpcl_core::{
    ColoredPoint3d, Error, NormalPoint3d, OrientedCloud, Point3d, PointCloud, PolygonMesh, Vector3d,
};
use meshpcl_reconstruction::*;
use std::f64::consts::PI;

/// Evenly spread points on a sphere of radius `radius` around `center`
fn fibonacci_sphere(n: usize, radius: f64, center: Point3d) -> Vec<Point3d> {
    let golden = PI * (3.0 - 5.0f64.sqrt());
    (0..n)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
            let r = (1.0 - y * y).sqrt();
            let theta = golden * i as f64;
            center + Vector3d::new(r * theta.cos(), y, r * theta.sin()) * radius
        })
        .collect()
}

/// Unit sphere with exact outward normals
fn oriented_sphere(n: usize) -> OrientedCloud {
    fibonacci_sphere(n, 1.0, Point3d::origin())
        .into_iter()
        .map(|p| NormalPoint3d::new(p, p.coords))
        .collect()
}

/// Regular `n x n` grid with unit spacing in the z = 0 plane, normals up
fn oriented_grid(n: usize) -> OrientedCloud {
    (0..n)
        .flat_map(|j| (0..n).map(move |i| NormalPoint3d::new(Point3d::new(i as f64, j as f64, 0.0), Vector3d::z())))
        .collect()
}

fn assert_indices_in_range(mesh: &PolygonMesh) {
    for face in &mesh.faces {
        assert!(face.len() >= 3);
        assert!(face.iter().all(|&v| v < mesh.vertex_count()));
    }
}

/// Interior angles of triangle `face` in radians
fn triangle_angles(mesh: &PolygonMesh, face: usize) -> [f64; 3] {
    let f = &mesh.faces[face];
    let p = [mesh.vertices[f[0]], mesh.vertices[f[1]], mesh.vertices[f[2]]];
    let mut angles = [0.0; 3];
    for (i, angle) in angles.iter_mut().enumerate() {
        let a = p[(i + 1) % 3] - p[i];
        let b = p[(i + 2) % 3] - p[i];
        *angle = a.angle(&b);
    }
    angles
}

#[test]
fn test_poisson_sphere_is_closed() {
    let cloud = oriented_sphere(2000);
    let config = PoissonConfig::default().with_depth(6);
    let mesh = poisson_reconstruction(&cloud, &config).unwrap();

    assert!(mesh.validate().is_ok());
    assert_indices_in_range(&mesh);
    assert!(mesh.is_triangle_mesh());
    assert_eq!(mesh.boundary_edge_count(), 0);
    assert_eq!(mesh.euler_characteristic(), 2);
    assert_relative_eq!(mesh.signed_volume(), 4.0 / 3.0 * PI, max_relative = 0.05);

    for v in &mesh.vertices {
        assert!((v.coords.norm() - 1.0).abs() < 0.05);
    }
}

#[test]
fn test_poisson_polygon_output_has_same_topology() {
    let cloud = oriented_sphere(1000);
    let base = PoissonConfig::default().with_depth(5);
    let triangles = poisson_reconstruction(&cloud, &base).unwrap();
    let polygons = poisson_reconstruction(&cloud, &base.clone().with_output_polygons(true)).unwrap();

    assert_indices_in_range(&polygons);
    assert!(polygons.face_count() <= triangles.face_count());
    assert_eq!(polygons.euler_characteristic(), 2);
    assert_relative_eq!(polygons.surface_area(), triangles.surface_area(), max_relative = 0.02);
}

#[test]
fn test_poisson_is_translation_invariant() {
    let shift = Vector3d::new(5.0, -3.0, 2.0);
    let cloud = oriented_sphere(1000);
    let moved = cloud.map(|p| NormalPoint3d::new(p.position + shift, p.normal));
    let config = PoissonConfig::default().with_depth(5);

    let a = poisson_reconstruction(&cloud, &config).unwrap();
    let b = poisson_reconstruction(&moved, &config).unwrap();
    assert_eq!(b.euler_characteristic(), 2);
    assert_relative_eq!(a.signed_volume(), b.signed_volume(), max_relative = 1e-3);
}

#[test]
fn test_greedy_projection_grid() {
    let cloud = oriented_grid(20);
    let config = GreedyProjectionConfig::default().with_search_radius(2.0).with_mu(2.5);
    let mesh = greedy_projection(&cloud, &config).unwrap();

    assert_indices_in_range(&mesh);
    assert_eq!(mesh.vertex_count(), 400);
    assert!(mesh.face_count() >= 700);
    assert!(mesh.face_count() <= 722);
    assert!(mesh.surface_area() > 350.0);
    assert!(mesh.surface_area() <= 361.0 + 1e-9);

    for face in 0..mesh.face_count() {
        assert!(mesh.face_normal(face).z > 0.0);
        for angle in triangle_angles(&mesh, face) {
            assert!(angle >= config.min_angle - 1e-9);
            assert!(angle <= config.max_angle + 1e-9);
        }
    }
    for (&(a, b), &count) in &mesh.edge_face_counts() {
        assert!(count <= 2);
        assert!((mesh.vertices[a] - mesh.vertices[b]).norm() <= config.search_radius + 1e-9);
    }
}

#[test]
fn test_greedy_projection_sphere_is_closed() {
    let cloud = oriented_sphere(1000);
    let config = GreedyProjectionConfig::default().with_search_radius(0.3).with_mu(2.5);
    let mesh = greedy_projection(&cloud, &config).unwrap();

    assert_indices_in_range(&mesh);
    assert_eq!(mesh.boundary_edge_count(), 0);
    assert_eq!(mesh.euler_characteristic(), 2);
    for face in 0..mesh.face_count() {
        let f = &mesh.faces[face];
        let centroid = (mesh.vertices[f[0]].coords + mesh.vertices[f[1]].coords + mesh.vertices[f[2]].coords) / 3.0;
        assert!(mesh.face_normal(face).dot(&centroid) > 0.0);
    }
}

#[test]
fn test_strategies_through_trait_object() {
    let cloud = oriented_sphere(800);
    let strategies: Vec<Box<dyn SurfaceReconstructor>> = vec![
        Box::new(PoissonReconstructor::new(PoissonConfig::default().with_depth(4)).unwrap()),
        Box::new(GreedyProjection::new(GreedyProjectionConfig::default().with_search_radius(0.35)).unwrap()),
    ];
    for strategy in &strategies {
        let mesh = strategy.reconstruct(&cloud).unwrap();
        assert!(mesh.face_count() > 0, "{} produced no faces", strategy.name());
        assert!(mesh.validate().is_ok());
    }
}

#[test]
fn test_pipeline_rejects_unknown_selector_before_work() {
    assert!(matches!(
        ReconstructionPipeline::from_selector(9, 0.05),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_pipeline_poisson_on_offset_colored_scan() {
    let center = Point3d::new(100.0, 50.0, -20.0);
    let cloud: PointCloud<ColoredPoint3d> = fibonacci_sphere(2000, 1.0, center)
        .into_iter()
        .map(|p| ColoredPoint3d::new(p, [200, 30, 30]))
        .collect();

    let config = PipelineConfig::default()
        .with_strategy(StrategyKind::ImplicitPoisson)
        .with_leaf_size(0.02)
        .with_normals(NormalConfig::default().with_k(10))
        .with_poisson(PoissonConfig::default().with_depth(5));
    let pipeline = ReconstructionPipeline::new(config).unwrap();
    let output = pipeline.run(&cloud).unwrap();

    assert_eq!(output.stats.input_points, 2000);
    assert!(output.stats.downsampled_points > 1900);
    assert_eq!(output.stats.mesh_faces, output.mesh.face_count());
    let stages: Vec<&str> = output.stats.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, ["downsample", "recenter", "normals", "reconstruct"]);

    let mesh = &output.mesh;
    assert_eq!(mesh.euler_characteristic(), 2);
    let colors = mesh.colors.as_ref().unwrap();
    assert_eq!(colors.len(), mesh.vertex_count());
    assert!(colors.iter().all(|&c| c == [200, 30, 30]));

    // Recentered frame: the sphere sits on the origin
    let recentered_mean = mesh.vertices.iter().fold(Vector3d::zeros(), |acc, v| acc + v.coords) / mesh.vertex_count() as f64;
    assert!(recentered_mean.norm() < 0.05);

    let restored = output.mesh_in_input_frame().unwrap();
    for v in &restored.vertices {
        assert!(((v - center).norm() - 1.0).abs() < 0.06);
    }
}

#[test]
fn test_pipeline_greedy_on_plane() {
    let cloud: PointCloud<ColoredPoint3d> = (0..20)
        .flat_map(|j| (0..20).map(move |i| ColoredPoint3d::new(Point3d::new(i as f64, j as f64, 3.0), [10, 20, 30])))
        .collect();

    let config = PipelineConfig::default()
        .with_strategy(StrategyKind::GreedyProjection)
        .with_leaf_size(0.5)
        .with_greedy(GreedyProjectionConfig::default().with_search_radius(2.0).with_mu(2.5));
    let output = ReconstructionPipeline::new(config).unwrap().run(&cloud).unwrap();

    assert_eq!(output.stats.downsampled_points, 400);
    assert_eq!(output.mesh.vertex_count(), 400);
    assert!(output.mesh.face_count() >= 700);
    assert!(output.mesh.vertices.iter().all(|v| v.z.abs() < 1e-9));
    assert_eq!(output.mesh.colors.as_ref().map(Vec::len), Some(400));
}

#[test]
fn test_pipeline_without_colors_leaves_mesh_uncolored() {
    let cloud: PointCloud<Point3d> = fibonacci_sphere(1000, 1.0, Point3d::origin()).into_iter().collect();
    let config = PipelineConfig::default()
        .with_leaf_size(0.01)
        .with_poisson(PoissonConfig::default().with_depth(4));
    let output = ReconstructionPipeline::new(config).unwrap().run(&cloud).unwrap();
    assert!(output.mesh.colors.is_none());
    assert!(output.mesh.face_count() > 0);
}
