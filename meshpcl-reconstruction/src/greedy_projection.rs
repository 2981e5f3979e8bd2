//! Greedy projection triangulation
//!
//! Triangles grow outward from seed triangles along a front of directed
//! boundary edges. Every decision is made in the tangent plane of the
//! triangle behind the front edge: a candidate point must lie across the
//! edge, keep the new edges short and the angles well shaped, and must not
//! overlap what has already been built. The result is a consistently wound
//! triangle soup that may have holes where the sampling is too sparse.

use meshpcl_algorithms::KdTree;
use meshpcl_core::{Error, OrientedCloud, Point3d, PolygonMesh, Result, Vector3d};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::f64::consts::PI;
use tracing::{debug, info, warn};

/// Fewest points a triangulation accepts
pub const MIN_GREEDY_POINTS: usize = 4;

/// Slack on the angle bounds, in radians
const ANGLE_EPSILON: f64 = 1e-9;
/// Relative tolerance of the geometric predicates
const GEOMETRY_EPSILON: f64 = 1e-9;

/// Configuration for greedy projection triangulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreedyProjectionConfig {
    /// Neighborhood radius `R`; no edge is ever longer
    pub search_radius: f64,
    /// Edge length limit as a multiple of the mean edge length
    pub mu: f64,
    /// Neighbors considered per query
    pub max_nearest_neighbors: usize,
    /// Largest angle between a candidate's normal and the front triangle's normal
    pub max_surface_angle: f64,
    /// Smallest triangle angle
    pub min_angle: f64,
    /// Largest triangle angle
    pub max_angle: f64,
    /// Enforce `max_surface_angle` against point normals
    pub normal_consistency: bool,
}

impl Default for GreedyProjectionConfig {
    fn default() -> Self {
        Self {
            search_radius: 0.025,
            mu: 2.5,
            max_nearest_neighbors: 100,
            max_surface_angle: PI / 4.0,
            min_angle: PI / 18.0,
            max_angle: 2.0 * PI / 3.0,
            normal_consistency: false,
        }
    }
}

impl GreedyProjectionConfig {
    pub fn with_search_radius(mut self, search_radius: f64) -> Self {
        self.search_radius = search_radius;
        self
    }

    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    pub fn with_max_nearest_neighbors(mut self, max_nearest_neighbors: usize) -> Self {
        self.max_nearest_neighbors = max_nearest_neighbors;
        self
    }

    pub fn with_max_surface_angle(mut self, max_surface_angle: f64) -> Self {
        self.max_surface_angle = max_surface_angle;
        self
    }

    pub fn with_angle_range(mut self, min_angle: f64, max_angle: f64) -> Self {
        self.min_angle = min_angle;
        self.max_angle = max_angle;
        self
    }

    pub fn with_normal_consistency(mut self, normal_consistency: bool) -> Self {
        self.normal_consistency = normal_consistency;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.search_radius.is_finite() && self.search_radius > 0.0) {
            return Err(Error::config(format!(
                "search radius must be positive and finite, got {}",
                self.search_radius
            )));
        }
        if !(self.mu.is_finite() && self.mu > 0.0) {
            return Err(Error::config(format!("mu must be positive and finite, got {}", self.mu)));
        }
        if self.max_nearest_neighbors < 3 {
            return Err(Error::config(format!(
                "at least 3 nearest neighbors are needed, got {}",
                self.max_nearest_neighbors
            )));
        }
        // Every triangle has an angle of at least π/3 and one of at most π/3
        if !(self.min_angle > 0.0 && self.min_angle < PI / 3.0 && self.max_angle > PI / 3.0 && self.max_angle < PI)
        {
            return Err(Error::config(format!(
                "triangle angles need 0 < min < π/3 < max < π, got [{}, {}]",
                self.min_angle, self.max_angle
            )));
        }
        if !(self.max_surface_angle > 0.0 && self.max_surface_angle <= PI) {
            return Err(Error::config(format!(
                "max surface angle must be in (0, π], got {}",
                self.max_surface_angle
            )));
        }
        Ok(())
    }
}

/// Triangulation state of a point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointState {
    /// Not part of any triangle
    Free,
    /// On the boundary of the triangulation
    Fringe,
    /// Surrounded by triangles
    Completed,
    /// A seed that could not start a triangle
    Isolated,
}

/// Triangles together with the final state of every point
#[derive(Debug, Clone)]
pub struct Triangulation {
    pub mesh: PolygonMesh,
    pub states: Vec<PointState>,
}

/// Greedy projection triangulation
#[derive(Debug, Clone)]
pub struct GreedyProjection {
    config: GreedyProjectionConfig,
}

impl GreedyProjection {
    /// Validate the configuration
    pub fn new(config: GreedyProjectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GreedyProjectionConfig {
        &self.config
    }

    /// Triangulate `cloud`; mesh vertices are the cloud points in order
    pub fn reconstruct(&self, cloud: &OrientedCloud) -> Result<PolygonMesh> {
        Ok(self.triangulate(cloud)?.mesh)
    }

    /// Triangulate `cloud` and report the state of every point
    ///
    /// # Arguments
    /// * `cloud` - At least four points with non-zero normals
    ///
    /// # Returns
    /// * `Result<Triangulation>` - Triangles wound to agree with the normals
    pub fn triangulate(&self, cloud: &OrientedCloud) -> Result<Triangulation> {
        if cloud.len() < MIN_GREEDY_POINTS {
            return Err(Error::degenerate(format!(
                "greedy projection needs at least {} points, got {}",
                MIN_GREEDY_POINTS,
                cloud.len()
            )));
        }

        let positions = cloud.positions();
        let normals = cloud
            .iter()
            .enumerate()
            .map(|(index, point)| {
                point
                    .normal
                    .try_normalize(f64::MIN_POSITIVE)
                    .filter(|n| n.iter().all(|c| c.is_finite()))
                    .ok_or_else(|| Error::degenerate(format!("point {} has a zero or non-finite normal", index)))
            })
            .collect::<Result<Vec<Vector3d>>>()?;
        let tree = KdTree::build(&positions)?;

        let mut front = Front::new(&self.config, &positions, &normals, &tree);
        let mut seeds = 0usize;
        for seed in 0..positions.len() {
            if front.states[seed] != PointState::Free {
                continue;
            }
            if !front.start_from(seed) {
                front.states[seed] = PointState::Isolated;
                continue;
            }
            seeds += 1;
            while let Some(edge) = front.queue.pop_front() {
                front.advance(edge);
            }
        }

        let isolated = front.states.iter().filter(|&&s| s == PointState::Isolated).count();
        if front.triangles.is_empty() {
            return Err(Error::reconstruction(format!(
                "greedy projection produced no triangle from {} points; try a larger search radius",
                positions.len()
            )));
        }
        if isolated > 0 {
            warn!(isolated, "points could not be connected to the surface");
        }
        debug!(
            seeds,
            mean_edge = front.mean_edge_length(),
            "greedy projection fronts exhausted"
        );
        info!(
            points = positions.len(),
            triangles = front.triangles.len(),
            "greedy projection complete"
        );

        let mesh = PolygonMesh::from_triangles(positions.clone(), &front.triangles);
        Ok(Triangulation {
            mesh,
            states: front.states,
        })
    }
}

/// A directed front edge and the third vertex of the triangle behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrontEdge {
    from: usize,
    to: usize,
    opposite: usize,
}

/// Orthonormal frame of a tangent plane
struct TangentFrame {
    origin: Point3d,
    u: Vector3d,
    v: Vector3d,
}

impl TangentFrame {
    /// Frame through `origin` with first axis along `direction`, which must
    /// be perpendicular to `normal`
    fn new(origin: Point3d, direction: Vector3d, normal: &Vector3d) -> Self {
        let u = direction.normalize();
        Self {
            origin,
            u,
            v: normal.cross(&u),
        }
    }

    fn project(&self, p: &Point3d) -> [f64; 2] {
        let d = p - self.origin;
        [d.dot(&self.u), d.dot(&self.v)]
    }
}

/// Twice the signed area of the planar triangle `(a, b, c)`
fn orient2d(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Interior angle at `a` of the triangle `(a, b, c)`
fn angle_at(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    let (ab, ac) = (b - a, c - a);
    (ab.dot(&ac) / (ab.norm() * ac.norm())).clamp(-1.0, 1.0).acos()
}

fn circumradius(a: &Point3d, b: &Point3d, c: &Point3d) -> f64 {
    let area = (b - a).cross(&(c - a)).norm() / 2.0;
    (b - c).norm() * (c - a).norm() * (a - b).norm() / (4.0 * area)
}

/// Ranking key of a candidate: circumradius, then new edge lengths, then index
#[derive(Debug, Clone, Copy)]
struct Choice {
    point: usize,
    circumradius: f64,
    new_edges: f64,
}

impl Choice {
    fn beats(&self, other: &Choice) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= GEOMETRY_EPSILON * a.max(b);
        if !close(self.circumradius, other.circumradius) {
            return self.circumradius < other.circumradius;
        }
        if !close(self.new_edges, other.new_edges) {
            return self.new_edges < other.new_edges;
        }
        self.point < other.point
    }
}

/// Mutable state of one triangulation run
struct Front<'a> {
    config: &'a GreedyProjectionConfig,
    positions: &'a [Point3d],
    normals: &'a [Vector3d],
    tree: &'a KdTree,
    states: Vec<PointState>,
    /// Undirected edges of each point
    adjacency: Vec<Vec<usize>>,
    /// Edges of each point with a single triangle
    open_edges: Vec<usize>,
    directed: HashSet<(usize, usize)>,
    edge_faces: HashMap<(usize, usize), u8>,
    edge_length_sum: f64,
    edge_total: usize,
    triangles: Vec<[usize; 3]>,
    queue: VecDeque<FrontEdge>,
    cos_surface: f64,
}

impl<'a> Front<'a> {
    fn new(
        config: &'a GreedyProjectionConfig,
        positions: &'a [Point3d],
        normals: &'a [Vector3d],
        tree: &'a KdTree,
    ) -> Self {
        let n = positions.len();
        Self {
            config,
            positions,
            normals,
            tree,
            states: vec![PointState::Free; n],
            adjacency: vec![Vec::new(); n],
            open_edges: vec![0; n],
            directed: HashSet::new(),
            edge_faces: HashMap::new(),
            edge_length_sum: 0.0,
            edge_total: 0,
            triangles: Vec::new(),
            queue: VecDeque::new(),
            cos_surface: config.max_surface_angle.cos(),
        }
    }

    fn mean_edge_length(&self) -> f64 {
        if self.edge_total == 0 {
            0.0
        } else {
            self.edge_length_sum / self.edge_total as f64
        }
    }

    /// Longest admissible new edge; `seed_distance` applies before any edge exists
    fn max_edge_length(&self, seed_distance: f64) -> f64 {
        let reference = if self.edge_total > 0 {
            self.mean_edge_length()
        } else {
            seed_distance
        };
        self.config.search_radius.min(self.config.mu * reference)
    }

    fn neighbors(&self, query: &Point3d, k: usize) -> Vec<usize> {
        self.tree
            .k_nearest_within(query, k, self.config.search_radius)
            .into_iter()
            .map(|n| n.index)
            .collect()
    }

    fn angles_ok(&self, a: usize, b: usize, c: usize) -> bool {
        let (pa, pb, pc) = (&self.positions[a], &self.positions[b], &self.positions[c]);
        [angle_at(pa, pb, pc), angle_at(pb, pc, pa), angle_at(pc, pa, pb)]
            .iter()
            .all(|&angle| {
                angle >= self.config.min_angle - ANGLE_EPSILON && angle <= self.config.max_angle + ANGLE_EPSILON
            })
    }

    /// Candidate normals within the surface angle of `normal`, when enforced
    fn surface_ok(&self, points: &[usize], normal: &Vector3d) -> bool {
        !self.config.normal_consistency || points.iter().all(|&p| self.normals[p].dot(normal) >= self.cos_surface)
    }

    fn has_directed(&self, triangle: [usize; 3]) -> bool {
        (0..3).any(|i| self.directed.contains(&(triangle[i], triangle[(i + 1) % 3])))
    }

    /// True when segment `(a, b)` properly crosses an edge of a point in `near`
    fn crosses_existing(&self, frame: &TangentFrame, a: usize, b: usize, near: &[usize]) -> bool {
        let pa = frame.project(&self.positions[a]);
        let pb = frame.project(&self.positions[b]);
        let tolerance = GEOMETRY_EPSILON * (self.positions[b] - self.positions[a]).norm_squared();
        let strictly_apart = |x: f64, y: f64| (x > tolerance && y < -tolerance) || (x < -tolerance && y > tolerance);

        near.iter().any(|&q| {
            self.adjacency[q].iter().any(|&r| {
                if q == a || q == b || r == a || r == b {
                    return false;
                }
                let pq = frame.project(&self.positions[q]);
                let pr = frame.project(&self.positions[r]);
                strictly_apart(orient2d(pa, pb, pq), orient2d(pa, pb, pr))
                    && strictly_apart(orient2d(pq, pr, pa), orient2d(pq, pr, pb))
            })
        })
    }

    /// True when a point of `near` other than the corners projects into the triangle
    fn covers_point(&self, frame: &TangentFrame, triangle: [usize; 3], near: &[usize]) -> bool {
        let [a, b, c] = triangle.map(|i| frame.project(&self.positions[i]));
        let area = orient2d(a, b, c);
        if area.abs() <= f64::MIN_POSITIVE {
            return true;
        }
        near.iter().filter(|q| !triangle.contains(q)).any(|&q| {
            let p = frame.project(&self.positions[q]);
            let weights = [orient2d(b, c, p) / area, orient2d(c, a, p) / area, orient2d(a, b, p) / area];
            weights.iter().all(|&w| w >= -GEOMETRY_EPSILON)
        })
    }

    /// Record a triangle and update edge bookkeeping and point states
    fn emit(&mut self, triangle: [usize; 3]) {
        self.triangles.push(triangle);
        for i in 0..3 {
            let (a, b) = (triangle[i], triangle[(i + 1) % 3]);
            self.directed.insert((a, b));
            let faces = self.edge_faces.entry((a.min(b), a.max(b))).or_insert(0);
            *faces += 1;
            match *faces {
                1 => {
                    self.adjacency[a].push(b);
                    self.adjacency[b].push(a);
                    self.edge_length_sum += (self.positions[b] - self.positions[a]).norm();
                    self.edge_total += 1;
                    self.open_edges[a] += 1;
                    self.open_edges[b] += 1;
                }
                2 => {
                    self.open_edges[a] -= 1;
                    self.open_edges[b] -= 1;
                }
                _ => {}
            }
        }
        for &v in &triangle {
            self.states[v] = if self.open_edges[v] == 0 {
                PointState::Completed
            } else {
                PointState::Fringe
            };
        }
    }

    /// Queue `(from, to)` unless its reverse already closes it
    fn push_edge(&mut self, from: usize, to: usize, opposite: usize) {
        if !self.directed.contains(&(to, from)) {
            self.queue.push_back(FrontEdge { from, to, opposite });
        }
    }

    /// Try to start a new front with a triangle at `seed`
    fn start_from(&mut self, seed: usize) -> bool {
        let near: Vec<usize> = self
            .neighbors(&self.positions[seed], self.config.max_nearest_neighbors + 1)
            .into_iter()
            .filter(|&i| i != seed)
            .collect();
        let Some(&nearest) = near.first() else {
            return false;
        };
        let ps = self.positions[seed];
        let limit = self.max_edge_length((self.positions[nearest] - ps).norm());
        let mut near_with_seed = near.clone();
        near_with_seed.push(seed);

        for &b in &near {
            if self.states[b] == PointState::Completed {
                continue;
            }
            let pb = self.positions[b];
            if (pb - ps).norm() > limit {
                break;
            }

            let mut best: Option<([usize; 3], Choice)> = None;
            for &c in &near {
                if c == b || self.states[c] == PointState::Completed {
                    continue;
                }
                let pc = self.positions[c];
                if (pc - ps).norm() > limit || (pc - pb).norm() > limit || !self.angles_ok(seed, b, c) {
                    continue;
                }

                let raw = (pb - ps).cross(&(pc - ps));
                let alignment = raw.dot(&self.normals[seed]);
                if alignment.abs() <= GEOMETRY_EPSILON * raw.norm() {
                    continue;
                }
                let (triangle, normal) = if alignment > 0.0 {
                    ([seed, b, c], raw.normalize())
                } else {
                    ([seed, c, b], -raw.normalize())
                };
                if !self.surface_ok(&triangle, &normal) || self.has_directed(triangle) {
                    continue;
                }

                let frame = TangentFrame::new(ps, self.positions[triangle[1]] - ps, &normal);
                if self.crosses_existing(&frame, seed, b, &near)
                    || self.crosses_existing(&frame, b, c, &near)
                    || self.crosses_existing(&frame, c, seed, &near)
                    || self.covers_point(&frame, triangle, &near_with_seed)
                {
                    continue;
                }

                let choice = Choice {
                    point: c,
                    circumradius: circumradius(&ps, &pb, &pc),
                    new_edges: (pc - ps).norm() + (pc - pb).norm(),
                };
                if best.as_ref().map_or(true, |(_, current)| choice.beats(current)) {
                    best = Some((triangle, choice));
                }
            }

            if let Some((triangle, _)) = best {
                let [x, y, z] = triangle;
                self.emit(triangle);
                self.push_edge(x, y, z);
                self.push_edge(y, z, x);
                self.push_edge(z, x, y);
                return true;
            }
        }
        false
    }

    /// Grow one triangle across a front edge, if any candidate is valid
    fn advance(&mut self, edge: FrontEdge) {
        let FrontEdge { from: u, to: v, opposite: w } = edge;
        if self.directed.contains(&(v, u)) {
            return;
        }
        let (pu, pv, pw) = (self.positions[u], self.positions[v], self.positions[w]);
        let Some(normal) = (pv - pu).cross(&(pw - pu)).try_normalize(f64::MIN_POSITIVE) else {
            return;
        };
        let midpoint = nalgebra::center(&pu, &pv);
        let near = self.neighbors(&midpoint, self.config.max_nearest_neighbors);
        let frame = TangentFrame::new(pu, pv - pu, &normal);
        let limit = self.max_edge_length(0.0);
        let across = -GEOMETRY_EPSILON * (pv - pu).norm();

        let mut best: Option<Choice> = None;
        for &c in &near {
            if c == u || c == v || c == w || self.states[c] == PointState::Completed {
                continue;
            }
            let pc = self.positions[c];
            if frame.project(&pc)[1] >= across {
                continue;
            }
            let (to_u, to_v) = ((pc - pu).norm(), (pc - pv).norm());
            if to_u > limit || to_v > limit || !self.angles_ok(v, u, c) {
                continue;
            }
            if (pu - pv).cross(&(pc - pv)).dot(&normal) <= 0.0 {
                continue;
            }
            if !self.surface_ok(&[c], &normal) {
                continue;
            }
            if self.directed.contains(&(u, c)) || self.directed.contains(&(c, v)) {
                continue;
            }
            if self.crosses_existing(&frame, u, c, &near)
                || self.crosses_existing(&frame, c, v, &near)
                || self.covers_point(&frame, [u, v, c], &near)
            {
                continue;
            }

            let choice = Choice {
                point: c,
                circumradius: circumradius(&pu, &pv, &pc),
                new_edges: to_u + to_v,
            };
            if best.as_ref().map_or(true, |current| choice.beats(current)) {
                best = Some(choice);
            }
        }

        if let Some(choice) = best {
            let c = choice.point;
            self.emit([v, u, c]);
            self.push_edge(u, c, v);
            self.push_edge(c, v, u);
        }
    }
}

/// Triangulate with the given configuration
pub fn greedy_projection(cloud: &OrientedCloud, config: &GreedyProjectionConfig) -> Result<PolygonMesh> {
    GreedyProjection::new(config.clone())?.reconstruct(cloud)
}
