//! Nearest neighbor search implementations
//!
//! [`KdTree`] is the spatial index used by every stage that needs neighbor
//! queries. It is built once over an arena of points, addressed by index, and
//! exposes no mutating operations, so it can be shared by reference between
//! worker threads.

use meshpcl_core::{CloudPoint, Error, NearestNeighborSearch, Neighbor, Point3d, PointCloud, Result};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Maximum number of points stored in a leaf
const LEAF_SIZE: usize = 16;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        start: usize,
        end: usize,
    },
    Split {
        axis: usize,
        value: f64,
        left: usize,
        right: usize,
    },
}

/// Balanced KD-tree over a fixed point set
#[derive(Debug, Clone)]
pub struct KdTree {
    points: Vec<Point3d>,
    /// Permutation of point indices; every leaf owns a contiguous range
    order: Vec<usize>,
    nodes: Vec<Node>,
}

impl KdTree {
    /// Build a tree over `points` by median partitioning on the axis of
    /// largest spread.
    ///
    /// # Arguments
    /// * `points` - Points to index; query results refer to positions in this slice
    ///
    /// # Returns
    /// * `Result<KdTree>` - `DegenerateInput` for an empty slice, `InvalidData`
    ///   for non-finite coordinates
    ///
    /// # Example
    /// ```rust
    /// use meshpcl_core::Point3d;
    /// use meshpcl_algorithms::KdTree;
    ///
    /// let tree = KdTree::build(&[
    ///     Point3d::new(0.0, 0.0, 0.0),
    ///     Point3d::new(1.0, 0.0, 0.0),
    ///     Point3d::new(5.0, 0.0, 0.0),
    /// ]).unwrap();
    /// let nearest = tree.k_nearest(&Point3d::new(0.9, 0.0, 0.0), 2);
    /// assert_eq!(nearest[0].index, 1);
    /// assert_eq!(nearest[1].index, 0);
    /// ```
    pub fn build(points: &[Point3d]) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::degenerate("cannot build a spatial index over zero points"));
        }
        if let Some(bad) = points.iter().position(|p| !p.coords.iter().all(|c| c.is_finite())) {
            return Err(Error::InvalidData(format!(
                "point {} has a non-finite coordinate",
                bad
            )));
        }

        let mut tree = Self {
            points: points.to_vec(),
            order: (0..points.len()).collect(),
            nodes: Vec::with_capacity(2 * points.len() / LEAF_SIZE + 1),
        };
        tree.build_node(0, points.len());
        Ok(tree)
    }

    /// Build a tree over the positions of a cloud
    pub fn from_cloud<T: CloudPoint>(cloud: &PointCloud<T>) -> Result<Self> {
        Self::build(&cloud.positions())
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { start, end });
        if end - start <= LEAF_SIZE {
            return slot;
        }

        let mut min = self.points[self.order[start]];
        let mut max = min;
        for &i in &self.order[start..end] {
            min = min.inf(&self.points[i]);
            max = max.sup(&self.points[i]);
        }
        let spread = max - min;
        let axis = spread.iamax();
        if spread[axis] <= 0.0 {
            // All points coincide
            return slot;
        }

        let mid = start + (end - start) / 2;
        let points = &self.points;
        self.order[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            points[a][axis].total_cmp(&points[b][axis])
        });
        let value = self.points[self.order[mid]][axis];

        let left = self.build_node(start, mid);
        let right = self.build_node(mid, end);
        self.nodes[slot] = Node::Split {
            axis,
            value,
            left,
            right,
        };
        slot
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Up to `k` nearest points, ascending by squared distance (ties by index).
    /// Returns every point when fewer than `k` exist.
    pub fn k_nearest(&self, query: &Point3d, k: usize) -> Vec<Neighbor> {
        if k == 0 || !is_finite(query) {
            return Vec::new();
        }
        let mut heap = BinaryHeap::with_capacity(k + 1);
        self.k_nearest_in(0, query, k, &mut heap);
        heap.into_sorted_vec().into_iter().map(|c| c.0).collect()
    }

    fn k_nearest_in(&self, node: usize, query: &Point3d, k: usize, heap: &mut BinaryHeap<Candidate>) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &index in &self.order[start..end] {
                    let candidate = Candidate(Neighbor::new(
                        index,
                        (self.points[index] - query).norm_squared(),
                    ));
                    if heap.len() < k {
                        heap.push(candidate);
                    } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                        heap.pop();
                        heap.push(candidate);
                    }
                }
            }
            Node::Split {
                axis,
                value,
                left,
                right,
            } => {
                let diff = query[axis] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.k_nearest_in(near, query, k, heap);
                let worst = heap.peek().map(|c| c.0.distance_squared);
                if heap.len() < k || worst.is_some_and(|w| diff * diff <= w) {
                    self.k_nearest_in(far, query, k, heap);
                }
            }
        }
    }

    /// All points with distance `<= radius`, ascending. May be empty.
    pub fn radius_search(&self, query: &Point3d, radius: f64) -> Vec<Neighbor> {
        if !is_finite(query) || !(radius >= 0.0) {
            return Vec::new();
        }
        let mut found = Vec::new();
        self.radius_in(0, query, radius * radius, &mut found);
        found.sort_by(Neighbor::cmp_by_distance);
        found
    }

    fn radius_in(&self, node: usize, query: &Point3d, radius_sq: f64, found: &mut Vec<Neighbor>) {
        match self.nodes[node] {
            Node::Leaf { start, end } => {
                for &index in &self.order[start..end] {
                    let d = (self.points[index] - query).norm_squared();
                    if d <= radius_sq {
                        found.push(Neighbor::new(index, d));
                    }
                }
            }
            Node::Split {
                axis,
                value,
                left,
                right,
            } => {
                let diff = query[axis] - value;
                let (near, far) = if diff < 0.0 { (left, right) } else { (right, left) };
                self.radius_in(near, query, radius_sq, found);
                if diff * diff <= radius_sq {
                    self.radius_in(far, query, radius_sq, found);
                }
            }
        }
    }

    /// Up to `k` nearest points that also lie within `radius`
    pub fn k_nearest_within(&self, query: &Point3d, k: usize, radius: f64) -> Vec<Neighbor> {
        let mut found = self.radius_search(query, radius);
        found.truncate(k);
        found
    }
}

impl NearestNeighborSearch for KdTree {
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<Neighbor> {
        self.k_nearest(query, k)
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<Neighbor> {
        self.radius_search(query, radius)
    }
}

/// Heap entry ordered by distance, then index
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate(Neighbor);

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp_by_distance(&other.0)
    }
}

fn is_finite(p: &Point3d) -> bool {
    p.coords.iter().all(|c| c.is_finite())
}

/// Simple brute force nearest neighbor search for small datasets
pub struct BruteForceSearch {
    points: Vec<Point3d>,
}

impl BruteForceSearch {
    pub fn new(points: &[Point3d]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }

    fn all_sorted(&self, query: &Point3d) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = self
            .points
            .iter()
            .enumerate()
            .map(|(idx, point)| Neighbor::new(idx, (point - query).norm_squared()))
            .collect();
        all.sort_by(Neighbor::cmp_by_distance);
        all
    }
}

impl NearestNeighborSearch for BruteForceSearch {
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<Neighbor> {
        if !is_finite(query) {
            return Vec::new();
        }
        let mut all = self.all_sorted(query);
        all.truncate(k);
        all
    }

    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<Neighbor> {
        if !is_finite(query) || !(radius >= 0.0) {
            return Vec::new();
        }
        let radius_squared = radius * radius;
        self.all_sorted(query)
            .into_iter()
            .take_while(|n| n.distance_squared <= radius_squared)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(n: usize) -> Vec<Point3d> {
        (0..n).map(|i| Point3d::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn empty_input_is_degenerate() {
        assert!(matches!(KdTree::build(&[]), Err(Error::DegenerateInput(_))));
    }

    #[test]
    fn non_finite_points_are_rejected() {
        let points = [Point3d::origin(), Point3d::new(f64::NAN, 0.0, 0.0)];
        assert!(matches!(KdTree::build(&points), Err(Error::InvalidData(_))));
    }

    #[test]
    fn knn_returns_expected_neighbors() {
        let tree = KdTree::build(&[
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(2.0, 0.0, 0.0),
            Point3d::new(10.0, 0.0, 0.0),
        ])
        .unwrap();
        let found = tree.k_nearest(&Point3d::new(0.2, 0.0, 0.0), 2);
        let indices: Vec<usize> = found.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert!(found[0].distance_squared <= found[1].distance_squared);
    }

    #[test]
    fn knn_with_large_k_returns_everything() {
        let tree = KdTree::build(&line(5)).unwrap();
        assert_eq!(tree.k_nearest(&Point3d::origin(), 50).len(), 5);
        assert!(tree.k_nearest(&Point3d::origin(), 0).is_empty());
    }

    #[test]
    fn radius_search_is_inclusive_and_sorted() {
        let tree = KdTree::build(&line(100)).unwrap();
        let found = tree.radius_search(&Point3d::new(50.0, 0.0, 0.0), 2.0);
        let indices: Vec<usize> = found.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![50, 49, 51, 48, 52]);
        assert!(tree.radius_search(&Point3d::new(0.0, 5.0, 0.0), 1.0).is_empty());
    }

    #[test]
    fn nan_query_yields_nothing() {
        let tree = KdTree::build(&line(3)).unwrap();
        assert!(tree.k_nearest(&Point3d::new(f64::NAN, 0.0, 0.0), 1).is_empty());
        assert!(tree.radius_search(&Point3d::origin(), f64::NAN).is_empty());
    }

    #[test]
    fn coincident_points_do_not_recurse_forever() {
        let points = vec![Point3d::new(1.0, 1.0, 1.0); 200];
        let tree = KdTree::build(&points).unwrap();
        let found = tree.k_nearest(&Point3d::origin(), 3);
        let indices: Vec<usize> = found.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn tree_is_shareable_between_threads() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<KdTree>();
    }

    proptest! {
        #[test]
        fn matches_brute_force(
            coords in prop::collection::vec((-10.0f64..10.0, -10.0f64..10.0, -10.0f64..10.0), 1..300),
            query in (-12.0f64..12.0, -12.0f64..12.0, -12.0f64..12.0),
            k in 1usize..20,
            radius in 0.0f64..6.0,
        ) {
            let points: Vec<Point3d> = coords.iter().map(|&(x, y, z)| Point3d::new(x, y, z)).collect();
            let q = Point3d::new(query.0, query.1, query.2);
            let tree = KdTree::build(&points).unwrap();
            let brute = BruteForceSearch::new(&points);

            let expected: Vec<usize> = brute.find_k_nearest(&q, k).iter().map(|n| n.index).collect();
            let actual: Vec<usize> = tree.find_k_nearest(&q, k).iter().map(|n| n.index).collect();
            prop_assert_eq!(actual, expected);

            let expected: Vec<usize> = brute.find_radius_neighbors(&q, radius).iter().map(|n| n.index).collect();
            let actual: Vec<usize> = tree.find_radius_neighbors(&q, radius).iter().map(|n| n.index).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
