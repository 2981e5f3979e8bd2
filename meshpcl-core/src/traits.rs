//! Core traits for meshpcl

use crate::point::Point3d;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A neighbor returned by a spatial query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Index of the point in the indexed set
    pub index: usize,
    /// Squared Euclidean distance to the query
    pub distance_squared: f64,
}

impl Neighbor {
    pub fn new(index: usize, distance_squared: f64) -> Self {
        Self {
            index,
            distance_squared,
        }
    }

    pub fn distance(&self) -> f64 {
        self.distance_squared.sqrt()
    }

    /// Ascending distance, ties broken by index
    pub fn cmp_by_distance(&self, other: &Self) -> Ordering {
        self.distance_squared
            .total_cmp(&other.distance_squared)
            .then(self.index.cmp(&other.index))
    }
}

/// Trait for nearest neighbor search functionality
pub trait NearestNeighborSearch {
    /// Find the k nearest neighbors to a query point, closest first
    fn find_k_nearest(&self, query: &Point3d, k: usize) -> Vec<Neighbor>;

    /// Find all neighbors within a given radius, closest first
    fn find_radius_neighbors(&self, query: &Point3d, radius: f64) -> Vec<Neighbor>;
}

