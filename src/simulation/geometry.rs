//! Geometry helpers.
//!
//! - Euclidean distance between node positions
//! - Random placement of nodes that were given no coordinates, keeping a
//!   minimum spacing from already placed nodes

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::Point;

/// Upper bound on placement attempts per node before giving up.
const MAX_PLACEMENT_ATTEMPTS: usize = 10_000;

/// Squared Euclidean distance (avoids a sqrt when only comparing).
pub fn distance2(a: &Point, b: &Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

/// Euclidean distance in meters.
pub fn distance(a: &Point, b: &Point) -> f64 {
    distance2(a, b).sqrt()
}

/// Area used for random node placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementArea {
    /// Width of the area in meters, starting at x = 0.
    pub width: f64,
    /// Height of the area in meters, starting at y = 0.
    pub height: f64,
    /// Minimum distance between any two placed nodes.
    #[serde(default)]
    pub min_distance: f64,
    /// Seed for reproducible placement.
    #[serde(default)]
    pub seed: u64,
}

/// Pick a uniformly random position inside `area` that keeps at least
/// `area.min_distance` to every point in `placed`.
///
/// Returns `None` when no such position was found within the attempt budget.
pub fn find_random_position<R: Rng>(placed: &[Point], area: &PlacementArea, rng: &mut R) -> Option<Point> {
    let min2 = area.min_distance * area.min_distance;
    for _ in 0..MAX_PLACEMENT_ATTEMPTS {
        let candidate = Point::new(rng.gen_range(0.0..=area.width), rng.gen_range(0.0..=area.height));
        if placed.iter().all(|p| distance2(p, &candidate) >= min2) {
            return Some(candidate);
        }
    }
    None
}
