//! Nearest-neighbour index over catalog unit vectors.
//!
//! All points live on the unit sphere, so the 3D chord length between two
//! points is `2·sin(θ/2)` for angular separation `θ`. Nearest in 3D is
//! therefore nearest in angle, and an ordinary k-d tree answers angular
//! queries.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use nalgebra::Vector3;

use crate::error::{CalibrationError, Result};

/// Result of a nearest-neighbour query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    /// Index into the position slice the index was built from
    pub index: usize,
    /// Euclidean (chord) distance to the query point
    pub distance: f64,
}

/// Convert a chord length on the unit sphere to an angle in radians
pub fn chord_to_angle(chord: f64) -> f64 {
    2.0 * (chord / 2.0).clamp(-1.0, 1.0).asin()
}

/// Convert an angle in radians to a chord length on the unit sphere
pub fn angle_to_chord(angle: f64) -> f64 {
    2.0 * (angle / 2.0).sin()
}

/// Immutable k-d tree over 3D unit vectors
pub struct SpatialIndex {
    tree: ImmutableKdTree<f64, 3>,
    len: usize,
}

impl SpatialIndex {
    /// Build the index over `positions`.
    ///
    /// Query results refer back to positions by their index in this slice.
    pub fn build(positions: &[Vector3<f64>]) -> Result<Self> {
        if positions.is_empty() {
            return Err(CalibrationError::EmptyCatalog);
        }
        let points: Vec<[f64; 3]> = positions.iter().map(|p| [p.x, p.y, p.z]).collect();
        Ok(Self {
            tree: ImmutableKdTree::new_from_slice(&points),
            len: points.len(),
        })
    }

    /// Nearest indexed point to `point`
    pub fn nearest(&self, point: &Vector3<f64>) -> Neighbour {
        let nn = self
            .tree
            .nearest_one::<SquaredEuclidean>(&[point.x, point.y, point.z]);
        Neighbour {
            index: nn.item as usize,
            distance: nn.distance.max(0.0).sqrt(),
        }
    }

    /// Nearest indexed point for every query point, in query order
    pub fn query(&self, points: &[Vector3<f64>]) -> Vec<Neighbour> {
        points.iter().map(|p| self.nearest(p)).collect()
    }

    /// Number of indexed points
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
