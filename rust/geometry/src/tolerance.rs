// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vertex equivalence tolerances.
//!
//! All thresholds are plain values handed to the mesh stages, so features
//! processed on different threads never share mutable comparison state.

use nalgebra::{Point3, Vector2, Vector3};

/// Angle between two normals in degrees.
///
/// Uses `2 * atan(|a - b| / |a + b|)`, which stays accurate for nearly
/// parallel normals where `acos(a · b)` loses precision.
pub fn angle_between_normals(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    let (Some(a), Some(b)) = (a.try_normalize(1e-12), b.try_normalize(1e-12)) else {
        return 0.0;
    };
    let radians = 2.0 * ((a - b).norm().atan2((a + b).norm()));
    radians.to_degrees()
}

/// When two vertex/normal pairs count as the same vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeTolerance {
    /// Maximum position distance in metres (exclusive).
    pub distance: f64,
    /// Maximum normal angle in degrees (exclusive).
    pub angle_degrees: f32,
}

impl Default for MergeTolerance {
    fn default() -> Self {
        Self {
            distance: 0.01,
            angle_degrees: 5.0,
        }
    }
}

impl MergeTolerance {
    pub fn new(distance: f64, angle_degrees: f32) -> Self {
        Self {
            distance,
            angle_degrees,
        }
    }

    /// Twice as permissive in both distance and angle.
    pub fn loosened(self) -> Self {
        Self {
            distance: self.distance * 2.0,
            angle_degrees: self.angle_degrees * 2.0,
        }
    }

    /// Edge length of the spatial hash cells used to find merge candidates.
    #[inline]
    pub fn cell_size(&self) -> f64 {
        self.distance.max(1e-6)
    }
}

/// Position, normal and optional UV of one vertex occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexNormalKey {
    pub position: Point3<f64>,
    pub normal: Vector3<f32>,
    pub uv: Option<Vector2<f32>>,
}

impl VertexNormalKey {
    pub fn new(position: Point3<f64>, normal: Vector3<f32>, uv: Option<Vector2<f32>>) -> Self {
        Self { position, normal, uv }
    }

    /// Spatial hash cell of edge length `size` containing this position.
    #[inline]
    pub fn cell(&self, size: f64) -> (i64, i64, i64) {
        (
            (self.position.x / size).floor() as i64,
            (self.position.y / size).floor() as i64,
            (self.position.z / size).floor() as i64,
        )
    }

    /// Whether two occurrences collapse onto one vertex.
    ///
    /// Coincident positions always pass the distance test, so a zero distance
    /// tolerance still merges exact duplicates. UVs must match exactly.
    pub fn matches(&self, other: &Self, tolerance: &MergeTolerance) -> bool {
        let distance = (self.position - other.position).norm();
        if distance >= tolerance.distance && distance > 0.0 {
            return false;
        }
        if self.uv != other.uv {
            return false;
        }
        angle_between_normals(&self.normal, &other.normal) < tolerance.angle_degrees
    }
}

/// Tunables for the mesh stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshSettings {
    /// Deduplication tolerance for meshes that are not simplified
    pub merge: MergeTolerance,
    /// Positions closer than this are welded before decimation
    pub weld_distance: f64,
    /// Deduplication tolerance applied after decimation
    pub post_simplify: MergeTolerance,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self::with_merge(MergeTolerance::default())
    }
}

impl MeshSettings {
    pub fn with_merge(merge: MergeTolerance) -> Self {
        Self {
            merge,
            weld_distance: 1e-6,
            post_simplify: merge.loosened(),
        }
    }
}
