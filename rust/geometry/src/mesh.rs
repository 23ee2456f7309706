// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh data structures

use crate::error::{Error, Result};
use nalgebra::{Point2, Point3, Vector2, Vector3};

/// Coordinate shift for tile-relative storage.
/// Stores the offset subtracted from coordinates to improve Float32 precision
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoordinateShift {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl CoordinateShift {
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Subtract the shift in f64 BEFORE converting to f32.
    ///
    /// For georeferenced coordinates like 120,000 / 487,000 (RD New) a direct
    /// f32 conversion keeps only centimetre precision; tile-relative values
    /// keep sub-millimetre precision.
    #[inline]
    pub fn to_local(&self, point: &Point3<f64>) -> [f32; 3] {
        [
            (point.x - self.x) as f32,
            (point.y - self.y) as f32,
            (point.z - self.z) as f32,
        ]
    }

    #[inline]
    pub fn to_world(&self, local: [f32; 3]) -> Point3<f64> {
        Point3::new(
            local[0] as f64 + self.x,
            local[1] as f64 + self.y,
            local[2] as f64 + self.z,
        )
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Processing stage a [`SubObject`] has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeshState {
    #[default]
    Raw,
    Deduplicated,
    Simplified,
    SpikeClipped,
    TileClipped,
    Finalized,
}

/// Flattened render mesh of one feature, children included.
///
/// Positions stay in f64 world coordinates until the tile codec writes them.
/// `uvs` is either empty or aligned with `vertices`.
#[derive(Debug, Clone, Default)]
pub struct SubObject {
    /// Feature key or configured identifier attribute value
    pub id: String,
    pub vertices: Vec<Point3<f64>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    /// Triangle indices (i0, i1, i2)
    pub indices: Vec<u32>,
    /// Horizontal centroid used for tile bucketing
    pub centroid: Point2<f64>,
    pub submesh_index: u32,
    /// Simplification target; zero disables simplification
    pub max_vertices_per_square_meter: f32,
    pub state: MeshState,
}

impl SubObject {
    pub fn new(id: impl Into<String>, submesh_index: u32, max_vertices_per_square_meter: f32) -> Self {
        Self {
            id: id.into(),
            submesh_index,
            max_vertices_per_square_meter,
            ..Default::default()
        }
    }

    /// Empty mesh carrying this object's identity, for split or rebuilt copies.
    pub fn empty_like(&self) -> Self {
        Self {
            id: self.id.clone(),
            submesh_index: self.submesh_index,
            max_vertices_per_square_meter: self.max_vertices_per_square_meter,
            centroid: self.centroid,
            state: self.state,
            ..Default::default()
        }
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.indices.is_empty()
    }

    #[inline]
    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty()
    }

    /// Add a vertex, keeping the UV array aligned.
    ///
    /// The first textured vertex back-fills zero UVs for earlier untextured
    /// ones; later untextured vertices get a zero UV.
    #[inline]
    pub fn push_vertex(&mut self, position: Point3<f64>, normal: Vector3<f32>, uv: Option<Vector2<f32>>) -> u32 {
        let index = self.vertices.len() as u32;
        match uv {
            Some(uv) => {
                if self.uvs.len() < self.vertices.len() {
                    self.uvs.resize(self.vertices.len(), Vector2::zeros());
                }
                self.uvs.push(uv);
            }
            None if self.has_uvs() => self.uvs.push(Vector2::zeros()),
            None => {}
        }
        self.vertices.push(position);
        self.normals.push(normal);
        index
    }

    #[inline]
    pub fn push_triangle(&mut self, i0: u32, i1: u32, i2: u32) {
        self.indices.extend_from_slice(&[i0, i1, i2]);
    }

    /// Append another mesh, offsetting its indices past our vertices.
    pub fn append(&mut self, other: &SubObject) {
        if other.is_empty() {
            return;
        }

        let vertex_offset = self.vertices.len() as u32;
        if other.has_uvs() || self.has_uvs() {
            self.uvs.resize(self.vertices.len(), Vector2::zeros());
            if other.has_uvs() {
                self.uvs.extend_from_slice(&other.uvs);
            } else {
                self.uvs.resize(self.vertices.len() + other.vertices.len(), Vector2::zeros());
            }
        }

        self.vertices.extend_from_slice(&other.vertices);
        self.normals.extend_from_slice(&other.normals);
        self.indices
            .extend(other.indices.iter().map(|&i| i + vertex_offset));
    }

    /// Check the triangle list and attribute arrays line up.
    pub fn validate(&self) -> Result<()> {
        if self.indices.len() % 3 != 0 {
            return Err(self.invalid(format!(
                "triangle index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        if self.normals.len() != self.vertices.len() {
            return Err(self.invalid(format!(
                "{} normals for {} vertices",
                self.normals.len(),
                self.vertices.len()
            )));
        }
        if self.has_uvs() && self.uvs.len() != self.vertices.len() {
            return Err(self.invalid(format!("{} uvs for {} vertices", self.uvs.len(), self.vertices.len())));
        }
        if let Some(&max) = self.indices.iter().max() {
            if max as usize >= self.vertices.len() {
                return Err(self.invalid(format!(
                    "index {max} out of range for {} vertices",
                    self.vertices.len()
                )));
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidMesh {
            id: self.id.clone(),
            reason,
        }
    }

    /// Mean X/Y of all vertices; `None` when there are no vertices.
    pub fn compute_centroid(&self) -> Option<Point2<f64>> {
        if self.vertices.is_empty() {
            return None;
        }

        let (sx, sy) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(sx, sy), v| (sx + v.x, sy + v.y));
        let count = self.vertices.len() as f64;
        Some(Point2::new(sx / count, sy / count))
    }

    /// Axis-aligned bounds (min, max); `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.vertices.first()?;
        let mut min = first;
        let mut max = first;

        for v in &self.vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            min.z = min.z.min(v.z);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
            max.z = max.z.max(v.z);
        }

        Some((min, max))
    }

    /// Total triangle area.
    pub fn surface_area(&self) -> f64 {
        self.indices
            .chunks_exact(3)
            .map(|t| {
                let v0 = self.vertices[t[0] as usize];
                let e1 = self.vertices[t[1] as usize] - v0;
                let e2 = self.vertices[t[2] as usize] - v0;
                e1.cross(&e2).norm() * 0.5
            })
            .sum()
    }

    /// Recompute smooth normals, weighting each face by its area.
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vector3::<f64>::zeros(); self.vertices.len()];

        // Accumulate face normals
        for t in self.indices.chunks_exact(3) {
            let (i0, i1, i2) = (t[0] as usize, t[1] as usize, t[2] as usize);
            let edge1 = self.vertices[i1] - self.vertices[i0];
            let edge2 = self.vertices[i2] - self.vertices[i0];
            let normal = edge1.cross(&edge2);

            normals[i0] += normal;
            normals[i1] += normal;
            normals[i2] += normal;
        }

        self.normals = normals
            .into_iter()
            .map(|n| match n.try_normalize(1e-12) {
                Some(n) => Vector3::new(n.x as f32, n.y as f32, n.z as f32),
                None => Vector3::z(),
            })
            .collect();
    }

    /// Keep only vertices referenced by a triangle, preserving their order.
    pub fn compact(&mut self) {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut kept = Vec::with_capacity(self.vertices.len());
        for index in &mut self.indices {
            let slot = &mut remap[*index as usize];
            if *slot == u32::MAX {
                *slot = kept.len() as u32;
                kept.push(*index as usize);
            }
            *index = *slot;
        }

        if kept.len() == self.vertices.len() && kept.iter().enumerate().all(|(i, &k)| i == k) {
            return;
        }

        self.vertices = kept.iter().map(|&i| self.vertices[i]).collect();
        self.normals = kept.iter().map(|&i| self.normals[i]).collect();
        if self.has_uvs() {
            self.uvs = kept.iter().map(|&i| self.uvs[i]).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad(offset: f64) -> SubObject {
        let mut sub = SubObject::new("quad", 0, 0.0);
        let n = Vector3::z();
        sub.push_vertex(Point3::new(offset, 0.0, 0.0), n, None);
        sub.push_vertex(Point3::new(offset + 2.0, 0.0, 0.0), n, None);
        sub.push_vertex(Point3::new(offset + 2.0, 2.0, 0.0), n, None);
        sub.push_vertex(Point3::new(offset, 2.0, 0.0), n, None);
        sub.push_triangle(0, 1, 2);
        sub.push_triangle(0, 2, 3);
        sub
    }

    #[test]
    fn test_subobject_creation() {
        let sub = SubObject::new("a", 2, 0.5);
        assert!(sub.is_empty());
        assert_eq!(sub.vertex_count(), 0);
        assert_eq!(sub.triangle_count(), 0);
        assert_eq!(sub.state, MeshState::Raw);
        assert!(sub.compute_centroid().is_none());
        assert!(sub.bounds().is_none());
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut a = quad(0.0);
        let b = quad(10.0);
        a.append(&b);

        assert_eq!(a.vertex_count(), 8);
        assert_eq!(a.triangle_count(), 4);
        assert_eq!(&a.indices[6..], &[4, 5, 6, 4, 6, 7]);
        a.validate().unwrap();
    }

    #[test]
    fn test_uv_backfill_keeps_alignment() {
        let mut sub = quad(0.0);
        sub.push_vertex(Point3::new(0.0, 0.0, 1.0), Vector3::z(), Some(Vector2::new(0.5, 0.5)));
        assert_eq!(sub.uvs.len(), 5);
        sub.push_vertex(Point3::new(0.0, 0.0, 2.0), Vector3::z(), None);
        assert_eq!(sub.uvs.len(), 6);
        assert_eq!(sub.uvs[4], Vector2::new(0.5, 0.5));

        let mut plain = quad(5.0);
        plain.append(&sub);
        assert_eq!(plain.uvs.len(), plain.vertex_count());
    }

    #[test]
    fn test_validate_rejects_partial_triangle() {
        let mut sub = quad(0.0);
        sub.indices.push(0);
        assert!(matches!(sub.validate(), Err(Error::InvalidMesh { .. })));

        let mut sub = quad(0.0);
        sub.indices[0] = 9;
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_centroid_bounds_area() {
        let sub = quad(100_000.0);
        let c = sub.compute_centroid().unwrap();
        assert_relative_eq!(c.x, 100_001.0, epsilon = 1e-9);
        assert_relative_eq!(c.y, 1.0, epsilon = 1e-9);

        let (min, max) = sub.bounds().unwrap();
        assert_relative_eq!(min.x, 100_000.0);
        assert_relative_eq!(max.y, 2.0);
        assert_relative_eq!(sub.surface_area(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_recompute_normals() {
        let mut sub = quad(0.0);
        sub.normals = vec![Vector3::x(); 4];
        sub.recompute_normals();
        for n in &sub.normals {
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_compact_drops_unreferenced() {
        let mut sub = quad(0.0);
        sub.indices = vec![0, 2, 3];
        sub.compact();
        assert_eq!(sub.vertex_count(), 3);
        assert_eq!(sub.indices, vec![0, 1, 2]);
        assert_relative_eq!(sub.vertices[1].x, 2.0);
    }

    #[test]
    fn test_coordinate_shift_preserves_precision() {
        let shift = CoordinateShift::new(121_000.0, 487_000.0, 0.0);
        let p = Point3::new(121_000.123456, 487_000.654321, 12.111);
        let local = shift.to_local(&p);
        assert!((local[0] - 0.123456).abs() < 1e-5);
        let back = shift.to_world(local);
        assert!((back.y - p.y).abs() < 1e-5);
        assert!(!shift.is_zero());
    }
}
