// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Plane cuts
//!
//! Fast triangle clipping that keeps vertex attributes. Cut edges get one
//! shared intersection vertex, so a clipped mesh stays welded where the
//! input was.

use crate::mesh::SubObject;
use nalgebra::{Point3, Vector2, Vector3};
use rustc_hash::FxHashMap;

/// Plane definition for clipping
#[derive(Debug, Clone, Copy)]
pub struct Plane {
    /// Point on the plane
    pub point: Point3<f64>,
    /// Normal vector (normalized), pointing at the side that is kept
    pub normal: Vector3<f64>,
}

impl Plane {
    pub fn new(point: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            point,
            normal: normal.normalize(),
        }
    }

    /// Calculate signed distance from point to plane
    /// Positive = in front, Negative = behind
    #[inline]
    pub fn signed_distance(&self, point: &Point3<f64>) -> f64 {
        (point - self.point).dot(&self.normal)
    }

    #[inline]
    pub fn is_front(&self, point: &Point3<f64>) -> bool {
        self.signed_distance(point) >= 0.0
    }
}

/// Keeps the part of a mesh in front of a plane.
#[derive(Debug, Clone, Copy)]
pub struct ClippingProcessor {
    /// Vertices closer to the plane than this count as in front
    pub epsilon: f64,
}

impl Default for ClippingProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the clipped mesh, sharing vertices between output triangles.
struct ClipBuilder<'a> {
    source: &'a SubObject,
    out: SubObject,
    kept: Vec<u32>,
    cut: FxHashMap<(u32, u32), u32>,
}

impl<'a> ClipBuilder<'a> {
    fn new(source: &'a SubObject) -> Self {
        Self {
            source,
            out: source.empty_like(),
            kept: vec![u32::MAX; source.vertex_count()],
            cut: FxHashMap::default(),
        }
    }

    fn keep(&mut self, v: u32) -> u32 {
        if self.kept[v as usize] == u32::MAX {
            let s = self.source;
            let uv = s.has_uvs().then(|| s.uvs[v as usize]);
            self.kept[v as usize] = self.out.push_vertex(s.vertices[v as usize], s.normals[v as usize], uv);
        }
        self.kept[v as usize]
    }

    /// Vertex where the edge `from -> to` crosses the plane, `t` along it.
    fn intersect(&mut self, from: u32, to: u32, t: f64) -> u32 {
        let key = if from < to { (from, to) } else { (to, from) };
        if let Some(&existing) = self.cut.get(&key) {
            return existing;
        }

        let s = self.source;
        let (a, b) = (from as usize, to as usize);
        let t = t.clamp(0.0, 1.0);
        let position = s.vertices[a] + (s.vertices[b] - s.vertices[a]) * t;

        let tf = t as f32;
        let blended = s.normals[a] * (1.0 - tf) + s.normals[b] * tf;
        let normal = blended.try_normalize(1e-12).unwrap_or(s.normals[a]);
        let uv = s
            .has_uvs()
            .then(|| lerp_uv(&s.uvs[a], &s.uvs[b], tf));

        let index = self.out.push_vertex(position, normal, uv);
        self.cut.insert(key, index);
        index
    }
}

#[inline]
fn lerp_uv(a: &Vector2<f32>, b: &Vector2<f32>, t: f32) -> Vector2<f32> {
    a * (1.0 - t) + b * t
}

impl ClippingProcessor {
    pub fn new() -> Self {
        Self { epsilon: 1e-6 }
    }

    /// Cut `mesh` with `plane`, keeping what lies in front of it.
    ///
    /// Empty input gives empty output; triangles are never reported as errors.
    pub fn clip_mesh(&self, mesh: &SubObject, plane: &Plane) -> SubObject {
        let mut builder = ClipBuilder::new(mesh);
        if mesh.is_empty() {
            return builder.out;
        }

        let distances: Vec<f64> = mesh.vertices.iter().map(|v| plane.signed_distance(v)).collect();
        let front = |d: f64| d >= -self.epsilon;

        for t in mesh.indices.chunks_exact(3) {
            let tri = [t[0], t[1], t[2]];
            let d = [
                distances[tri[0] as usize],
                distances[tri[1] as usize],
                distances[tri[2] as usize],
            ];
            let front_count = d.iter().filter(|&&x| front(x)).count();

            match front_count {
                // All vertices behind - discard triangle
                0 => {}

                // All vertices in front - keep triangle
                3 => {
                    let (a, b, c) = (builder.keep(tri[0]), builder.keep(tri[1]), builder.keep(tri[2]));
                    builder.out.push_triangle(a, b, c);
                }

                // One vertex in front - one smaller triangle
                1 => {
                    // Rotate so the front vertex comes first, keeping the winding
                    let k = (0..3).find(|&k| front(d[k])).unwrap_or(0);
                    let (f, b1, b2) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
                    let (df, db1, db2) = (d[k], d[(k + 1) % 3], d[(k + 2) % 3]);

                    let front_vertex = builder.keep(f);
                    let p1 = builder.intersect(f, b1, df / (df - db1));
                    let p2 = builder.intersect(f, b2, df / (df - db2));
                    builder.out.push_triangle(front_vertex, p1, p2);
                }

                // Two vertices in front - quad split into two triangles
                2 => {
                    let k = (0..3).find(|&k| !front(d[k])).unwrap_or(0);
                    let (back, f1, f2) = (tri[k], tri[(k + 1) % 3], tri[(k + 2) % 3]);
                    let (db, d1, d2) = (d[k], d[(k + 1) % 3], d[(k + 2) % 3]);

                    let v1 = builder.keep(f1);
                    let v2 = builder.keep(f2);
                    let p1 = builder.intersect(f1, back, d1 / (d1 - db));
                    let p2 = builder.intersect(f2, back, d2 / (d2 - db));
                    builder.out.push_triangle(v1, v2, p2);
                    builder.out.push_triangle(v1, p2, p1);
                }

                _ => unreachable!(),
            }
        }

        builder.out
    }
}
