// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Edge-collapse decimation with quadric error metrics.
//!
//! Vertices on the mesh boundary are locked: an edge with one locked end
//! collapses onto the locked vertex, an edge with two locked ends is never
//! collapsed. Tile-adjacent silhouettes therefore survive simplification.

use nalgebra::{Point3, Vector3};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Quadric error matrix (4x4 symmetric matrix stored as 10 values).
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    // [a b c d]
    // [  e f g]
    // [    h i]
    // [      j]
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
}

impl Quadric {
    /// Quadric of the plane `n · p + d = 0`.
    fn from_plane(n: &Vector3<f64>, d: f64) -> Self {
        Self {
            a: n.x * n.x,
            b: n.x * n.y,
            c: n.x * n.z,
            d: n.x * d,
            e: n.y * n.y,
            f: n.y * n.z,
            g: n.y * d,
            h: n.z * n.z,
            i: n.z * d,
            j: d * d,
        }
    }

    fn add(&mut self, other: &Quadric) {
        self.a += other.a;
        self.b += other.b;
        self.c += other.c;
        self.d += other.d;
        self.e += other.e;
        self.f += other.f;
        self.g += other.g;
        self.h += other.h;
        self.i += other.i;
        self.j += other.j;
    }

    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let (x, y, z) = (p.x, p.y, p.z);
        self.a * x * x
            + 2.0 * self.b * x * y
            + 2.0 * self.c * x * z
            + 2.0 * self.d * x
            + self.e * y * y
            + 2.0 * self.f * y * z
            + 2.0 * self.g * y
            + self.h * z * z
            + 2.0 * self.i * z
            + self.j
    }

    /// Point minimising the error, or `None` when the system is singular
    /// (flat or straight neighbourhoods).
    fn optimal_point(&self) -> Option<Point3<f64>> {
        let det = self.a * (self.e * self.h - self.f * self.f)
            - self.b * (self.b * self.h - self.f * self.c)
            + self.c * (self.b * self.f - self.e * self.c);

        if det.abs() < 1e-10 {
            return None;
        }

        let inv_det = 1.0 / det;
        let m00 = (self.e * self.h - self.f * self.f) * inv_det;
        let m01 = (self.c * self.f - self.b * self.h) * inv_det;
        let m02 = (self.b * self.f - self.c * self.e) * inv_det;
        let m11 = (self.a * self.h - self.c * self.c) * inv_det;
        let m12 = (self.b * self.c - self.a * self.f) * inv_det;
        let m22 = (self.a * self.e - self.b * self.b) * inv_det;

        let p = Point3::new(
            -(m00 * self.d + m01 * self.g + m02 * self.i),
            -(m01 * self.d + m11 * self.g + m12 * self.i),
            -(m02 * self.d + m12 * self.g + m22 * self.i),
        );
        (p.x.is_finite() && p.y.is_finite() && p.z.is_finite()).then_some(p)
    }
}

/// An edge collapse candidate: `remove` merges into `keep` at `target`.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    keep: u32,
    remove: u32,
    cost: f64,
    target: Point3<f64>,
    /// Vertex versions at queue time; a mismatch marks the entry stale
    keep_version: u32,
    remove_version: u32,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}

/// Statistics of one decimation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecimateStats {
    pub original_vertices: usize,
    pub final_vertices: usize,
    pub collapses_performed: usize,
    pub collapses_rejected: usize,
    pub boundary_edges: usize,
}

/// Outcome of [`decimate_to_vertex_count`].
#[derive(Debug, Clone, Default)]
pub struct Decimated {
    pub positions: Vec<Point3<f64>>,
    pub indices: Vec<u32>,
    /// Source vertex of every output vertex, for carrying attributes over
    pub source_vertex: Vec<u32>,
    pub stats: DecimateStats,
}

/// Edges used by exactly one triangle, as (low, high) vertex pairs.
pub fn boundary_edges(indices: &[u32]) -> FxHashSet<(u32, u32)> {
    let mut counts: FxHashMap<(u32, u32), u32> = FxHashMap::default();
    for t in indices.chunks_exact(3) {
        for k in 0..3 {
            *counts.entry(normalize_edge(t[k], t[(k + 1) % 3])).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter_map(|(edge, count)| (count == 1).then_some(edge))
        .collect()
}

#[inline]
fn normalize_edge(v1: u32, v2: u32) -> (u32, u32) {
    if v1 < v2 {
        (v1, v2)
    } else {
        (v2, v1)
    }
}

struct Decimator {
    positions: Vec<Point3<f64>>,
    faces: Vec<Option<[u32; 3]>>,
    vertex_faces: Vec<SmallVec<[u32; 8]>>,
    quadrics: Vec<Quadric>,
    locked: Vec<bool>,
    removed: Vec<bool>,
    version: Vec<u32>,
    heap: BinaryHeap<EdgeCollapse>,
}

impl Decimator {
    fn new(source: &[Point3<f64>], indices: &[u32], boundary: &FxHashSet<(u32, u32)>) -> Self {
        let n = source.len();
        let mut faces = Vec::with_capacity(indices.len() / 3);
        let mut vertex_faces: Vec<SmallVec<[u32; 8]>> = vec![SmallVec::new(); n];
        let mut quadrics = vec![Quadric::default(); n];

        for t in indices.chunks_exact(3) {
            let face = [t[0], t[1], t[2]];
            let face_index = faces.len() as u32;
            for &v in &face {
                vertex_faces[v as usize].push(face_index);
            }

            let p0 = source[face[0] as usize];
            let normal = (source[face[1] as usize] - p0).cross(&(source[face[2] as usize] - p0));
            if let Some(unit) = normal.try_normalize(1e-12) {
                let q = Quadric::from_plane(&unit, -unit.dot(&p0.coords));
                for &v in &face {
                    quadrics[v as usize].add(&q);
                }
            }

            faces.push(Some(face));
        }

        let mut locked = vec![false; n];
        for &(a, b) in boundary {
            locked[a as usize] = true;
            locked[b as usize] = true;
        }

        Self {
            positions: source.to_vec(),
            faces,
            vertex_faces,
            quadrics,
            locked,
            removed: vec![false; n],
            version: vec![0; n],
            heap: BinaryHeap::new(),
        }
    }

    fn neighbours(&self, v: u32) -> FxHashSet<u32> {
        let mut out = FxHashSet::default();
        for &f in &self.vertex_faces[v as usize] {
            if let Some(face) = self.faces[f as usize] {
                out.extend(face.iter().copied().filter(|&u| u != v));
            }
        }
        out
    }

    fn queue_edge(&mut self, v1: u32, v2: u32) {
        let (l1, l2) = (self.locked[v1 as usize], self.locked[v2 as usize]);
        let (keep, remove) = match (l1, l2) {
            (true, true) => return,
            (true, false) => (v1, v2),
            (false, true) => (v2, v1),
            (false, false) => normalize_edge(v1, v2),
        };

        let mut combined = self.quadrics[keep as usize];
        combined.add(&self.quadrics[remove as usize]);

        let pk = self.positions[keep as usize];
        let pr = self.positions[remove as usize];
        let target = if l1 || l2 {
            pk
        } else {
            let midpoint = Point3::from((pk.coords + pr.coords) * 0.5);
            let mut best = (combined.evaluate(&midpoint), midpoint);
            for candidate in [combined.optimal_point(), Some(pk), Some(pr)].into_iter().flatten() {
                let cost = combined.evaluate(&candidate);
                if cost < best.0 {
                    best = (cost, candidate);
                }
            }
            best.1
        };

        self.heap.push(EdgeCollapse {
            keep,
            remove,
            cost: combined.evaluate(&target).max(0.0),
            target,
            keep_version: self.version[keep as usize],
            remove_version: self.version[remove as usize],
        });
    }

    /// Link condition plus a fold-over check on every face that survives.
    fn is_collapse_valid(&self, keep: u32, remove: u32, target: &Point3<f64>) -> bool {
        let keep_neighbours = self.neighbours(keep);
        let remove_neighbours = self.neighbours(remove);
        if keep_neighbours.intersection(&remove_neighbours).count() > 2 {
            return false;
        }

        for v in [keep, remove] {
            for &f in &self.vertex_faces[v as usize] {
                let Some(face) = self.faces[f as usize] else {
                    continue;
                };
                if face.contains(&keep) && face.contains(&remove) {
                    continue;
                }

                let before = self.face_normal(&face, None);
                let after = self.face_normal(&face, Some((v, target)));
                match (before, after) {
                    (Some(b), Some(a)) if b.dot(&a) > 0.0 => {}
                    (None, _) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    fn face_normal(&self, face: &[u32; 3], moved: Option<(u32, &Point3<f64>)>) -> Option<Vector3<f64>> {
        let p = |v: u32| match moved {
            Some((m, target)) if m == v => *target,
            _ => self.positions[v as usize],
        };
        let p0 = p(face[0]);
        (p(face[1]) - p0).cross(&(p(face[2]) - p0)).try_normalize(1e-12)
    }

    fn collapse(&mut self, keep: u32, remove: u32, target: Point3<f64>) {
        let remove_faces = std::mem::take(&mut self.vertex_faces[remove as usize]);
        for f in remove_faces {
            let Some(mut face) = self.faces[f as usize] else {
                continue;
            };

            if face.contains(&keep) {
                // Triangle spanning the collapsed edge disappears
                self.faces[f as usize] = None;
                for &v in &face {
                    if v != remove {
                        self.vertex_faces[v as usize].retain(|g| *g != f);
                    }
                }
            } else {
                for v in face.iter_mut() {
                    if *v == remove {
                        *v = keep;
                    }
                }
                self.faces[f as usize] = Some(face);
                self.vertex_faces[keep as usize].push(f);
            }
        }

        self.positions[keep as usize] = target;
        let q = self.quadrics[remove as usize];
        self.quadrics[keep as usize].add(&q);
        self.removed[remove as usize] = true;
        self.version[keep as usize] += 1;
        self.version[remove as usize] += 1;
    }

    fn into_output(self, mut stats: DecimateStats) -> Decimated {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut positions = Vec::new();
        let mut source_vertex = Vec::new();
        let mut indices = Vec::new();

        for face in self.faces.iter().flatten() {
            for &v in face {
                let slot = &mut remap[v as usize];
                if *slot == u32::MAX {
                    *slot = positions.len() as u32;
                    positions.push(self.positions[v as usize]);
                    source_vertex.push(v);
                }
                indices.push(*slot);
            }
        }

        stats.final_vertices = positions.len();
        Decimated {
            positions,
            indices,
            source_vertex,
            stats,
        }
    }
}

/// Collapse edges until at most `target_vertices` referenced vertices remain,
/// or no valid collapse is left.
///
/// `indices` must describe a welded mesh; with unshared vertices every edge
/// is a boundary edge and nothing can collapse.
pub fn decimate_to_vertex_count(positions: &[Point3<f64>], indices: &[u32], target_vertices: usize) -> Decimated {
    let boundary = boundary_edges(indices);
    let mut decimator = Decimator::new(positions, indices, &boundary);

    let mut alive = decimator
        .vertex_faces
        .iter()
        .filter(|faces| !faces.is_empty())
        .count();
    let mut stats = DecimateStats {
        original_vertices: alive,
        boundary_edges: boundary.len(),
        ..Default::default()
    };

    if alive <= target_vertices {
        return decimator.into_output(stats);
    }

    let mut seen = FxHashSet::default();
    for t in indices.chunks_exact(3) {
        for k in 0..3 {
            let edge = normalize_edge(t[k], t[(k + 1) % 3]);
            if seen.insert(edge) {
                decimator.queue_edge(edge.0, edge.1);
            }
        }
    }

    while alive > target_vertices {
        let Some(candidate) = decimator.heap.pop() else {
            break;
        };

        let (keep, remove) = (candidate.keep, candidate.remove);
        if decimator.removed[keep as usize]
            || decimator.removed[remove as usize]
            || decimator.version[keep as usize] != candidate.keep_version
            || decimator.version[remove as usize] != candidate.remove_version
        {
            continue;
        }

        if !decimator.is_collapse_valid(keep, remove, &candidate.target) {
            stats.collapses_rejected += 1;
            continue;
        }

        decimator.collapse(keep, remove, candidate.target);
        alive -= 1;
        stats.collapses_performed += 1;

        let neighbours: Vec<u32> = decimator.neighbours(keep).into_iter().collect();
        for n in neighbours {
            decimator.queue_edge(keep, n);
        }
    }

    decimator.into_output(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat `n` x `n` grid of quads over a 10 m square, welded.
    fn grid(n: usize) -> (Vec<Point3<f64>>, Vec<u32>) {
        let step = 10.0 / n as f64;
        let mut positions = Vec::new();
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Point3::new(i as f64 * step, j as f64 * step, 0.0));
            }
        }
        let row = (n + 1) as u32;
        let mut indices = Vec::new();
        for j in 0..n as u32 {
            for i in 0..n as u32 {
                let a = j * row + i;
                indices.extend_from_slice(&[a, a + 1, a + row + 1, a, a + row + 1, a + row]);
            }
        }
        (positions, indices)
    }

    fn area(positions: &[Point3<f64>], indices: &[u32]) -> f64 {
        indices
            .chunks_exact(3)
            .map(|t| {
                let p0 = positions[t[0] as usize];
                (positions[t[1] as usize] - p0)
                    .cross(&(positions[t[2] as usize] - p0))
                    .norm()
                    * 0.5
            })
            .sum()
    }

    #[test]
    fn test_boundary_edges_of_grid() {
        let (_, indices) = grid(4);
        assert_eq!(boundary_edges(&indices).len(), 16);
    }

    #[test]
    fn test_flat_grid_collapses_to_boundary() {
        let (positions, indices) = grid(6);
        let result = decimate_to_vertex_count(&positions, &indices, 24);

        assert_eq!(result.stats.original_vertices, 49);
        assert_eq!(result.stats.boundary_edges, 24);
        assert!(result.positions.len() < 40);
        assert!(result.stats.collapses_performed > 0);
        assert_eq!(result.indices.len() % 3, 0);
        assert!((area(&result.positions, &result.indices) - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_boundary_vertices_do_not_move() {
        let (positions, indices) = grid(5);
        let result = decimate_to_vertex_count(&positions, &indices, 0);

        for (out, &src) in result.positions.iter().zip(&result.source_vertex) {
            let original = positions[src as usize];
            let on_border = [original.x, original.y]
                .iter()
                .any(|c| c.abs() < 1e-9 || (c - 10.0).abs() < 1e-9);
            if on_border {
                assert!((out - original).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_noop_when_under_budget() {
        let (positions, indices) = grid(3);
        let result = decimate_to_vertex_count(&positions, &indices, 100);
        assert_eq!(result.stats.collapses_performed, 0);
        assert_eq!(result.positions.len(), 16);
        assert_eq!(result.indices.len(), indices.len());
    }

    #[test]
    fn test_unwelded_triangles_never_collapse() {
        let positions = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let indices = vec![0, 1, 2, 3, 4, 5];
        let result = decimate_to_vertex_count(&positions, &indices, 1);
        assert_eq!(result.positions.len(), 6);
    }
}
