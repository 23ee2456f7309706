// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Surface triangulation
//!
//! Wrapper around earcutr for 2D polygon triangulation, plus the
//! [`Triangulator`] that appends reader surfaces to a [`SubObject`].

use crate::mesh::SubObject;
use crate::{Error, Point2, Point3, Result, Vector3};
use tilebake_core::{Feature, Surface};

/// Normal written when normal calculation is switched off.
///
/// Straight up in the z-up world frame.
#[inline]
pub fn default_normal() -> Vector3<f32> {
    Vector3::new(0.0, 0.0, 1.0)
}

/// Check if a polygon is convex (all turns have the same sign)
#[inline]
fn is_convex(points: &[Point2<f64>]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }

    let mut sign = 0.0f64;
    for i in 0..n {
        let (p0, p1, p2) = (&points[i], &points[(i + 1) % n], &points[(i + 2) % n]);
        let turn = (p1.x - p0.x) * (p2.y - p1.y) - (p1.y - p0.y) * (p2.x - p1.x);
        if turn.abs() <= 1e-10 {
            continue;
        }
        if sign == 0.0 {
            sign = turn.signum();
        } else if sign != turn.signum() {
            return false;
        }
    }

    true
}

/// Fan triangulation for convex polygons
#[inline]
fn fan_triangulate(n: usize) -> Vec<usize> {
    (1..n - 1).flat_map(|i| [0, i, i + 1]).collect()
}

fn flatten_2d(rings: &[&[Point2<f64>]]) -> (Vec<f64>, Vec<usize>) {
    let total: usize = rings.iter().map(|r| r.len()).sum();
    let mut coords = Vec::with_capacity(total * 2);
    let mut hole_starts = Vec::with_capacity(rings.len().saturating_sub(1));

    for (i, ring) in rings.iter().enumerate() {
        if i > 0 {
            hole_starts.push(coords.len() / 2);
        }
        for p in *ring {
            coords.push(p.x);
            coords.push(p.y);
        }
    }

    (coords, hole_starts)
}

/// Triangulate a simple polygon (no holes)
/// Returns triangle indices into the input points
pub fn triangulate_polygon(points: &[Point2<f64>]) -> Result<Vec<usize>> {
    let n = points.len();
    if n < 3 {
        return Err(Error::TriangulationError(format!(
            "need at least 3 points to triangulate, got {n}"
        )));
    }

    // FAST PATH: Triangle - no triangulation needed
    if n == 3 {
        return Ok(vec![0, 1, 2]);
    }

    // FAST PATH: small convex polygon - simple fan
    if n <= 8 && is_convex(points) {
        return Ok(fan_triangulate(n));
    }

    let (coords, _) = flatten_2d(&[points]);
    earcutr::earcut(&coords, &[], 2).map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Triangulate a polygon with holes
/// Returns triangle indices into the combined vertex array (outer + all holes)
pub fn triangulate_polygon_with_holes(outer: &[Point2<f64>], holes: &[Vec<Point2<f64>>]) -> Result<Vec<usize>> {
    if outer.len() < 3 {
        return Err(Error::TriangulationError(
            "need at least 3 points in outer boundary".to_string(),
        ));
    }
    if holes.is_empty() {
        return triangulate_polygon(outer);
    }
    if let Some(short) = holes.iter().find(|h| h.len() < 3) {
        return Err(Error::TriangulationError(format!(
            "hole with {} points cannot be triangulated",
            short.len()
        )));
    }

    let mut rings: Vec<&[Point2<f64>]> = Vec::with_capacity(holes.len() + 1);
    rings.push(outer);
    rings.extend(holes.iter().map(Vec::as_slice));

    let (coords, hole_starts) = flatten_2d(&rings);
    earcutr::earcut(&coords, &hole_starts, 2).map_err(|e| Error::TriangulationError(format!("{:?}", e)))
}

/// Orthonormal in-plane axes for a plane normal.
///
/// The reference axis is the world axis least parallel to the normal, so the
/// cross products stay well conditioned for walls, roofs and ground alike.
pub fn plane_basis(normal: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let (ax, ay, az) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
    let reference = if ax <= ay && ax <= az {
        Vector3::x()
    } else if ay <= az {
        Vector3::y()
    } else {
        Vector3::z()
    };

    let u_axis = normal.cross(&reference).normalize();
    let v_axis = normal.cross(&u_axis).normalize();
    (u_axis, v_axis)
}

/// Project 3D points into the plane frame anchored at `origin`.
///
/// Subtracting the anchor before projecting keeps georeferenced coordinates
/// (hundreds of kilometres from the world origin) small for the triangulator.
pub fn project_to_plane(
    points: &[Point3<f64>],
    origin: &Point3<f64>,
    u_axis: &Vector3<f64>,
    v_axis: &Vector3<f64>,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| {
            let local = p - origin;
            Point2::new(local.dot(u_axis), local.dot(v_axis))
        })
        .collect()
}

/// Calculate the normal of a polygon from its vertices (Newell's method),
/// accumulated relative to the first point.
pub fn calculate_polygon_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let origin = points[0];
    let mut normal = Vector3::<f64>::zeros();
    for i in 0..n {
        let current = points[i] - origin;
        let next = points[(i + 1) % n] - origin;
        normal += current.cross(&next);
    }

    normal.try_normalize(1e-12)
}

#[inline]
fn to_f32(v: &Vector3<f64>) -> Vector3<f32> {
    Vector3::new(v.x as f32, v.y as f32, v.z as f32)
}

/// Counters from appending a feature tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriangulationStats {
    pub surfaces: usize,
    pub triangles: usize,
    pub skipped: usize,
}

/// Turns reader surfaces into indexed triangles.
#[derive(Debug, Clone, Copy)]
pub struct Triangulator {
    /// When false every vertex gets [`default_normal`]; used when the mesh is
    /// simplified right after, since simplification recomputes normals.
    pub calculate_normals: bool,
    /// Carry surface UVs into the mesh.
    pub include_uvs: bool,
}

impl Default for Triangulator {
    fn default() -> Self {
        Self {
            calculate_normals: true,
            include_uvs: false,
        }
    }
}

impl Triangulator {
    pub fn new(calculate_normals: bool, include_uvs: bool) -> Self {
        Self {
            calculate_normals,
            include_uvs,
        }
    }

    /// Append one surface to `out`. Returns the number of triangles added.
    ///
    /// Indices are offset by the vertices already in `out`, so surfaces of a
    /// whole feature tree compose into one mesh.
    pub fn triangulate_surface(&self, surface: &Surface, out: &mut SubObject) -> Result<usize> {
        let outer = &surface.outer;
        if outer.len() < 3 {
            return Err(Error::TriangulationError(format!(
                "degenerate ring with {} points",
                outer.len()
            )));
        }

        let plane_normal = calculate_polygon_normal(outer)
            .ok_or_else(|| Error::TriangulationError("ring has no area".to_string()))?;
        let vertex_normal = if self.calculate_normals {
            to_f32(&plane_normal)
        } else {
            default_normal()
        };

        let holes: Vec<&Vec<Point3<f64>>> = surface.holes.iter().filter(|h| h.len() >= 3).collect();

        // FAST PATH: a lone triangle needs no projection
        let triangles = if outer.len() == 3 && holes.is_empty() {
            vec![0, 1, 2]
        } else {
            let origin = outer[0];
            let (u_axis, v_axis) = plane_basis(&plane_normal);
            let outer_2d = project_to_plane(outer, &origin, &u_axis, &v_axis);
            let holes_2d: Vec<Vec<Point2<f64>>> = holes
                .iter()
                .map(|h| project_to_plane(h, &origin, &u_axis, &v_axis))
                .collect();
            triangulate_polygon_with_holes(&outer_2d, &holes_2d)?
        };

        if triangles.is_empty() {
            return Err(Error::TriangulationError("triangulation produced no triangles".to_string()));
        }

        let with_uvs = self.include_uvs && surface.has_uvs();
        let points = outer.iter().chain(holes.iter().flat_map(|h| h.iter()));
        let uvs = surface
            .outer_uvs
            .iter()
            .chain(surface.hole_uvs.iter().zip(&surface.holes).filter(|(_, h)| h.len() >= 3).flat_map(|(uv, _)| uv.iter()));

        let base = out.vertex_count() as u32;
        if with_uvs {
            for (p, uv) in points.zip(uvs) {
                out.push_vertex(*p, vertex_normal, Some(*uv));
            }
        } else {
            for p in points {
                out.push_vertex(*p, vertex_normal, None);
            }
        }

        for t in triangles.chunks_exact(3) {
            let (a, mut b, mut c) = (t[0] as u32 + base, t[1] as u32 + base, t[2] as u32 + base);
            let (pa, pb, pc) = (
                out.vertices[a as usize],
                out.vertices[b as usize],
                out.vertices[c as usize],
            );
            // Keep every triangle facing the same way as its ring
            if (pb - pa).cross(&(pc - pa)).dot(&plane_normal) < 0.0 {
                std::mem::swap(&mut b, &mut c);
            }
            out.push_triangle(a, b, c);
        }

        Ok(triangles.len() / 3)
    }

    /// Append every surface of a feature and its descendants.
    ///
    /// A surface that cannot be triangulated is logged and skipped; its
    /// siblings still go in.
    pub fn append_feature(&self, feature: &Feature, out: &mut SubObject) -> TriangulationStats {
        let mut stats = TriangulationStats::default();
        for surface in feature.all_surfaces() {
            stats.surfaces += 1;
            match self.triangulate_surface(surface, out) {
                Ok(count) => stats.triangles += count,
                Err(e) => {
                    stats.skipped += 1;
                    tracing::debug!(key = %feature.key, error = %e, "Skipping surface");
                }
            }
        }
        stats
    }
}
