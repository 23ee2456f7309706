// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Density-bounded simplification.

use crate::decimate::{boundary_edges, decimate_to_vertex_count, DecimateStats};
use crate::dedup::{deduplicate, weld};
use crate::mesh::{MeshState, SubObject};
use crate::tolerance::MeshSettings;
use nalgebra::{Point3, Vector3};

/// Vertex budget for a mesh: `round(area * density) + boundary edges`.
#[inline]
pub fn vertex_budget(surface_area: f64, max_vertices_per_square_meter: f32, boundary_edge_count: usize) -> usize {
    (surface_area * max_vertices_per_square_meter as f64).round().max(0.0) as usize + boundary_edge_count
}

/// Simplify `sub` down to its vertex budget.
///
/// Coincident vertices are welded first so that triangles of neighbouring
/// surfaces share edges; boundary edges of the welded mesh are then locked.
/// Normals are recomputed from the result and a looser deduplication pass
/// cleans up what the collapses left behind.
pub fn simplify(sub: &mut SubObject, settings: &MeshSettings) -> DecimateStats {
    weld(sub, settings.weld_distance);

    let area = sub.surface_area();
    let boundary = boundary_edges(&sub.indices).len();
    let budget = vertex_budget(area, sub.max_vertices_per_square_meter, boundary);

    let mut stats = DecimateStats {
        original_vertices: sub.vertex_count(),
        final_vertices: sub.vertex_count(),
        boundary_edges: boundary,
        ..Default::default()
    };

    if sub.vertex_count() > budget {
        // Work relative to the first vertex; quadrics of georeferenced
        // coordinates lose most of their precision otherwise.
        let anchor = sub.vertices[0];
        let local: Vec<Point3<f64>> = sub.vertices.iter().map(|v| Point3::from(v - anchor)).collect();

        let result = decimate_to_vertex_count(&local, &sub.indices, budget);
        stats = result.stats;

        let has_uvs = sub.has_uvs();
        sub.uvs = if has_uvs {
            result.source_vertex.iter().map(|&s| sub.uvs[s as usize]).collect()
        } else {
            Vec::new()
        };
        sub.vertices = result
            .positions
            .iter()
            .map(|p| anchor + p.coords)
            .collect();
        sub.normals = vec![Vector3::z(); sub.vertices.len()];
        sub.indices = result.indices;

        tracing::debug!(
            id = %sub.id,
            area,
            budget,
            before = stats.original_vertices,
            after = stats.final_vertices,
            collapses = stats.collapses_performed,
            "Decimated mesh"
        );
    }

    sub.recompute_normals();
    deduplicate(sub, &settings.post_simplify);
    sub.state = MeshState::Simplified;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triangulation::Triangulator;
    use approx::assert_relative_eq;
    use tilebake_core::Surface;

    /// Terrain patch of `n` x `n` separately triangulated quads.
    fn terrain(n: usize, density: f32) -> SubObject {
        let mut sub = SubObject::new("terrain", 0, density);
        let triangulator = Triangulator::new(false, false);
        let (x0, y0) = (120_000.0, 480_000.0);
        for j in 0..n {
            for i in 0..n {
                let (x, y) = (x0 + i as f64, y0 + j as f64);
                let surface = Surface::from_ring(vec![
                    Point3::new(x, y, 1.0),
                    Point3::new(x + 1.0, y, 1.0),
                    Point3::new(x + 1.0, y + 1.0, 1.0),
                    Point3::new(x, y + 1.0, 1.0),
                ]);
                triangulator.triangulate_surface(&surface, &mut sub).unwrap();
            }
        }
        sub
    }

    #[test]
    fn test_vertex_budget() {
        assert_eq!(vertex_budget(100.0, 0.25, 12), 37);
        assert_eq!(vertex_budget(10.0, 0.05, 4), 5);
        assert_eq!(vertex_budget(0.0, 1.0, 0), 0);
    }

    #[test]
    fn test_flat_terrain_is_reduced() {
        let mut sub = terrain(8, 0.01);
        assert_eq!(sub.vertex_count(), 256);

        let stats = simplify(&mut sub, &MeshSettings::default());

        assert_eq!(stats.boundary_edges, 32);
        assert!(sub.vertex_count() < 81);
        assert_eq!(sub.state, MeshState::Simplified);
        assert_relative_eq!(sub.surface_area(), 64.0, epsilon = 1e-6);
        sub.validate().unwrap();
        for n in &sub.normals {
            assert_relative_eq!(n.z, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_under_budget_only_welds() {
        let mut sub = terrain(2, 100.0);
        let stats = simplify(&mut sub, &MeshSettings::default());
        assert_eq!(stats.collapses_performed, 0);
        assert_eq!(sub.vertex_count(), 9);
        assert_eq!(sub.triangle_count(), 8);
    }

    #[test]
    fn test_silhouette_survives() {
        let mut sub = terrain(6, 0.0);
        simplify(&mut sub, &MeshSettings::default());

        let (min, max) = sub.bounds().unwrap();
        assert_relative_eq!(min.x, 120_000.0, epsilon = 1e-9);
        assert_relative_eq!(max.x, 120_006.0, epsilon = 1e-9);
        assert_relative_eq!(max.y, 480_006.0, epsilon = 1e-9);
    }
}
