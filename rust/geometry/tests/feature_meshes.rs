// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reader features through triangulation and the mesh stages.

use approx::assert_relative_eq;
use tilebake_core::{Feature, Surface};
use tilebake_geometry::{
    deduplicate, MeshProcessor, MeshSettings, MeshState, MergeTolerance, Point3, SpikeRange, SubObject, Triangulator,
};

const TILE: f64 = 1000.0;

fn rect(x0: f64, y0: f64, x1: f64, y1: f64, z: f64) -> Vec<Point3<f64>> {
    vec![
        Point3::new(x0, y0, z),
        Point3::new(x1, y0, z),
        Point3::new(x1, y1, z),
        Point3::new(x0, y1, z),
    ]
}

/// A 2000 x 1000 plot with a 200 x 200 courtyard.
fn plot() -> Feature {
    let mut surface = Surface::from_ring(rect(500.0, 500.0, 2500.0, 1500.0, 2.0));
    surface.holes.push(rect(1400.0, 900.0, 1600.0, 1100.0, 2.0));
    Feature {
        key: "plot".into(),
        feature_type: "LandUse".into(),
        surfaces: vec![surface],
        ..Default::default()
    }
}

fn triangulated(feature: &Feature) -> SubObject {
    let mut sub = SubObject::new(feature.key.clone(), 0, 0.0);
    let stats = Triangulator::new(true, false).append_feature(feature, &mut sub);
    assert_eq!(stats.skipped, 0);
    sub
}

#[test]
fn test_triangulation_keeps_area_minus_holes() {
    let sub = triangulated(&plot());
    assert_eq!(sub.indices.len() % 3, 0);
    assert_relative_eq!(sub.surface_area(), 2_000_000.0 - 40_000.0, epsilon = 1e-3);
}

#[test]
fn test_deduplication_is_idempotent() {
    let mut sub = triangulated(&plot());
    let tolerance = MergeTolerance::default();

    deduplicate(&mut sub, &tolerance);
    let once = sub.clone();
    let removed = deduplicate(&mut sub, &tolerance);

    assert_eq!(removed, 0);
    assert_eq!(sub.vertices, once.vertices);
    assert_eq!(sub.normals, once.normals);
    assert_eq!(sub.indices, once.indices);
}

#[test]
fn test_tiled_pieces_stay_in_their_cell() {
    let processor = MeshProcessor::new(MeshSettings::default()).with_tiling(TILE);
    let pieces = processor.finalize(triangulated(&plot())).unwrap();

    assert_eq!(pieces.len(), 6);
    let mut area = 0.0;
    for piece in &pieces {
        assert_eq!(piece.state, MeshState::Finalized);
        assert_eq!(piece.indices.len() % 3, 0);

        let cell_x = (piece.centroid.x / TILE).floor() * TILE;
        let cell_y = (piece.centroid.y / TILE).floor() * TILE;
        for v in &piece.vertices {
            assert!(v.x >= cell_x - 1e-6 && v.x <= cell_x + TILE + 1e-6, "x {} outside {cell_x}", v.x);
            assert!(v.y >= cell_y - 1e-6 && v.y <= cell_y + TILE + 1e-6, "y {} outside {cell_y}", v.y);
        }
        area += piece.surface_area();
    }
    assert_relative_eq!(area, 1_960_000.0, epsilon = 1e-2);
}

#[test]
fn test_spikes_are_clamped_before_tiling() {
    let mut feature = plot();
    feature.surfaces[0].holes.clear();
    feature.surfaces[0].outer[2].z = 80.0;

    let processor = MeshProcessor::new(MeshSettings::default()).with_spike_range(SpikeRange::new(25.0, -10.0));
    let pieces = processor.finalize(triangulated(&feature)).unwrap();

    assert_eq!(pieces.len(), 1);
    assert!(pieces[0].vertices.iter().all(|v| v.z <= 25.0));
    assert!(pieces[0].vertices.iter().any(|v| (v.z - 2.0).abs() < 1e-9));
}
