// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TileBake Geometry Processing
//!
//! Turns city-model features into render meshes: earcutr triangulation,
//! vertex deduplication, quadric edge-collapse simplification, spike
//! clamping and grid clipping, using nalgebra throughout.

pub mod clipping;
pub mod decimate;
pub mod dedup;
pub mod error;
pub mod grid;
pub mod mesh;
pub mod processor;
pub mod simplify;
pub mod spikes;
pub mod tolerance;
pub mod triangulation;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point2, Point3, Vector2, Vector3};

pub use clipping::{ClippingProcessor, Plane};
pub use decimate::{decimate_to_vertex_count, DecimateStats};
pub use dedup::{deduplicate, weld};
pub use error::{Error, Result};
pub use grid::clip_to_grid;
pub use mesh::{CoordinateShift, MeshState, SubObject};
pub use processor::MeshProcessor;
pub use simplify::{simplify, vertex_budget};
pub use spikes::{clamp_spikes, SpikeRange};
pub use tolerance::{angle_between_normals, MergeTolerance, MeshSettings, VertexNormalKey};
pub use triangulation::{triangulate_polygon, TriangulationStats, Triangulator};
