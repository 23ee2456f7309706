// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Vertex deduplication.
//!
//! Every triangle-index occurrence is resolved against the vertices kept so
//! far through a spatial hash grid with cells one tolerance wide, so only the
//! 27 surrounding cells are searched. The first kept vertex that matches wins.

use crate::mesh::{MeshState, SubObject};
use crate::tolerance::{MergeTolerance, VertexNormalKey};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

type Cell = (i64, i64, i64);

/// Merge vertex/normal pairs that are equal within `tolerance`.
///
/// Only vertices referenced by a triangle survive, numbered in order of first
/// reference. Returns the number of vertices removed.
pub fn deduplicate(sub: &mut SubObject, tolerance: &MergeTolerance) -> usize {
    let removed = merge_vertices(sub, tolerance.cell_size(), |a, b| a.matches(b, tolerance));
    sub.state = MeshState::Deduplicated;
    removed
}

/// Merge vertices closer than `distance`, whatever their normals or UVs.
///
/// The first vertex keeps its attributes. Used to connect the separately
/// triangulated surfaces of a feature before decimation.
pub fn weld(sub: &mut SubObject, distance: f64) -> usize {
    merge_vertices(sub, distance.max(1e-9), |a, b| {
        (a.position - b.position).norm() <= distance
    })
}

fn merge_vertices<F>(sub: &mut SubObject, cell_size: f64, same: F) -> usize
where
    F: Fn(&VertexNormalKey, &VertexNormalKey) -> bool,
{
    let original = sub.vertices.len();
    let has_uvs = sub.has_uvs();

    let mut kept: Vec<VertexNormalKey> = Vec::with_capacity(original);
    let mut grid: FxHashMap<Cell, SmallVec<[u32; 4]>> = FxHashMap::default();
    // Source vertex -> kept vertex, so repeated references skip the search
    let mut resolved = vec![u32::MAX; original];

    for index in sub.indices.iter_mut() {
        let source = *index as usize;
        if resolved[source] != u32::MAX {
            *index = resolved[source];
            continue;
        }

        let key = VertexNormalKey::new(
            sub.vertices[source],
            sub.normals[source],
            has_uvs.then(|| sub.uvs[source]),
        );
        let cell = key.cell(cell_size);

        let target = find_match(&grid, &kept, &key, cell, &same).unwrap_or_else(|| {
            let new_index = kept.len() as u32;
            kept.push(key);
            grid.entry(cell).or_default().push(new_index);
            new_index
        });

        resolved[source] = target;
        *index = target;
    }

    sub.vertices = kept.iter().map(|k| k.position).collect();
    sub.normals = kept.iter().map(|k| k.normal).collect();
    if has_uvs {
        sub.uvs = kept.iter().filter_map(|k| k.uv).collect();
    }

    original.saturating_sub(kept.len())
}

/// Lowest kept index matching `key` in the cell neighbourhood.
fn find_match<F>(
    grid: &FxHashMap<Cell, SmallVec<[u32; 4]>>,
    kept: &[VertexNormalKey],
    key: &VertexNormalKey,
    cell: Cell,
    same: &F,
) -> Option<u32>
where
    F: Fn(&VertexNormalKey, &VertexNormalKey) -> bool,
{
    let mut best: Option<u32> = None;

    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                let Some(candidates) = grid.get(&(cell.0 + dx, cell.1 + dy, cell.2 + dz)) else {
                    continue;
                };
                for &candidate in candidates {
                    if best.is_some_and(|b| b < candidate) {
                        continue;
                    }
                    if same(&kept[candidate as usize], key) {
                        best = Some(candidate);
                    }
                }
            }
        }
    }

    best
}
