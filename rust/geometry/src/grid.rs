// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Grid clipping
//!
//! Splits a mesh along tile borders so every piece lies in exactly one tile
//! cell. Columns are cut first, then every column is cut into rows.

use crate::clipping::{ClippingProcessor, Plane};
use crate::mesh::{MeshState, SubObject};
use nalgebra::{Point2, Point3, Vector3};

/// Cell index range `[first, last)` covered by `min..=max` along one axis.
///
/// A span that ends exactly on a border still covers the cell it starts in.
fn cell_span(min: f64, max: f64, size: f64) -> (i64, i64) {
    let first = (min / size).floor() as i64;
    let last = ((max / size).ceil() as i64).max(first + 1);
    (first, last)
}

/// Clip `mesh` into one piece per occupied grid cell of `tile_size`.
///
/// Returns an empty list when the mesh already fits in a single cell, so the
/// caller keeps the original. Pieces that end up empty are dropped. Every
/// piece gets the centre of its cell as centroid, which makes tile
/// bucketing exact.
pub fn clip_to_grid(mesh: &SubObject, tile_size: f64) -> Vec<SubObject> {
    let mut pieces = Vec::new();
    if tile_size.is_nan() || tile_size <= 0.0 {
        return pieces;
    }
    let Some((min, max)) = mesh.bounds() else {
        return pieces;
    };

    let (col_first, col_last) = cell_span(min.x, max.x, tile_size);
    let (row_first, row_last) = cell_span(min.y, max.y, tile_size);
    if col_last - col_first == 1 && row_last - row_first == 1 {
        return pieces;
    }

    let clipper = ClippingProcessor::new();
    for col in col_first..col_last {
        let x = col as f64 * tile_size;

        let mut column = mesh.clone();
        if min.x < x {
            column = clipper.clip_mesh(&column, &Plane::new(Point3::new(x, 0.0, 0.0), Vector3::x()));
        }
        if max.x > x + tile_size {
            column = clipper.clip_mesh(
                &column,
                &Plane::new(Point3::new(x + tile_size, 0.0, 0.0), -Vector3::x()),
            );
        }
        if column.is_empty() {
            continue;
        }
        let Some((column_min, column_max)) = column.bounds() else {
            continue;
        };

        let (first, last) = cell_span(column_min.y, column_max.y, tile_size);
        if last - first == 1 {
            pieces.push(into_cell(column, x, first as f64 * tile_size, tile_size));
            continue;
        }

        for row in first..last {
            let y = row as f64 * tile_size;
            let mut cell = column.clone();
            if column_max.y > y + tile_size {
                cell = clipper.clip_mesh(
                    &cell,
                    &Plane::new(Point3::new(0.0, y + tile_size, 0.0), -Vector3::y()),
                );
            }
            if column_min.y < y {
                cell = clipper.clip_mesh(&cell, &Plane::new(Point3::new(0.0, y, 0.0), Vector3::y()));
            }
            if !cell.is_empty() {
                pieces.push(into_cell(cell, x, y, tile_size));
            }
        }
    }

    tracing::trace!(id = %mesh.id, pieces = pieces.len(), "Clipped mesh to grid");
    pieces
}

fn into_cell(mut piece: SubObject, x: f64, y: f64, tile_size: f64) -> SubObject {
    piece.centroid = Point2::new(x + tile_size / 2.0, y + tile_size / 2.0);
    piece.state = MeshState::TileClipped;
    piece
}
