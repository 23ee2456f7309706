// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile bucketing
//!
//! SubObjects land in the tile containing their centroid. Tiles are created
//! on first use and kept in order of creation.

use rustc_hash::FxHashMap;
use std::path::PathBuf;
use tilebake_geometry::{Point2, SubObject};

/// Lower-left corner of the tile containing `centroid`.
#[inline]
pub fn tile_origin(centroid: &Point2<f64>, tile_size: f64) -> Point2<f64> {
    // `+ 0.0` turns -0.0 into 0.0 so both land in the same tile and path.
    Point2::new(
        (centroid.x / tile_size).floor() * tile_size + 0.0,
        (centroid.y / tile_size).floor() * tile_size + 0.0,
    )
}

/// Output path of a tile: `{prefix}{x}_{y}.{lod}.bin`.
///
/// Degenerate centroids produce `NaN` or `inf` in the name, which marks the
/// path as invalid.
pub fn tile_path(prefix: &str, origin: &Point2<f64>, lod: f64) -> String {
    format!("{prefix}{}_{}.{lod}.bin", origin.x, origin.y)
}

/// Directory that tiles with output `prefix` are written to.
///
/// A prefix ending in a separator is the directory itself; otherwise its last
/// component is a file name prefix.
pub fn output_dir(prefix: &str) -> PathBuf {
    if prefix.ends_with('/') || prefix.ends_with('\\') {
        return PathBuf::from(prefix);
    }
    match PathBuf::from(prefix).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Spatial bucket written to one file.
#[derive(Debug, Clone)]
pub struct Tile {
    pub position: Point2<f64>,
    pub size: f64,
    pub file_path: String,
    pub sub_objects: Vec<SubObject>,
}

impl Tile {
    pub fn new(position: Point2<f64>, size: f64, file_path: String) -> Self {
        Self {
            position,
            size,
            file_path,
            sub_objects: Vec::new(),
        }
    }

    /// False when the path came from non-finite centroid arithmetic.
    pub fn has_valid_path(&self) -> bool {
        self.position.x.is_finite() && self.position.y.is_finite() && !self.file_path.contains("NaN")
    }

    pub fn is_empty(&self) -> bool {
        self.sub_objects.is_empty()
    }
}

/// Groups finished SubObjects into tiles.
#[derive(Debug, Clone)]
pub struct TileAssembler {
    pub tile_size: f64,
    pub output_prefix: String,
    pub lod: f64,
}

impl TileAssembler {
    pub fn new(tile_size: f64, output_prefix: impl Into<String>, lod: f64) -> Self {
        Self {
            tile_size,
            output_prefix: output_prefix.into(),
            lod,
        }
    }

    /// Bucket `sub_objects` by centroid.
    pub fn bucket(&self, sub_objects: Vec<SubObject>) -> Vec<Tile> {
        let mut tiles: Vec<Tile> = Vec::new();
        let mut lookup: FxHashMap<(u64, u64), usize> = FxHashMap::default();

        for sub in sub_objects {
            let origin = tile_origin(&sub.centroid, self.tile_size);
            let key = (origin.x.to_bits(), origin.y.to_bits());
            let index = *lookup.entry(key).or_insert_with(|| {
                let path = tile_path(&self.output_prefix, &origin, self.lod);
                tiles.push(Tile::new(origin, self.tile_size, path));
                tiles.len() - 1
            });
            tiles[index].sub_objects.push(sub);
        }

        tracing::debug!(tiles = tiles.len(), "Bucketed objects into tiles");
        tiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(id: &str, x: f64, y: f64) -> SubObject {
        let mut sub = SubObject::new(id, 0, 0.0);
        sub.centroid = Point2::new(x, y);
        sub
    }

    #[test]
    fn test_tile_origin() {
        assert_eq!(tile_origin(&Point2::new(1500.0, 2500.0), 1000.0), Point2::new(1000.0, 2000.0));
        assert_eq!(tile_origin(&Point2::new(999.0, 999.0), 1000.0), Point2::new(0.0, 0.0));
        assert_eq!(tile_origin(&Point2::new(-0.5, 2000.0), 1000.0), Point2::new(-1000.0, 2000.0));
    }

    #[test]
    fn test_tile_path() {
        let path = tile_path("out/buildings_", &Point2::new(121000.0, 487000.0), 2.2);
        assert_eq!(path, "out/buildings_121000_487000.2.2.bin");
        assert_eq!(tile_path("t_", &Point2::new(-1000.0, 0.0), 1.0), "t_-1000_0.1.bin");
    }

    #[test]
    fn test_output_dir() {
        assert_eq!(output_dir("out/buildings_"), PathBuf::from("out"));
        assert_eq!(output_dir("out/"), PathBuf::from("out/"));
        assert_eq!(output_dir("tiles_"), PathBuf::from("."));
    }

    #[test]
    fn test_bucket_groups_by_centroid() {
        let assembler = TileAssembler::new(1000.0, "out/", 2.0);
        let tiles = assembler.bucket(vec![
            at("a", 1500.0, 2500.0),
            at("b", 1999.0, 2000.0),
            at("c", 999.0, 999.0),
        ]);

        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].position, Point2::new(1000.0, 2000.0));
        assert_eq!(tiles[0].sub_objects.len(), 2);
        assert_eq!(tiles[0].file_path, "out/1000_2000.2.bin");
        assert_eq!(tiles[1].position, Point2::new(0.0, 0.0));
        assert!(tiles.iter().all(Tile::has_valid_path));
    }

    #[test]
    fn test_negative_zero_shares_the_zero_tile() {
        let assembler = TileAssembler::new(1000.0, "out/", 1.0);
        let tiles = assembler.bucket(vec![at("a", -0.0, 5.0), at("b", 0.3, 5.0), at("c", 5.0, -0.0)]);

        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].sub_objects.len(), 3);
        assert_eq!(tiles[0].file_path, "out/0_0.1.bin");
        assert!(tiles[0].position.x.is_sign_positive());
    }

    #[test]
    fn test_nan_centroid_gets_invalid_tile() {
        let assembler = TileAssembler::new(1000.0, "out/", 2.0);
        let tiles = assembler.bucket(vec![at("broken", f64::NAN, 10.0), at("also", f64::NAN, 20.0)]);
        assert_eq!(tiles.len(), 1);
        assert!(!tiles[0].has_valid_path());
        assert!(tiles[0].file_path.contains("NaN"));
    }
}
