// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary tile files
//!
//! Little-endian layout:
//!
//! ```text
//! "TBK1" | version u32 | flags u32 | origin x f64 | origin y f64
//! object count u32 | vertex count u32 | index count u32
//! per object: id len u32, id utf-8, submesh u32,
//!             vertex start u32, vertex count u32,
//!             index start u32, index count u32,
//!             centroid x f64, centroid y f64
//! positions  f32 x3 per vertex, x/y relative to the tile origin
//! normals    f32 x3 per vertex
//! uvs        f32 x2 per vertex, only when flags bit 0 is set
//! indices    u32, relative to the object's first vertex
//! ```
//!
//! Objects are ordered by submesh index, then id.

use crate::config::IdConflictPolicy;
use crate::error::{Error, Result};
use crate::tile::Tile;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rustc_hash::FxHashSet;
use std::path::Path;
use tilebake_geometry::{CoordinateShift, MeshState, Point2, SubObject, Vector2, Vector3};

const MAGIC: &[u8; 4] = b"TBK1";
const VERSION: u32 = 1;
const FLAG_UVS: u32 = 1;

/// Reads and writes tile files.
pub trait TileCodec: Send + Sync {
    /// Write `tile` to its file path.
    fn export(&self, tile: &Tile, include_uvs: bool) -> Result<()>;

    /// Merge objects from an existing file at the tile's path into `tile`.
    ///
    /// Returns the number of existing objects kept; zero when there is no file.
    fn import(&self, tile: &mut Tile, policy: IdConflictPolicy) -> Result<usize>;
}

/// The `TBK1` tile format.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryTileCodec;

impl BinaryTileCodec {
    pub fn new() -> Self {
        Self
    }
}

impl TileCodec for BinaryTileCodec {
    fn export(&self, tile: &Tile, include_uvs: bool) -> Result<()> {
        let data = encode_tile(tile, include_uvs)?;
        write_atomic(Path::new(&tile.file_path), &data)?;
        tracing::trace!(path = %tile.file_path, bytes = data.len(), "Wrote tile");
        Ok(())
    }

    fn import(&self, tile: &mut Tile, policy: IdConflictPolicy) -> Result<usize> {
        let path = Path::new(&tile.file_path);
        if !path.exists() {
            return Ok(0);
        }

        let data = std::fs::read(path)?;
        let existing = decode_tile(&data, &tile.file_path)?;
        let incoming = std::mem::take(&mut tile.sub_objects);
        let (merged, kept) = merge_objects(existing, incoming, policy);
        tile.sub_objects = merged;

        tracing::debug!(path = %tile.file_path, kept, "Merged existing tile");
        Ok(kept)
    }
}

/// Combine objects of an earlier run with new ones.
///
/// Returns the merged list, existing objects first, and how many existing
/// objects survived.
pub fn merge_objects(
    existing: Vec<SubObject>,
    incoming: Vec<SubObject>,
    policy: IdConflictPolicy,
) -> (Vec<SubObject>, usize) {
    let (existing, incoming) = match policy {
        IdConflictPolicy::KeepBoth => (existing, incoming),
        IdConflictPolicy::Replace => {
            let replaced: FxHashSet<&str> = incoming.iter().map(|s| s.id.as_str()).collect();
            let existing: Vec<SubObject> = existing
                .into_iter()
                .filter(|s| !replaced.contains(s.id.as_str()))
                .collect();
            (existing, incoming)
        }
        IdConflictPolicy::KeepExisting => {
            let taken: FxHashSet<&str> = existing.iter().map(|s| s.id.as_str()).collect();
            let incoming: Vec<SubObject> = incoming
                .into_iter()
                .filter(|s| !taken.contains(s.id.as_str()))
                .collect();
            (existing, incoming)
        }
    };

    let kept = existing.len();
    let mut merged = existing;
    merged.extend(incoming);
    (merged, kept)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn to_u32(value: usize, what: &str, path: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::codec(path, format!("{what} {value} does not fit in u32")))
}

/// Serialize a tile to the `TBK1` layout.
pub fn encode_tile(tile: &Tile, include_uvs: bool) -> Result<Bytes> {
    let path = tile.file_path.as_str();
    let mut objects: Vec<&SubObject> = tile.sub_objects.iter().collect();
    objects.sort_by(|a, b| a.submesh_index.cmp(&b.submesh_index).then_with(|| a.id.cmp(&b.id)));

    let vertex_count: usize = objects.iter().map(|s| s.vertex_count()).sum();
    let index_count: usize = objects.iter().map(|s| s.indices.len()).sum();
    let per_vertex = if include_uvs { 32 } else { 24 };
    let mut buf = BytesMut::with_capacity(64 + objects.len() * 64 + vertex_count * per_vertex + index_count * 4);

    buf.put_slice(MAGIC);
    buf.put_u32_le(VERSION);
    buf.put_u32_le(if include_uvs { FLAG_UVS } else { 0 });
    buf.put_f64_le(tile.position.x);
    buf.put_f64_le(tile.position.y);
    buf.put_u32_le(to_u32(objects.len(), "object count", path)?);
    buf.put_u32_le(to_u32(vertex_count, "vertex count", path)?);
    buf.put_u32_le(to_u32(index_count, "index count", path)?);

    let (mut vertex_start, mut index_start) = (0usize, 0usize);
    for sub in &objects {
        buf.put_u32_le(to_u32(sub.id.len(), "id length", path)?);
        buf.put_slice(sub.id.as_bytes());
        buf.put_u32_le(sub.submesh_index);
        buf.put_u32_le(to_u32(vertex_start, "vertex offset", path)?);
        buf.put_u32_le(to_u32(sub.vertex_count(), "vertex count", path)?);
        buf.put_u32_le(to_u32(index_start, "index offset", path)?);
        buf.put_u32_le(to_u32(sub.indices.len(), "index count", path)?);
        buf.put_f64_le(sub.centroid.x);
        buf.put_f64_le(sub.centroid.y);
        vertex_start += sub.vertex_count();
        index_start += sub.indices.len();
    }

    let shift = CoordinateShift::new(tile.position.x, tile.position.y, 0.0);
    for sub in &objects {
        for v in &sub.vertices {
            for c in shift.to_local(v) {
                buf.put_f32_le(c);
            }
        }
    }
    for sub in &objects {
        for n in &sub.normals {
            buf.put_f32_le(n.x);
            buf.put_f32_le(n.y);
            buf.put_f32_le(n.z);
        }
    }
    if include_uvs {
        for sub in &objects {
            if sub.has_uvs() {
                for uv in &sub.uvs {
                    buf.put_f32_le(uv.x);
                    buf.put_f32_le(uv.y);
                }
            } else {
                buf.put_bytes(0, sub.vertex_count() * 8);
            }
        }
    }
    for sub in &objects {
        for &i in &sub.indices {
            buf.put_u32_le(i);
        }
    }

    Ok(buf.freeze())
}

struct ObjectEntry {
    id: String,
    submesh_index: u32,
    vertex_start: usize,
    vertex_count: usize,
    index_start: usize,
    index_count: usize,
    centroid: Point2<f64>,
}

/// Parse a `TBK1` tile. `path` only labels errors.
pub fn decode_tile(data: &[u8], path: &str) -> Result<Vec<SubObject>> {
    let mut buf = data;
    let truncated = || Error::codec(path, "file is truncated");
    let need = |buf: &&[u8], n: usize| if buf.remaining() < n { Err(truncated()) } else { Ok(()) };

    need(&buf, 40)?;
    if &buf[..4] != MAGIC {
        return Err(Error::codec(path, "not a TBK1 tile"));
    }
    buf.advance(4);
    let version = buf.get_u32_le();
    if version != VERSION {
        return Err(Error::codec(path, format!("unsupported version {version}")));
    }
    let has_uvs = buf.get_u32_le() & FLAG_UVS != 0;
    let origin = Point2::new(buf.get_f64_le(), buf.get_f64_le());
    let object_count = buf.get_u32_le() as usize;
    let vertex_count = buf.get_u32_le() as usize;
    let index_count = buf.get_u32_le() as usize;

    let mut entries = Vec::with_capacity(object_count.min(buf.remaining() / 44));
    for _ in 0..object_count {
        need(&buf, 4)?;
        let id_len = buf.get_u32_le() as usize;
        need(&buf, id_len + 40)?;
        let id = String::from_utf8(buf[..id_len].to_vec()).map_err(|_| Error::codec(path, "object id is not UTF-8"))?;
        buf.advance(id_len);

        let entry = ObjectEntry {
            id,
            submesh_index: buf.get_u32_le(),
            vertex_start: buf.get_u32_le() as usize,
            vertex_count: buf.get_u32_le() as usize,
            index_start: buf.get_u32_le() as usize,
            index_count: buf.get_u32_le() as usize,
            centroid: Point2::new(buf.get_f64_le(), buf.get_f64_le()),
        };
        if entry.vertex_start + entry.vertex_count > vertex_count || entry.index_start + entry.index_count > index_count {
            return Err(Error::codec(path, format!("object {} exceeds the data arrays", entry.id)));
        }
        entries.push(entry);
    }

    let uv_bytes = if has_uvs { vertex_count * 8 } else { 0 };
    need(&buf, vertex_count * 24 + uv_bytes + index_count * 4)?;

    let shift = CoordinateShift::new(origin.x, origin.y, 0.0);
    let positions: Vec<_> = (0..vertex_count)
        .map(|_| shift.to_world([buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()]))
        .collect();
    let normals: Vec<_> = (0..vertex_count)
        .map(|_| Vector3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()))
        .collect();
    let uvs: Vec<_> = if has_uvs {
        (0..vertex_count)
            .map(|_| Vector2::new(buf.get_f32_le(), buf.get_f32_le()))
            .collect()
    } else {
        Vec::new()
    };
    let indices: Vec<u32> = (0..index_count).map(|_| buf.get_u32_le()).collect();

    let mut objects = Vec::with_capacity(entries.len());
    for entry in entries {
        let vertices = entry.vertex_start..entry.vertex_start + entry.vertex_count;
        let mut sub = SubObject::new(entry.id, entry.submesh_index, 0.0);
        sub.vertices = positions[vertices.clone()].to_vec();
        sub.normals = normals[vertices.clone()].to_vec();
        if has_uvs {
            sub.uvs = uvs[vertices].to_vec();
        }
        sub.indices = indices[entry.index_start..entry.index_start + entry.index_count].to_vec();
        sub.centroid = entry.centroid;
        sub.state = MeshState::Finalized;
        sub.validate().map_err(|e| Error::codec(path, e.to_string()))?;
        objects.push(sub);
    }
    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tilebake_geometry::Point3;

    fn triangle(id: &str, submesh: u32, x: f64, with_uv: bool) -> SubObject {
        let mut sub = SubObject::new(id, submesh, 0.0);
        let n = Vector3::z();
        let uv = |u: f32, v: f32| with_uv.then(|| Vector2::new(u, v));
        sub.push_vertex(Point3::new(x, 487_000.25, 3.5), n, uv(0.0, 0.0));
        sub.push_vertex(Point3::new(x + 1.0, 487_000.25, 3.5), n, uv(1.0, 0.0));
        sub.push_vertex(Point3::new(x, 487_001.25, 4.5), n, uv(0.0, 1.0));
        sub.push_triangle(0, 1, 2);
        sub.centroid = Point2::new(x + 0.3, 487_000.5);
        sub
    }

    fn tile(objects: Vec<SubObject>) -> Tile {
        let mut tile = Tile::new(Point2::new(121_000.0, 487_000.0), 1000.0, "mem.bin".into());
        tile.sub_objects = objects;
        tile
    }

    #[test]
    fn test_decode_restores_world_coordinates_and_order() {
        let source = tile(vec![
            triangle("b", 1, 121_500.125, true),
            triangle("a", 1, 121_100.5, false),
            triangle("z", 0, 121_900.0, false),
        ]);
        let data = encode_tile(&source, true).unwrap();
        let decoded = decode_tile(&data, "mem.bin").unwrap();

        let ids: Vec<&str> = decoded.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);

        let b = &decoded[2];
        assert_relative_eq!(b.vertices[1].x, 121_501.125, epsilon = 1e-4);
        assert_relative_eq!(b.vertices[2].y, 487_001.25, epsilon = 1e-4);
        assert_relative_eq!(b.vertices[2].z, 4.5, epsilon = 1e-6);
        assert_eq!(b.uvs[1], Vector2::new(1.0, 0.0));
        assert_eq!(b.indices, vec![0, 1, 2]);
        assert_eq!(b.centroid, Point2::new(121_500.125 + 0.3, 487_000.5));
        assert_eq!(b.state, MeshState::Finalized);

        // Untextured objects get zero UVs when the tile carries UVs
        assert_eq!(decoded[1].uvs, vec![Vector2::zeros(); 3]);
    }

    #[test]
    fn test_uvs_omitted() {
        let source = tile(vec![triangle("a", 0, 121_000.0, true)]);
        let decoded = decode_tile(&encode_tile(&source, false).unwrap(), "mem.bin").unwrap();
        assert!(decoded[0].uvs.is_empty());
    }

    #[test]
    fn test_rejects_bad_files() {
        assert!(matches!(decode_tile(b"TBK1", "x"), Err(Error::Codec { .. })));
        assert!(decode_tile(&[0u8; 64], "x").is_err());

        let data = encode_tile(&tile(vec![triangle("a", 0, 121_000.0, false)]), false).unwrap();
        assert!(decode_tile(&data[..data.len() - 2], "x").is_err());
    }

    #[test]
    fn test_merge_policies() {
        let existing = || vec![triangle("a", 0, 121_000.0, false), triangle("b", 0, 121_010.0, false)];
        let newer = triangle("b", 3, 121_020.0, false);
        let incoming = || vec![newer.clone(), triangle("c", 0, 121_030.0, false)];

        let (merged, kept) = merge_objects(existing(), incoming(), IdConflictPolicy::Replace);
        assert_eq!(kept, 1);
        let b: Vec<_> = merged.iter().filter(|s| s.id == "b").collect();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].submesh_index, 3);

        let (merged, kept) = merge_objects(existing(), incoming(), IdConflictPolicy::KeepBoth);
        assert_eq!(kept, 2);
        assert_eq!(merged.len(), 4);

        let (merged, kept) = merge_objects(existing(), incoming(), IdConflictPolicy::KeepExisting);
        assert_eq!(kept, 2);
        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged[1].submesh_index, 0);
    }

    #[test]
    fn test_export_then_import_merges_file() {
        let dir = std::env::temp_dir().join(format!("tilebake-codec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("121000_487000.2.bin").to_string_lossy().into_owned();

        let codec = BinaryTileCodec::new();
        let mut first = tile(vec![triangle("a", 0, 121_000.0, false)]);
        first.file_path = path.clone();
        codec.export(&first, false).unwrap();
        assert!(!Path::new(&format!("{path}.tmp")).exists());

        let mut second = tile(vec![triangle("b", 0, 121_010.0, false)]);
        second.file_path = path.clone();
        assert_eq!(codec.import(&mut second, IdConflictPolicy::Replace).unwrap(), 1);
        assert_eq!(second.sub_objects.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
