// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boundary representation reading.
//!
//! CityJSON nests boundaries by geometry type. Everything here walks down to
//! the surface level (an array of rings) and walks the parallel `semantics`
//! and `texture` value arrays to the same depth, so a surface and its
//! attachments line up by position.

use crate::error::{Error, Result};
use crate::feature::{Semantic, Surface, TextureRef};
use crate::rings::{horizontal_area, open_ring};
use crate::ReaderSettings;
use nalgebra::{Point3, Vector2};
use serde_json::Value;

/// Boundary representations the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    MultiSurface,
    CompositeSurface,
    Solid,
    MultiSolid,
    CompositeSolid,
}

impl BoundaryKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "MultiSurface" => Some(Self::MultiSurface),
            "CompositeSurface" => Some(Self::CompositeSurface),
            "Solid" => Some(Self::Solid),
            "MultiSolid" => Some(Self::MultiSolid),
            "CompositeSolid" => Some(Self::CompositeSolid),
            _ => None,
        }
    }

    /// Array depth from `boundaries` down to individual surfaces.
    pub fn surface_depth(self) -> usize {
        match self {
            Self::MultiSurface | Self::CompositeSurface => 1,
            Self::Solid => 2,
            Self::MultiSolid | Self::CompositeSolid => 3,
        }
    }
}

/// Document-wide tables a geometry reader needs.
pub(crate) struct GeometryContext<'a> {
    pub key: &'a str,
    pub vertices: &'a [Point3<f64>],
    pub texture_vertices: &'a [Vector2<f32>],
    pub textures: &'a [TextureRef],
    pub settings: &'a ReaderSettings,
}

/// Parse a `lod` member, which is a number in CityJSON 1.0 and a string in 1.1.
pub fn parse_lod(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a geometry entry's declared LOD matches the requested one.
pub fn lod_matches(geometry: &Value, lod: Option<f64>) -> bool {
    match lod {
        None => true,
        Some(wanted) => geometry
            .get("lod")
            .and_then(parse_lod)
            .is_some_and(|declared| (declared - wanted).abs() < 1e-4),
    }
}

/// Collect the nodes `depth` array levels below `node`, in order.
fn flatten<'v>(node: &'v Value, depth: usize, out: &mut Vec<&'v Value>) -> bool {
    if depth == 0 {
        out.push(node);
        return true;
    }
    match node.as_array() {
        Some(items) => items.iter().all(|item| flatten(item, depth - 1, out)),
        None => false,
    }
}

/// Read all surfaces of one geometry entry.
///
/// Returns `Ok(None)` for representations the reader does not support.
pub(crate) fn read_geometry(
    ctx: &GeometryContext<'_>,
    geometry: &Value,
    dropped_holes: &mut usize,
) -> Result<Option<Vec<Surface>>> {
    let type_name = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    let Some(kind) = BoundaryKind::from_name(type_name) else {
        tracing::warn!(key = %ctx.key, geometry_type = %type_name, "Unknown geometry type, skipping");
        return Ok(None);
    };

    let depth = kind.surface_depth();
    let mut surface_nodes = Vec::new();
    let boundaries = geometry.get("boundaries").unwrap_or(&Value::Null);
    if !flatten(boundaries, depth, &mut surface_nodes) {
        return Err(malformed(ctx, format!("{type_name} boundaries are not nested {depth} deep")));
    }

    let semantics = read_semantic_values(geometry, depth, surface_nodes.len());
    let textures = read_texture_values(geometry, depth);

    let mut surfaces = Vec::with_capacity(surface_nodes.len());
    for (i, node) in surface_nodes.iter().enumerate() {
        let (mut surface, kept_holes) = read_surface(ctx, node, dropped_holes)?;

        if let Some(Some(semantic_object)) = semantics.get(i) {
            apply_surface_semantics(&mut surface, semantic_object);
        }
        if let Some(texture_rings) = textures.get(i) {
            apply_surface_uvs(ctx, &mut surface, texture_rings, &kept_holes);
        }

        surfaces.push(surface);
    }

    Ok(Some(surfaces))
}

/// Read one surface: outer ring plus the holes that pass the hole filter.
///
/// The second value lists the ring index (1-based, into the source surface) of
/// every kept hole so texture rings can be matched afterwards.
fn read_surface(
    ctx: &GeometryContext<'_>,
    node: &Value,
    dropped_holes: &mut usize,
) -> Result<(Surface, Vec<usize>)> {
    let rings = node
        .as_array()
        .ok_or_else(|| malformed(ctx, "surface is not an array of rings".to_string()))?;

    let mut surface = Surface::default();
    let mut kept_holes = Vec::new();
    let Some(outer) = rings.first() else {
        return Ok((surface, kept_holes));
    };
    surface.outer = read_ring(ctx, outer)?;

    let settings = ctx.settings;
    for (ring_index, ring) in rings.iter().enumerate().skip(1) {
        let points = read_ring(ctx, ring)?;

        if points.len() < settings.min_hole_vertices {
            tracing::debug!(
                key = %ctx.key,
                vertices = points.len(),
                minimum = settings.min_hole_vertices,
                "Skipping hole with too few vertices"
            );
            *dropped_holes += 1;
            continue;
        }

        // Footprint area: holes in vertical walls measure zero and are dropped.
        let area = horizontal_area(&points);
        if area < settings.min_hole_area {
            tracing::debug!(key = %ctx.key, area, minimum = settings.min_hole_area, "Skipping undersized hole");
            *dropped_holes += 1;
            continue;
        }

        surface.holes.push(points);
        kept_holes.push(ring_index);
    }

    Ok((surface, kept_holes))
}

fn read_ring(ctx: &GeometryContext<'_>, ring: &Value) -> Result<Vec<Point3<f64>>> {
    let indices = ring
        .as_array()
        .ok_or_else(|| malformed(ctx, "ring is not an array of vertex indices".to_string()))?;

    let mut points = Vec::with_capacity(indices.len());
    for index in indices {
        let index = index
            .as_u64()
            .ok_or_else(|| malformed(ctx, format!("vertex index {index} is not an unsigned integer")))?
            as usize;
        let point = ctx.vertices.get(index).ok_or_else(|| Error::InvalidVertexIndex {
            key: ctx.key.to_string(),
            index,
            len: ctx.vertices.len(),
        })?;
        points.push(*point);
    }

    open_ring(&mut points);
    Ok(points)
}

/// Resolve `semantics.values` to one optional semantic object per surface.
fn read_semantic_values(geometry: &Value, depth: usize, surface_count: usize) -> Vec<Option<&Value>> {
    let Some(semantics) = geometry.get("semantics") else {
        return Vec::new();
    };
    let table = semantics.get("surfaces").and_then(Value::as_array);

    let mut values = Vec::with_capacity(surface_count);
    if !flatten(semantics.get("values").unwrap_or(&Value::Null), depth, &mut values) {
        tracing::debug!("Semantic values do not match the boundary nesting, ignoring them");
        return Vec::new();
    }

    values
        .into_iter()
        .map(|value| {
            let index = value.as_u64()? as usize;
            // An index past the table is treated as "no semantics"
            table.and_then(|t| t.get(index))
        })
        .collect()
}

fn apply_surface_semantics(surface: &mut Surface, semantic_object: &Value) {
    let Some(object) = semantic_object.as_object() else {
        return;
    };
    surface.surface_type = object.get("type").and_then(Value::as_str).map(str::to_string);
    surface.semantics = read_attributes(Some(semantic_object));
}

/// Resolve the first texture theme's values to one ring list per surface.
fn read_texture_values(geometry: &Value, depth: usize) -> Vec<&Value> {
    let Some(theme) = geometry
        .get("texture")
        .and_then(Value::as_object)
        .and_then(|themes| themes.values().next())
    else {
        return Vec::new();
    };

    let mut values = Vec::new();
    if !flatten(theme.get("values").unwrap_or(&Value::Null), depth, &mut values) {
        tracing::debug!("Texture values do not match the boundary nesting, ignoring them");
        return Vec::new();
    }
    values
}

/// Attach UVs from `[[textureIndex, uv0, uv1, ...], ...]` ring lists.
///
/// Any index that cannot be resolved leaves the surface untextured.
fn apply_surface_uvs(
    ctx: &GeometryContext<'_>,
    surface: &mut Surface,
    texture_rings: &Value,
    kept_holes: &[usize],
) {
    let Some(rings) = texture_rings.as_array() else {
        return;
    };

    let Some(outer) = rings.first().and_then(|ring| read_uv_ring(ctx, ring, surface.outer.len())) else {
        return;
    };
    let Some((texture_index, outer_uvs)) = outer else {
        return;
    };

    let mut hole_uvs = Vec::with_capacity(kept_holes.len());
    for (hole, &ring_index) in surface.holes.iter().zip(kept_holes) {
        match rings.get(ring_index).and_then(|ring| read_uv_ring(ctx, ring, hole.len())) {
            Some(Some((_, uvs))) => hole_uvs.push(uvs),
            _ => {
                tracing::debug!(key = %ctx.key, "Hole UVs missing or out of range, dropping surface UVs");
                return;
            }
        }
    }

    surface.texture = ctx.textures.get(texture_index).cloned();
    surface.outer_uvs = outer_uvs;
    surface.hole_uvs = hole_uvs;
}

/// Read one texture ring. `None` means malformed, `Some(None)` means untextured.
#[allow(clippy::option_option)]
fn read_uv_ring(
    ctx: &GeometryContext<'_>,
    ring: &Value,
    point_count: usize,
) -> Option<Option<(usize, Vec<Vector2<f32>>)>> {
    let values = ring.as_array()?;
    let Some(texture_index) = values.first().and_then(Value::as_u64) else {
        return Some(None);
    };

    let mut uvs = Vec::with_capacity(values.len().saturating_sub(1));
    for value in &values[1..] {
        let uv = ctx.texture_vertices.get(value.as_u64()? as usize)?;
        uvs.push(*uv);
    }

    // Closed texture rings mirror closed vertex rings
    if uvs.len() == point_count + 1 {
        uvs.pop();
    }
    if uvs.len() != point_count {
        return None;
    }

    Some(Some((texture_index as usize, uvs)))
}

/// Turn a JSON attribute object into ordered name/value pairs.
///
/// Strings are taken verbatim; every other value is rendered as JSON text.
pub(crate) fn read_attributes(node: Option<&Value>) -> Vec<Semantic> {
    let Some(object) = node.and_then(Value::as_object) else {
        return Vec::new();
    };

    object
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Semantic::new(name.clone(), value)
        })
        .collect()
}

fn malformed(ctx: &GeometryContext<'_>, reason: String) -> Error {
    Error::MalformedGeometry {
        key: ctx.key.to_string(),
        reason,
    }
}
