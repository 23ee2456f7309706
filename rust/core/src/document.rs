// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CityJSON document model and feature loading.
//!
//! The document is parsed once into typed top-level tables (vertices,
//! transform, appearance, object table). Feature geometry stays as raw JSON
//! until a feature is requested, so a worker pays only for what it reads.

use crate::boundary::{lod_matches, read_attributes, read_geometry, GeometryContext};
use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureOutcome, TextureRef};
use nalgebra::{Point3, Vector2, Vector3};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// Linear vertex transform: `v' = v * scale + translate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Vector3<f64>,
    pub translate: Vector3<f64>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vector3::new(1.0, 1.0, 1.0),
            translate: Vector3::zeros(),
        }
    }
}

impl Transform {
    pub fn new(scale: Vector3<f64>, translate: Vector3<f64>) -> Self {
        Self { scale, translate }
    }

    #[inline]
    pub fn apply(&self, raw: [f64; 3]) -> Point3<f64> {
        Point3::new(
            raw[0] * self.scale.x + self.translate.x,
            raw[1] * self.scale.y + self.translate.y,
            raw[2] * self.scale.z + self.translate.z,
        )
    }
}

/// Reader tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderSettings {
    /// Holes with fewer vertices than this are dropped.
    pub min_hole_vertices: usize,
    /// Holes with a smaller planar area (m²) are dropped.
    pub min_hole_area: f64,
    /// Apply the document's `transform.scale`.
    pub apply_scale: bool,
    /// Apply the document's `transform.translate`.
    pub apply_translate: bool,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            min_hole_vertices: 3,
            min_hole_area: 1.0,
            apply_scale: true,
            apply_translate: true,
        }
    }
}

/// What to read from a feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureQuery {
    /// Requested LOD; `None` reads every geometry entry.
    pub lod: Option<f64>,
    /// Accepted top-level types; empty accepts all. Children are never filtered.
    pub types: Vec<String>,
}

impl FeatureQuery {
    pub fn at_lod(lod: f64) -> Self {
        Self {
            lod: Some(lod),
            types: Vec::new(),
        }
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, feature_type: &str) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| t == feature_type)
    }
}

/// Counts and transform of a loaded document, for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSummary {
    pub version: Option<String>,
    pub object_count: usize,
    pub vertex_count: usize,
    pub texture_count: usize,
    pub transform: Transform,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "CityObjects")]
    city_objects: Option<FxHashMap<String, RawCityObject>>,
    #[serde(default)]
    vertices: Vec<[f64; 3]>,
    #[serde(default)]
    transform: Option<RawTransform>,
    #[serde(default)]
    appearance: Option<RawAppearance>,
}

#[derive(Deserialize)]
struct RawTransform {
    scale: Option<[f64; 3]>,
    translate: Option<[f64; 3]>,
}

#[derive(Deserialize, Default)]
struct RawAppearance {
    #[serde(rename = "vertices-texture", default)]
    vertices_texture: Vec<[f32; 2]>,
    #[serde(default)]
    textures: Vec<RawTexture>,
}

#[derive(Deserialize)]
struct RawTexture {
    image: String,
    #[serde(rename = "wrapMode", default)]
    wrap_mode: Option<String>,
}

#[derive(Deserialize)]
struct RawCityObject {
    #[serde(rename = "type")]
    object_type: Option<String>,
    #[serde(default)]
    attributes: Option<Value>,
    #[serde(default)]
    geometry: Vec<Value>,
    #[serde(default)]
    children: Vec<String>,
}

/// A parsed CityJSON document.
pub struct CityDocument {
    version: Option<String>,
    objects: FxHashMap<String, RawCityObject>,
    /// Object keys in a stable (sorted) order for index access.
    keys: Vec<String>,
    vertices: Vec<Point3<f64>>,
    texture_vertices: Vec<Vector2<f32>>,
    textures: Vec<TextureRef>,
    transform: Transform,
    settings: ReaderSettings,
}

impl std::fmt::Debug for CityDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CityDocument")
            .field("objects", &self.keys.len())
            .field("vertices", &self.vertices.len())
            .field("transform", &self.transform)
            .finish()
    }
}

impl CityDocument {
    /// Read and parse a document from disk.
    ///
    /// Texture image paths are resolved against the document's directory.
    pub fn open(path: &Path, settings: ReaderSettings) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mut document = Self::from_slice(&bytes, settings)?;
        if let Some(dir) = path.parent() {
            for texture in &mut document.textures {
                texture.image = dir.join(&texture.image).to_string_lossy().into_owned();
            }
        }
        Ok(document)
    }

    pub fn from_json(json: &str, settings: ReaderSettings) -> Result<Self> {
        Self::from_slice(json.as_bytes(), settings)
    }

    pub fn from_slice(bytes: &[u8], settings: ReaderSettings) -> Result<Self> {
        let raw: RawDocument = serde_json::from_slice(bytes)?;
        let objects = raw.city_objects.ok_or(Error::MissingCityObjects)?;

        let mut transform = Transform::default();
        if let Some(t) = &raw.transform {
            if let (true, Some(s)) = (settings.apply_scale, t.scale) {
                transform.scale = Vector3::from(s);
            }
            if let (true, Some(o)) = (settings.apply_translate, t.translate) {
                transform.translate = Vector3::from(o);
            }
        }

        let vertices = raw.vertices.iter().map(|v| transform.apply(*v)).collect();

        let appearance = raw.appearance.unwrap_or_default();
        let texture_vertices = appearance
            .vertices_texture
            .iter()
            .map(|uv| Vector2::new(uv[0], uv[1]))
            .collect();
        let textures = appearance
            .textures
            .into_iter()
            .map(|t| TextureRef {
                image: t.image,
                wrap_mode: t.wrap_mode,
            })
            .collect();

        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort_unstable();

        Ok(Self {
            version: raw.version,
            objects,
            keys,
            vertices,
            texture_vertices,
            textures,
            transform,
            settings,
        })
    }

    /// Number of entries in the object table, children included.
    pub fn feature_count(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Transformed vertex array.
    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    /// Keys of objects that are nobody's child.
    pub fn root_keys(&self) -> Vec<&str> {
        let mut children: rustc_hash::FxHashSet<&str> = rustc_hash::FxHashSet::default();
        for object in self.objects.values() {
            children.extend(object.children.iter().map(String::as_str));
        }
        self.keys
            .iter()
            .map(String::as_str)
            .filter(|k| !children.contains(k))
            .collect()
    }

    pub fn metadata_summary(&self) -> MetadataSummary {
        MetadataSummary {
            version: self.version.clone(),
            object_count: self.keys.len(),
            vertex_count: self.vertices.len(),
            texture_count: self.textures.len(),
            transform: self.transform,
        }
    }

    /// Load the feature at `index` in key order.
    pub fn load_feature_by_index(&self, index: usize, query: &FeatureQuery) -> Result<FeatureOutcome> {
        let key = self
            .keys
            .get(index)
            .ok_or_else(|| Error::FeatureNotFound(format!("#{index}")))?;
        self.load_feature_by_key(key, query)
    }

    /// Load a feature and, recursively, its children.
    pub fn load_feature_by_key(&self, key: &str, query: &FeatureQuery) -> Result<FeatureOutcome> {
        let object = self
            .objects
            .get(key)
            .ok_or_else(|| Error::FeatureNotFound(key.to_string()))?;
        let feature_type = object
            .object_type
            .as_deref()
            .ok_or_else(|| Error::MissingType(key.to_string()))?;

        if !query.accepts(feature_type) {
            return Ok(FeatureOutcome::Filtered {
                key: key.to_string(),
                feature_type: feature_type.to_string(),
            });
        }

        let mut ancestry = Vec::new();
        self.read_feature(key, object, query.lod, &mut ancestry)
            .map(FeatureOutcome::Loaded)
    }

    fn read_feature<'a>(
        &'a self,
        key: &'a str,
        object: &'a RawCityObject,
        lod: Option<f64>,
        ancestry: &mut Vec<&'a str>,
    ) -> Result<Feature> {
        let mut feature = Feature {
            key: key.to_string(),
            feature_type: object.object_type.clone().unwrap_or_default(),
            semantics: read_attributes(object.attributes.as_ref()),
            ..Default::default()
        };

        let ctx = GeometryContext {
            key,
            vertices: &self.vertices,
            texture_vertices: &self.texture_vertices,
            textures: &self.textures,
            settings: &self.settings,
        };
        for geometry in object.geometry.iter().filter(|g| lod_matches(g, lod)) {
            if let Some(surfaces) = read_geometry(&ctx, geometry, &mut feature.dropped_holes)? {
                feature.surfaces.extend(surfaces);
            }
        }

        ancestry.push(key);
        for child_key in &object.children {
            if child_key == key || ancestry.contains(&child_key.as_str()) {
                return Err(Error::CyclicReference(child_key.clone()));
            }

            let Some(child) = self.objects.get(child_key) else {
                tracing::warn!(parent = %key, child = %child_key, "Child object not found, skipping");
                continue;
            };

            match self.read_feature(child_key, child, lod, ancestry) {
                Ok(child_feature) => feature.children.push(child_feature),
                Err(e @ Error::CyclicReference(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(parent = %key, child = %child_key, error = %e, "Failed to read child object, skipping");
                }
            }
        }
        ancestry.pop();

        Ok(feature)
    }
}
