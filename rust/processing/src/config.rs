// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bake configuration loaded from a JSON file.
//!
//! Keys are camelCase to stay compatible with existing configuration files.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use tilebake_core::{FeatureQuery, ReaderSettings};
use tilebake_geometry::{MergeTolerance, MeshSettings, SpikeRange};

/// Whether meshes crossing tile borders are cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum TilingMethod {
    /// Objects go to the tile holding their centroid and may overlap others
    #[default]
    Overlap,
    /// Objects are clipped along tile borders
    Tiled,
}

impl From<String> for TilingMethod {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("TILED") {
            TilingMethod::Tiled
        } else {
            TilingMethod::Overlap
        }
    }
}

/// What happens when an object id already exists in a tile from an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdConflictPolicy {
    /// New objects overwrite existing ones with the same id
    Replace,
    /// Both are kept
    KeepBoth,
    /// Existing objects win; new ones with a taken id are dropped
    KeepExisting,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValueToSubmesh {
    pub value: String,
    #[serde(rename = "submeshIndex")]
    pub submesh_index: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    pub attribute_name: String,
    #[serde(default)]
    pub value_to_sub_mesh: Vec<ValueToSubmesh>,
}

/// Maps one feature type to a submesh and a simplification density.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityObjectFilter {
    pub object_type: String,
    #[serde(default)]
    pub default_submesh_index: u32,
    #[serde(default)]
    pub max_vertices_per_square_meter: f32,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

/// Settings given on the command line, taking precedence over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub source: Option<String>,
    pub output: Option<String>,
    pub lod: Option<f64>,
}

fn default_lod() -> f64 {
    1.0
}
fn default_tile_size() -> f64 {
    1000.0
}
fn default_merge_angle() -> f32 {
    5.0
}
fn default_merge_distance() -> f64 {
    0.01
}
fn default_spikes_above() -> f64 {
    25.0
}
fn default_spikes_below() -> f64 {
    -10.0
}
fn default_min_hole_vertices() -> usize {
    3
}
fn default_min_hole_size() -> f64 {
    1.0
}
fn default_compression_level() -> u32 {
    6
}

/// Bake configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Directory of CityJSON files, or a `dir/pattern*.json` wildcard
    #[serde(default)]
    pub source_folder: String,
    /// Output prefix; tiles are written as `{prefix}{x}_{y}.{lod}.bin`
    #[serde(default)]
    pub output_folder: String,
    #[serde(default)]
    pub replace_existing_objects: bool,
    /// Attribute used as object id instead of the feature key
    #[serde(default)]
    pub identifier: String,
    /// Substring removed from identifier values
    #[serde(default)]
    pub remove_part_of_identifier: String,
    #[serde(default, rename = "exportUVCoordinates")]
    pub export_uv_coordinates: bool,
    #[serde(default = "default_lod")]
    pub lod: f64,
    #[serde(default)]
    pub tiling_method: TilingMethod,

    #[serde(default = "default_tile_size")]
    pub tile_size: f64,
    #[serde(default = "default_merge_angle")]
    pub merge_vertices_below_angle: f32,
    #[serde(default = "default_merge_distance")]
    pub merge_vertices_below_distance: f64,
    /// Write a gzip copy (`.bin.gz`) of every tile. The key name is kept for
    /// existing configs; `compress` is accepted as well.
    #[serde(default, alias = "compress")]
    pub brotli_compression: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default)]
    pub remove_spikes: bool,
    #[serde(default = "default_spikes_above")]
    pub remove_spikes_above: f64,
    #[serde(default = "default_spikes_below")]
    pub remove_spikes_below: f64,
    #[serde(default = "default_min_hole_vertices")]
    pub min_hole_vertices: usize,
    /// Holes with a smaller area (m²) are dropped
    #[serde(default = "default_min_hole_size")]
    pub min_hole_size: f64,
    /// Overrides `replaceExistingObjects` when set
    #[serde(default)]
    pub id_conflict_policy: Option<IdConflictPolicy>,

    #[serde(default)]
    pub city_object_filters: Vec<CityObjectFilter>,
}

impl ConfigFile {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse configuration JSON, tolerating trailing commas.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(&strip_trailing_commas(text))?)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(source) = &overrides.source {
            self.source_folder = source.clone();
        }
        if let Some(output) = &overrides.output {
            self.output_folder = output.clone();
        }
        if let Some(lod) = overrides.lod {
            self.lod = lod;
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(Error::InvalidConfig(reason)) };

        if self.source_folder.trim().is_empty() {
            return invalid("sourceFolder is not set".into());
        }
        if self.output_folder.trim().is_empty() {
            return invalid("outputFolder is not set".into());
        }
        if !self.lod.is_finite() {
            return invalid(format!("lod {} is not a number", self.lod));
        }
        if !self.tile_size.is_finite() || self.tile_size <= 0.0 {
            return invalid(format!("tileSize must be positive, got {}", self.tile_size));
        }
        if !self.merge_vertices_below_angle.is_finite() || self.merge_vertices_below_angle < 0.0 {
            return invalid(format!(
                "mergeVerticesBelowAngle must be a non-negative number, got {}",
                self.merge_vertices_below_angle
            ));
        }
        if !self.merge_vertices_below_distance.is_finite() || self.merge_vertices_below_distance < 0.0 {
            return invalid(format!(
                "mergeVerticesBelowDistance must be a non-negative number, got {}",
                self.merge_vertices_below_distance
            ));
        }
        if !self.min_hole_size.is_finite() {
            return invalid(format!("minHoleSize {} is not a number", self.min_hole_size));
        }
        if self.remove_spikes {
            if !self.remove_spikes_above.is_finite() || !self.remove_spikes_below.is_finite() {
                return invalid("spike thresholds must be numbers".into());
            }
            if self.remove_spikes_below > self.remove_spikes_above {
                return invalid(format!(
                    "removeSpikesBelow {} is above removeSpikesAbove {}",
                    self.remove_spikes_below, self.remove_spikes_above
                ));
            }
        }
        if self.compression_level > 9 {
            return invalid(format!("compressionLevel must be 0-9, got {}", self.compression_level));
        }
        if self.city_object_filters.is_empty() {
            return invalid("cityObjectFilters is empty; nothing would be baked".into());
        }
        for filter in &self.city_object_filters {
            let density = filter.max_vertices_per_square_meter;
            if !density.is_finite() || density < 0.0 {
                return invalid(format!(
                    "maxVerticesPerSquareMeter for {} must be a non-negative number, got {density}",
                    filter.object_type
                ));
            }
        }
        Ok(())
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            min_hole_vertices: self.min_hole_vertices,
            min_hole_area: self.min_hole_size,
            ..ReaderSettings::default()
        }
    }

    pub fn mesh_settings(&self) -> MeshSettings {
        MeshSettings::with_merge(MergeTolerance::new(
            self.merge_vertices_below_distance,
            self.merge_vertices_below_angle,
        ))
    }

    pub fn spike_range(&self) -> Option<SpikeRange> {
        self.remove_spikes
            .then(|| SpikeRange::new(self.remove_spikes_above, self.remove_spikes_below))
    }

    /// Features at the configured LOD whose type has a filter.
    pub fn feature_query(&self) -> FeatureQuery {
        FeatureQuery::at_lod(self.lod).with_types(self.city_object_filters.iter().map(|f| f.object_type.clone()))
    }

    pub fn conflict_policy(&self) -> IdConflictPolicy {
        match self.id_conflict_policy {
            Some(policy) => policy,
            None if self.replace_existing_objects => IdConflictPolicy::Replace,
            None => IdConflictPolicy::KeepBoth,
        }
    }
}

/// Remove commas directly followed (after whitespace) by `}` or `]`.
///
/// Commas inside string literals are left alone.
pub fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some((i, c)) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = text[i + 1..].trim_start().chars().next();
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
