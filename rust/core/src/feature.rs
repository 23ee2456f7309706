// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feature tree produced by the reader.
//!
//! A [`Feature`] owns its surfaces and its children outright. CityJSON does not
//! allow deeper nesting than parent/child in practice, but the tree is generic.

use nalgebra::{Point3, Vector2};

/// A name/value attribute pair, kept in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Semantic {
    pub name: String,
    pub value: String,
}

impl Semantic {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Find the value of the first semantic with the given name.
pub fn find_semantic<'a>(semantics: &'a [Semantic], name: &str) -> Option<&'a str> {
    semantics
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.value.as_str())
}

/// Texture reference taken from the document's `appearance.textures` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureRef {
    /// Image path, resolved relative to the source document.
    pub image: String,
    /// Wrap mode as declared in the document (`wrap`, `clamp`, ...).
    pub wrap_mode: Option<String>,
}

/// One planar boundary loop with optional holes.
#[derive(Debug, Clone, Default)]
pub struct Surface {
    /// Outer ring, not closed (the first point is not repeated at the end).
    pub outer: Vec<Point3<f64>>,
    /// Inner rings that survived hole filtering.
    pub holes: Vec<Vec<Point3<f64>>>,
    /// UVs aligned with `outer`; empty when the surface is untextured.
    pub outer_uvs: Vec<Vector2<f32>>,
    /// UVs aligned with each entry of `holes`.
    pub hole_uvs: Vec<Vec<Vector2<f32>>>,
    /// Semantic surface type (`RoofSurface`, `WallSurface`, ...).
    pub surface_type: Option<String>,
    pub semantics: Vec<Semantic>,
    pub texture: Option<TextureRef>,
}

impl Surface {
    /// Surface from an outer ring without holes.
    pub fn from_ring(outer: Vec<Point3<f64>>) -> Self {
        Self {
            outer,
            ..Default::default()
        }
    }

    /// Whether UVs line up with every ring of this surface.
    pub fn has_uvs(&self) -> bool {
        !self.outer_uvs.is_empty()
            && self.outer_uvs.len() == self.outer.len()
            && self.hole_uvs.len() == self.holes.len()
            && self
                .hole_uvs
                .iter()
                .zip(&self.holes)
                .all(|(uvs, ring)| uvs.len() == ring.len())
    }

    /// Total number of ring points, outer plus holes.
    pub fn point_count(&self) -> usize {
        self.outer.len() + self.holes.iter().map(Vec::len).sum::<usize>()
    }
}

/// A city object with its geometry at one LOD and its resolved children.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    /// Key of the object in the document's `CityObjects` table.
    pub key: String,
    /// CityJSON object type (`Building`, `TINRelief`, ...).
    pub feature_type: String,
    /// Object attributes, in document order.
    pub semantics: Vec<Semantic>,
    pub surfaces: Vec<Surface>,
    pub children: Vec<Feature>,
    /// Number of holes dropped by the hole filter while reading this feature.
    pub dropped_holes: usize,
}

impl Feature {
    /// Value of the attribute `name`, if present.
    pub fn semantic(&self, name: &str) -> Option<&str> {
        find_semantic(&self.semantics, name)
    }

    /// Surfaces of this feature followed by those of all descendants, depth first.
    pub fn all_surfaces(&self) -> Box<dyn Iterator<Item = &Surface> + '_> {
        Box::new(
            self.surfaces
                .iter()
                .chain(self.children.iter().flat_map(|c| c.all_surfaces())),
        )
    }

    /// Number of features in this subtree, including `self`.
    pub fn tree_size(&self) -> usize {
        1 + self.children.iter().map(Feature::tree_size).sum::<usize>()
    }
}

/// Result of asking the reader for a feature.
#[derive(Debug, Clone)]
pub enum FeatureOutcome {
    /// The feature passed the type filter and was read.
    Loaded(Feature),
    /// The feature exists but its type is excluded by the active filter.
    Filtered { key: String, feature_type: String },
}

impl FeatureOutcome {
    /// The loaded feature, if any.
    pub fn into_feature(self) -> Option<Feature> {
        match self {
            FeatureOutcome::Loaded(feature) => Some(feature),
            FeatureOutcome::Filtered { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(z: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
        ]
    }

    #[test]
    fn test_find_semantic() {
        let semantics = vec![Semantic::new("a", "1"), Semantic::new("b", "2")];
        assert_eq!(find_semantic(&semantics, "b"), Some("2"));
        assert_eq!(find_semantic(&semantics, "c"), None);
    }

    #[test]
    fn test_surface_uv_alignment() {
        let mut surface = Surface::from_ring(square(0.0));
        assert!(!surface.has_uvs());

        surface.outer_uvs = vec![Vector2::zeros(); 4];
        assert!(surface.has_uvs());

        surface.holes.push(square(0.0));
        assert!(!surface.has_uvs());
        surface.hole_uvs.push(vec![Vector2::zeros(); 4]);
        assert!(surface.has_uvs());
        assert_eq!(surface.point_count(), 8);
    }

    #[test]
    fn test_all_surfaces_walks_children() {
        let child = Feature {
            key: "child".into(),
            surfaces: vec![Surface::from_ring(square(1.0))],
            ..Default::default()
        };
        let parent = Feature {
            key: "parent".into(),
            surfaces: vec![Surface::from_ring(square(0.0))],
            children: vec![child],
            ..Default::default()
        };

        assert_eq!(parent.all_surfaces().count(), 2);
        assert_eq!(parent.tree_size(), 2);
    }
}
