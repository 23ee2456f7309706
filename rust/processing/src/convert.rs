// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Feature to SubObject conversion.

use crate::config::{CityObjectFilter, ConfigFile};
use crate::error::Result;
use tilebake_core::Feature;
use tilebake_geometry::{SubObject, TriangulationStats, Triangulator};

/// Submesh and density chosen for a feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterMatch {
    pub submesh_index: u32,
    pub max_vertices_per_square_meter: f32,
}

/// Pick submesh and density for `feature`.
///
/// The last filter for the feature type applies, so later entries in a config
/// override earlier ones. Within it, an attribute value mapping overrides the
/// default submesh; the last matching mapping wins. `None` when no filter
/// names the type.
pub fn match_filter(filters: &[CityObjectFilter], feature: &Feature) -> Option<FilterMatch> {
    let filter = filters.iter().rev().find(|f| f.object_type == feature.feature_type)?;

    let mut submesh_index = filter.default_submesh_index;
    for attribute in &filter.attribute_filters {
        let Some(value) = feature.semantic(&attribute.attribute_name) else {
            continue;
        };
        for mapping in &attribute.value_to_sub_mesh {
            if mapping.value == value {
                submesh_index = mapping.submesh_index;
            }
        }
    }

    Some(FilterMatch {
        submesh_index,
        max_vertices_per_square_meter: filter.max_vertices_per_square_meter,
    })
}

/// What became of one feature.
#[derive(Debug, Clone)]
pub enum Conversion {
    Converted { sub: SubObject, stats: TriangulationStats },
    /// No filter for the feature type
    NoFilter,
    /// Nothing could be triangulated at the requested LOD
    NoGeometry,
}

/// Builds one [`SubObject`] per feature, children included.
#[derive(Debug, Clone)]
pub struct Converter {
    filters: Vec<CityObjectFilter>,
    identifier: String,
    remove_from_id: String,
    export_uvs: bool,
}

impl Converter {
    pub fn new(filters: Vec<CityObjectFilter>) -> Self {
        Self {
            filters,
            identifier: String::new(),
            remove_from_id: String::new(),
            export_uvs: false,
        }
    }

    pub fn from_config(config: &ConfigFile) -> Self {
        Self {
            filters: config.city_object_filters.clone(),
            identifier: config.identifier.clone(),
            remove_from_id: config.remove_part_of_identifier.clone(),
            export_uvs: config.export_uv_coordinates,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>, remove: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self.remove_from_id = remove.into();
        self
    }

    pub fn with_uvs(mut self, export_uvs: bool) -> Self {
        self.export_uvs = export_uvs;
        self
    }

    /// Identifier attribute value with the configured part removed, or the key.
    pub fn object_id(&self, feature: &Feature) -> String {
        if self.identifier.is_empty() {
            return feature.key.clone();
        }
        match feature.semantic(&self.identifier) {
            Some(value) if !self.remove_from_id.is_empty() => value.replace(&self.remove_from_id, ""),
            Some(value) => value.to_string(),
            None => feature.key.clone(),
        }
    }

    /// Triangulate `feature` and its children into one mesh.
    ///
    /// Normals are only computed when the mesh will not be simplified, since
    /// simplification recomputes them.
    pub fn convert(&self, feature: &Feature) -> Result<Conversion> {
        let Some(matched) = match_filter(&self.filters, feature) else {
            return Ok(Conversion::NoFilter);
        };

        let density = matched.max_vertices_per_square_meter;
        let mut sub = SubObject::new(self.object_id(feature), matched.submesh_index, density);
        let triangulator = Triangulator::new(density <= 0.0, self.export_uvs);
        let stats = triangulator.append_feature(feature, &mut sub);

        if stats.skipped > 0 {
            tracing::debug!(
                key = %feature.key,
                skipped = stats.skipped,
                surfaces = stats.surfaces,
                "Some surfaces could not be triangulated"
            );
        }
        if sub.is_empty() {
            return Ok(Conversion::NoGeometry);
        }

        sub.validate()?;
        if let Some(centroid) = sub.compute_centroid() {
            sub.centroid = centroid;
        }
        Ok(Conversion::Converted { sub, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttributeFilter, ValueToSubmesh};
    use approx::assert_relative_eq;
    use tilebake_core::{Semantic, Surface};
    use tilebake_geometry::Point3;

    fn filters() -> Vec<CityObjectFilter> {
        vec![
            CityObjectFilter {
                object_type: "LandUse".into(),
                default_submesh_index: 9,
                max_vertices_per_square_meter: 1.0,
                attribute_filters: Vec::new(),
            },
            CityObjectFilter {
                object_type: "LandUse".into(),
                default_submesh_index: 0,
                max_vertices_per_square_meter: 0.0,
                attribute_filters: vec![AttributeFilter {
                    attribute_name: "function".into(),
                    value_to_sub_mesh: vec![
                        ValueToSubmesh { value: "grass".into(), submesh_index: 1 },
                        ValueToSubmesh { value: "water".into(), submesh_index: 2 },
                    ],
                }],
            },
        ]
    }

    fn land_use(function: &str) -> Feature {
        Feature {
            key: "plot-1".into(),
            feature_type: "LandUse".into(),
            semantics: vec![
                Semantic::new("function", function),
                Semantic::new("identificatie", "NL.IMBGT.plot.77"),
            ],
            surfaces: vec![Surface::from_ring(vec![
                Point3::new(1500.0, 2500.0, 0.0),
                Point3::new(1510.0, 2500.0, 0.0),
                Point3::new(1510.0, 2510.0, 0.0),
                Point3::new(1500.0, 2510.0, 0.0),
            ])],
            children: Vec::new(),
            dropped_holes: 0,
        }
    }

    #[test]
    fn test_filter_matching() {
        let filters = filters();
        let matched = match_filter(&filters, &land_use("grass")).unwrap();
        assert_eq!(matched.submesh_index, 1);
        assert_eq!(matched.max_vertices_per_square_meter, 0.0);

        assert_eq!(match_filter(&filters, &land_use("road")).unwrap().submesh_index, 0);

        let mut building = land_use("grass");
        building.feature_type = "Building".into();
        assert!(match_filter(&filters, &building).is_none());
    }

    #[test]
    fn test_later_filter_for_same_type_wins() {
        let mut filters = filters();
        let matched = match_filter(&filters, &land_use("road")).unwrap();
        assert_eq!(matched.submesh_index, 0);
        assert_eq!(matched.max_vertices_per_square_meter, 0.0);

        filters.swap(0, 1);
        let matched = match_filter(&filters, &land_use("grass")).unwrap();
        assert_eq!(matched.submesh_index, 9);
        assert_eq!(matched.max_vertices_per_square_meter, 1.0);
    }

    #[test]
    fn test_identifier() {
        let converter = Converter::new(filters());
        assert_eq!(converter.object_id(&land_use("grass")), "plot-1");

        let converter = converter.with_identifier("identificatie", "NL.IMBGT.plot.");
        assert_eq!(converter.object_id(&land_use("grass")), "77");

        let converter = Converter::new(filters()).with_identifier("missing", "");
        assert_eq!(converter.object_id(&land_use("grass")), "plot-1");
    }

    #[test]
    fn test_convert_with_children() {
        let mut parent = land_use("water");
        let mut child = land_use("water");
        child.key = "plot-1-part".into();
        child.feature_type = "Unlisted".into();
        for p in &mut child.surfaces[0].outer {
            p.z = 3.0;
        }
        parent.children.push(child);

        let Conversion::Converted { sub, stats } = Converter::new(filters()).convert(&parent).unwrap() else {
            panic!("expected a mesh");
        };
        assert_eq!(stats.surfaces, 2);
        assert_eq!(sub.triangle_count(), 4);
        assert_eq!(sub.submesh_index, 2);
        assert_relative_eq!(sub.centroid.x, 1505.0, epsilon = 1e-9);
        assert_relative_eq!(sub.centroid.y, 2505.0, epsilon = 1e-9);
    }

    #[test]
    fn test_unfiltered_and_empty() {
        let converter = Converter::new(filters());

        let mut building = land_use("grass");
        building.feature_type = "Building".into();
        assert!(matches!(converter.convert(&building).unwrap(), Conversion::NoFilter));

        let mut bare = land_use("grass");
        bare.surfaces.clear();
        assert!(matches!(converter.convert(&bare).unwrap(), Conversion::NoGeometry));
    }
}
