// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end bakes in a scratch directory.

use approx::assert_relative_eq;
use std::path::{Path, PathBuf};
use tilebake_processing::{decode_tile, ConfigFile, ConfigOverrides, Pipeline};

const CITY: &str = r#"{
    "type": "CityJSON",
    "version": "1.1",
    "vertices": [
        [1500, 2500, 0], [1510, 2500, 0], [1510, 2510, 0], [1500, 2510, 0],
        [100, 100, 0], [110, 100, 0], [110, 110, 0], [100, 110, 0]
    ],
    "CityObjects": {
        "b1": {
            "type": "Building",
            "attributes": { "identificatie": "NL.b1" },
            "geometry": [{ "type": "MultiSurface", "lod": 1, "boundaries": [[[0, 1, 2, 3]]] }]
        },
        "b2": {
            "type": "Building",
            "attributes": { "identificatie": "NL.b2" },
            "geometry": [{ "type": "MultiSurface", "lod": 1, "boundaries": [[[4, 5, 6, 7]]] }]
        },
        "r1": {
            "type": "Road",
            "geometry": [{ "type": "MultiSurface", "lod": 1, "boundaries": [[[0, 1, 5]]] }]
        }
    }
}"#;

struct Scratch {
    root: PathBuf,
}

impl Scratch {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("tilebake-pipeline-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("src")).unwrap();
        Self { root }
    }

    fn source(&self, name: &str, contents: &str) {
        std::fs::write(self.root.join("src").join(name), contents).unwrap();
    }

    fn tile(&self, name: &str) -> PathBuf {
        self.root.join("out").join(name)
    }

    fn config(&self, extra: &str) -> ConfigFile {
        let text = format!(
            r#"{{
                "sourceFolder": "{src}",
                "outputFolder": "{out}/tiles_",
                "identifier": "identificatie",
                "removePartOfIdentifier": "NL.",
                "lod": 1,
                {extra}
                "cityObjectFilters": [
                    {{ "objectType": "Building", "defaultSubmeshIndex": 3, "maxVerticesPerSquareMeter": 0 }},
                ],
            }}"#,
            src = self.root.join("src").display(),
            out = self.root.join("out").display(),
        );
        ConfigFile::from_json(&text).unwrap()
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn read_tile(path: &Path) -> Vec<tilebake_geometry::SubObject> {
    let data = std::fs::read(path).unwrap();
    decode_tile(&data, &path.display().to_string()).unwrap()
}

#[test]
fn test_bake_writes_one_tile_per_bucket() {
    let scratch = Scratch::new("bake");
    scratch.source("city.json", CITY);

    let summary = Pipeline::new(scratch.config("")).run().unwrap();

    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.features_converted, 2);
    assert_eq!(summary.features_filtered, 1);
    assert_eq!(summary.sub_objects, 2);
    assert_eq!(summary.tiles.written, 2);
    assert!(!summary.has_errors());

    let objects = read_tile(&scratch.tile("tiles_1000_2000.1.bin"));
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, "b1");
    assert_eq!(objects[0].submesh_index, 3);
    assert_eq!(objects[0].triangle_count(), 2);
    assert_relative_eq!(objects[0].centroid.x, 1505.0, epsilon = 1e-6);
    assert_relative_eq!(objects[0].centroid.y, 2505.0, epsilon = 1e-6);

    let objects = read_tile(&scratch.tile("tiles_0_0.1.bin"));
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, "b2");
}

#[test]
fn test_rerun_merges_by_policy() {
    let scratch = Scratch::new("merge");
    scratch.source("city.json", CITY);
    let tile = scratch.tile("tiles_0_0.1.bin");

    let replace = scratch.config(r#""replaceExistingObjects": true,"#);
    Pipeline::new(replace.clone()).run().unwrap();
    let summary = Pipeline::new(replace).run().unwrap();
    assert_eq!(summary.tiles.merged, 0);
    assert_eq!(read_tile(&tile).len(), 1);

    let keep_both = scratch.config(r#""idConflictPolicy": "keepBoth","#);
    let summary = Pipeline::new(keep_both).run().unwrap();
    assert_eq!(summary.tiles.merged, 2);
    let objects = read_tile(&tile);
    assert_eq!(objects.len(), 2);
    assert!(objects.iter().all(|o| o.id == "b2"));
}

#[test]
fn test_compression_and_overrides() {
    let scratch = Scratch::new("compress");
    scratch.source("city.json", CITY);

    let mut config = scratch.config(r#""brotliCompression": true,"#);
    config.lod = 2.0;
    config.apply_overrides(&ConfigOverrides {
        lod: Some(1.0),
        ..Default::default()
    });

    let summary = Pipeline::new(config).run().unwrap();
    assert_eq!(summary.compression.compressed, 2);
    assert_eq!(summary.compression.failed, 0);
    assert!(scratch.tile("tiles_1000_2000.1.bin.gz").exists());
    assert!(scratch.tile("tiles_1000_2000.1.bin").exists());
}

#[test]
fn test_broken_file_is_skipped() {
    let scratch = Scratch::new("broken");
    scratch.source("a.json", CITY);
    scratch.source("b.json", "{ not json");

    let summary = Pipeline::new(scratch.config("")).run().unwrap();
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(summary.tiles.written, 2);
    assert!(summary.has_errors());
}

#[test]
fn test_bad_feature_does_not_stop_its_siblings() {
    let scratch = Scratch::new("bad-feature");
    let city = CITY.replace(
        r#""r1": {"#,
        r#""bad": {
            "type": "Building",
            "geometry": [{ "type": "MultiSurface", "lod": 1, "boundaries": [[[0, 1, 99]]] }]
        },
        "r1": {"#,
    );
    scratch.source("city.json", &city);

    let summary = Pipeline::new(scratch.config("")).run().unwrap();
    assert_eq!(summary.files_processed, 1);
    assert_eq!(summary.files_failed, 0);
    assert_eq!(summary.features_failed, 1);
    assert_eq!(summary.features_converted, 2);
    assert_eq!(summary.tiles.written, 2);
    assert!(summary.has_errors());

    let objects = read_tile(&scratch.tile("tiles_1000_2000.1.bin"));
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id, "b1");
}

#[test]
fn test_startup_errors_are_fatal() {
    let scratch = Scratch::new("fatal");

    let err = Pipeline::new(scratch.config("")).run().unwrap_err();
    assert!(err.is_fatal());
    assert!(!scratch.root.join("out").exists());

    let mut config = scratch.config("");
    config.city_object_filters.clear();
    assert!(Pipeline::new(config).run().unwrap_err().is_fatal());
}

#[test]
fn test_cancelled_run_writes_nothing() {
    let scratch = Scratch::new("cancel");
    scratch.source("city.json", CITY);

    let pipeline = Pipeline::new(scratch.config(""));
    pipeline.cancel_token().cancel();
    let summary = pipeline.run().unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_processed, 0);
    assert!(!scratch.tile("tiles_0_0.1.bin").exists());
}
