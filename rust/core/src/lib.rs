// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TileBake Core
//!
//! CityJSON reading for the TileBake pipeline.
//!
//! ## Overview
//!
//! - **Document**: typed top-level tables with the linear vertex transform
//!   applied once at load time
//! - **Features**: on-demand reading of one object (by index or key) at one
//!   LOD, with its children resolved into an owned tree
//! - **Surfaces**: outer ring, filtered holes, semantics and UVs aligned by
//!   position with the source arrays
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tilebake_core::{CityDocument, FeatureQuery, ReaderSettings};
//!
//! let doc = CityDocument::open(path, ReaderSettings::default())?;
//! let query = FeatureQuery::at_lod(2.2).with_types(["Building"]);
//! for index in 0..doc.feature_count() {
//!     if let Some(feature) = doc.load_feature_by_index(index, &query)?.into_feature() {
//!         println!("{}: {} surfaces", feature.key, feature.surfaces.len());
//!     }
//! }
//! ```

pub mod boundary;
pub mod document;
pub mod error;
pub mod feature;
pub mod rings;

pub use boundary::{lod_matches, parse_lod, BoundaryKind};
pub use document::{CityDocument, FeatureQuery, MetadataSummary, ReaderSettings, Transform};
pub use error::{Error, Result};
pub use feature::{find_semantic, Feature, FeatureOutcome, Semantic, Surface, TextureRef};
pub use rings::{horizontal_area, open_ring, ring_area};
