// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Tilebake Processing
//!
//! Turns a folder of CityJSON documents into binary mesh tiles.
//!
//! ## Overview
//!
//! - **Configuration**: JSON config file with CLI overrides
//! - **Conversion**: filter matching, identifiers and triangulation per feature
//! - **Tiling**: centroid bucketing and merging with tiles of earlier runs
//! - **Codec**: the `TBK1` binary tile format
//! - **Scheduling**: parallel feature fan-out with one-file read-ahead
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tilebake_processing::{ConfigFile, Pipeline};
//!
//! let config = ConfigFile::load("bake.json".as_ref())?;
//! let summary = Pipeline::new(config).run()?;
//! println!("{} tiles written", summary.tiles.written);
//! ```

pub mod codec;
pub mod compress;
pub mod config;
pub mod convert;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod tile;

pub use codec::{decode_tile, encode_tile, merge_objects, BinaryTileCodec, TileCodec};
pub use compress::{compress_file, compress_tiles, tile_files};
pub use config::{
    strip_trailing_commas, AttributeFilter, CityObjectFilter, ConfigFile, ConfigOverrides, IdConflictPolicy,
    TilingMethod, ValueToSubmesh,
};
pub use convert::{match_filter, Conversion, Converter, FilterMatch};
pub use error::{Error, Result};
pub use pipeline::{discover_sources, wildcard_match, Pipeline, DEFAULT_SOURCE_PATTERN};
pub use progress::{CancelToken, CompressStats, ExportStats, Progress, ProgressSnapshot, RunSummary};
pub use tile::{output_dir, tile_origin, tile_path, Tile, TileAssembler};
