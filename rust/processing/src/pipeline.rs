// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline scheduler
//!
//! Source files are handled one after another. While the features of one
//! file are converted in parallel, the next file is parsed on the other arm of
//! a `rayon::join`. Once a file's features are done its SubObjects are
//! bucketed into tiles, merged with tiles of earlier runs and written.

use crate::codec::{BinaryTileCodec, TileCodec};
use crate::compress::compress_tiles;
use crate::config::{ConfigFile, IdConflictPolicy, TilingMethod};
use crate::convert::{Conversion, Converter};
use crate::error::{Error, Result};
use crate::progress::{CancelToken, ExportStats, Progress, ProgressSnapshot, RunSummary};
use crate::tile::{output_dir, Tile, TileAssembler};
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tilebake_core::{CityDocument, FeatureOutcome, FeatureQuery, ReaderSettings};
use tilebake_geometry::{MeshProcessor, SubObject};

/// Source pattern used when the source path is a directory.
pub const DEFAULT_SOURCE_PATTERN: &str = "*.json";

/// Features between two progress lines.
const REPORT_EVERY: usize = 1000;

/// Runs a whole bake as described by one [`ConfigFile`].
pub struct Pipeline<C: TileCodec = BinaryTileCodec> {
    config: ConfigFile,
    converter: Converter,
    processor: MeshProcessor,
    assembler: TileAssembler,
    codec: C,
    cancel: CancelToken,
}

impl Pipeline<BinaryTileCodec> {
    pub fn new(config: ConfigFile) -> Self {
        Self::with_codec(config, BinaryTileCodec::new())
    }
}

impl<C: TileCodec> Pipeline<C> {
    pub fn with_codec(config: ConfigFile, codec: C) -> Self {
        let mut processor = MeshProcessor::new(config.mesh_settings());
        if let Some(range) = config.spike_range() {
            processor = processor.with_spike_range(range);
        }
        if config.tiling_method == TilingMethod::Tiled {
            processor = processor.with_tiling(config.tile_size);
        }

        Self {
            converter: Converter::from_config(&config),
            assembler: TileAssembler::new(config.tile_size, config.output_folder.clone(), config.lod),
            processor,
            codec,
            cancel: CancelToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Handle for stopping the run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Convert every source file, then compress if configured.
    ///
    /// Only startup problems are returned as errors. Anything that goes wrong
    /// with a single file, feature or tile is logged and counted in the
    /// summary.
    pub fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        self.config.validate()?;

        let files = discover_sources(&self.config.source_folder)?;
        let out_dir = output_dir(&self.config.output_folder);
        std::fs::create_dir_all(&out_dir)?;

        tracing::info!(
            files = files.len(),
            source = %self.config.source_folder,
            output = %self.config.output_folder,
            lod = self.config.lod,
            tiling = ?self.config.tiling_method,
            "Starting bake"
        );

        let settings = self.config.reader_settings();
        let mut summary = RunSummary::default();
        let mut next = files.first().map(|path| open_document(path, settings));

        for (index, path) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(current) = next.take() else {
                break;
            };

            let upcoming = files.get(index + 1);
            let (outcome, prefetched) = rayon::join(
                || current.and_then(|doc| self.process_document(path, &doc)),
                || upcoming.map(|path| open_document(path, settings)),
            );
            next = prefetched;

            match outcome {
                Ok((features, tiles)) => summary.add_file(&features, &tiles),
                Err(Error::Cancelled) => break,
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "Skipping source file");
                    summary.files_failed += 1;
                }
            }
        }

        summary.cancelled = self.cancel.is_cancelled();
        if self.config.brotli_compression && !summary.cancelled {
            summary.compression = compress_tiles(&out_dir, self.config.lod, self.config.compression_level, &self.cancel);
        }

        summary.elapsed = started.elapsed();
        summary.log();
        Ok(summary)
    }

    /// Convert all features of one document and write its tiles.
    ///
    /// A cancelled run stops before any tile is touched, so no tile file ever
    /// holds half a source file.
    fn process_document(&self, path: &Path, doc: &CityDocument) -> Result<(ProgressSnapshot, ExportStats)> {
        let query = self.config.feature_query();
        let roots = doc.root_keys();
        let total = roots.len();
        let progress = Progress::new();

        let sub_objects: Vec<SubObject> = roots
            .par_iter()
            .flat_map_iter(|key| {
                if self.cancel.is_cancelled() {
                    return Vec::new();
                }
                let pieces = self.process_feature(doc, key, &query, &progress);
                Progress::inc(&progress.done);
                progress.report_every(REPORT_EVERY, total);
                pieces
            })
            .collect();

        if self.cancel.is_cancelled() {
            tracing::warn!(file = %path.display(), "Cancelled before export");
            return Err(Error::Cancelled);
        }

        let tiles = self.assembler.bucket(sub_objects);
        let tile_count = tiles.len();
        let export = self.export_tiles(tiles, &progress);
        let features = progress.snapshot();

        tracing::info!(
            file = %path.display(),
            features = total,
            skipped = features.skipped,
            failed = features.failed,
            sub_objects = features.emitted,
            tiles = tile_count,
            written = export.written,
            "Converted source file"
        );
        Ok((features, export))
    }

    /// Load, triangulate and finish one root feature.
    ///
    /// Never fails: problems are logged and the feature yields nothing.
    fn process_feature(&self, doc: &CityDocument, key: &str, query: &FeatureQuery, progress: &Progress) -> Vec<SubObject> {
        Progress::inc(&progress.parsing);
        let loaded = doc.load_feature_by_key(key, query);
        Progress::dec(&progress.parsing);

        let feature = match loaded {
            Ok(FeatureOutcome::Loaded(feature)) => feature,
            Ok(FeatureOutcome::Filtered { feature_type, .. }) => {
                tracing::trace!(key, feature_type = %feature_type, "Filtered out");
                Progress::inc(&progress.skipped);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to read feature");
                Progress::inc(&progress.failed);
                return Vec::new();
            }
        };
        Progress::add(&progress.warnings, feature.dropped_holes);

        let (sub, stats) = match guarded(|| self.converter.convert(&feature)) {
            Ok(Conversion::Converted { sub, stats }) => (sub, stats),
            Ok(Conversion::NoFilter) | Ok(Conversion::NoGeometry) => {
                tracing::debug!(key, feature_type = %feature.feature_type, "No geometry to convert");
                Progress::inc(&progress.skipped);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to convert feature");
                Progress::inc(&progress.failed);
                return Vec::new();
            }
        };
        Progress::add(&progress.warnings, stats.skipped);

        Progress::inc(&progress.simplifying);
        let finished = guarded(|| Ok(self.processor.finalize(sub)?));
        Progress::dec(&progress.simplifying);

        match finished {
            Ok(pieces) => {
                Progress::add(&progress.emitted, pieces.len());
                pieces
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Dropping invalid mesh");
                Progress::inc(&progress.failed);
                Vec::new()
            }
        }
    }

    fn export_tiles(&self, tiles: Vec<Tile>, progress: &Progress) -> ExportStats {
        let policy = self.config.conflict_policy();
        let include_uvs = self.config.export_uv_coordinates;

        let outcomes: Vec<TileOutcome> = tiles
            .into_par_iter()
            .map(|mut tile| {
                Progress::inc(&progress.tiling);
                let outcome = self.export_tile(&mut tile, policy, include_uvs);
                Progress::dec(&progress.tiling);
                outcome
            })
            .collect();

        let mut stats = ExportStats::default();
        for outcome in outcomes {
            match outcome {
                TileOutcome::Written { merged } => {
                    stats.written += 1;
                    stats.merged += merged;
                }
                TileOutcome::Empty => stats.skipped_empty += 1,
                TileOutcome::InvalidPath => stats.skipped_invalid_path += 1,
                TileOutcome::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Merge `tile` with its file from earlier runs and write it.
    ///
    /// A tile whose existing file cannot be read is left alone rather than
    /// overwritten.
    fn export_tile(&self, tile: &mut Tile, policy: IdConflictPolicy, include_uvs: bool) -> TileOutcome {
        if !tile.has_valid_path() {
            tracing::warn!(path = %tile.file_path, objects = tile.sub_objects.len(), "Skipping tile with invalid path");
            return TileOutcome::InvalidPath;
        }
        if tile.is_empty() {
            return TileOutcome::Empty;
        }

        let merged = match self.codec.import(tile, policy) {
            Ok(merged) => merged,
            Err(e) => {
                tracing::warn!(path = %tile.file_path, error = %e, "Cannot read existing tile");
                return TileOutcome::Failed;
            }
        };

        match self.codec.export(tile, include_uvs) {
            Ok(()) => TileOutcome::Written { merged },
            Err(e) => {
                tracing::warn!(path = %tile.file_path, error = %e, "Failed to write tile");
                TileOutcome::Failed
            }
        }
    }
}

/// Run one feature stage, turning a panic in it into an error for that
/// feature alone.
pub(crate) fn guarded<T>(stage: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(stage)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::Panicked(message))
        }
    }
}

enum TileOutcome {
    Written { merged: usize },
    Empty,
    InvalidPath,
    Failed,
}

fn open_document(path: &Path, settings: ReaderSettings) -> Result<CityDocument> {
    let doc = CityDocument::open(path, settings)?;
    let meta = doc.metadata_summary();
    tracing::info!(
        file = %path.display(),
        version = meta.version.as_deref().unwrap_or("?"),
        objects = meta.object_count,
        vertices = meta.vertex_count,
        "Parsed source file"
    );
    Ok(doc)
}

/// Source files named by `source`, sorted by path.
///
/// `source` is a directory (all `*.json` files in it), a single file, or a
/// directory followed by a file name pattern with `*` and `?` wildcards.
pub fn discover_sources(source: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(source);
    let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");

    let (dir, pattern) = if path.is_dir() {
        (path.to_path_buf(), DEFAULT_SOURCE_PATTERN.to_string())
    } else if file_name.contains(['*', '?']) {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (dir, file_name.to_string())
    } else if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    } else {
        return Err(Error::SourceNotFound(path.to_path_buf()));
    };

    if !dir.is_dir() {
        return Err(Error::SourceNotFound(dir));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| wildcard_match(&pattern, name))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(Error::NoSourceFiles { dir, pattern });
    }
    Ok(files)
}

/// Match `name` against a pattern where `*` is any run and `?` any one char.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            // Let the last star swallow one more char and retry.
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
