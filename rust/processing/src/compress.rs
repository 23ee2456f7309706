// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Post-run compression of tile files.
//!
//! Every `*.{lod}.bin` file in the output directory gets a gzip sibling
//! `*.{lod}.bin.gz`. The uncompressed tiles stay, since later runs merge
//! into them.

use crate::error::Result;
use crate::progress::{CancelToken, CompressStats};
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Tile files of `lod` directly inside `dir`, sorted by name.
pub fn tile_files(dir: &Path, lod: f64) -> Result<Vec<PathBuf>> {
    let suffix = format!(".{lod}.bin");
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(&suffix))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Gzip one file next to itself and return the compressed path.
pub fn compress_file(path: &Path, level: u32) -> Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut input = BufReader::new(File::open(path)?);
    let output = BufWriter::new(File::create(&target)?);
    let mut encoder = GzEncoder::new(output, Compression::new(level.min(9)));
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(target)
}

/// Compress all tiles of `lod` in `dir` in parallel.
///
/// Failures are logged and counted; they never stop the pass.
pub fn compress_tiles(dir: &Path, lod: f64, level: u32, cancel: &CancelToken) -> CompressStats {
    let files = match tile_files(dir, lod) {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot list tiles for compression");
            return CompressStats { compressed: 0, failed: 1 };
        }
    };

    let results: Vec<bool> = files
        .par_iter()
        .filter_map(|path| {
            if cancel.is_cancelled() {
                return None;
            }
            match compress_file(path, level) {
                Ok(_) => Some(true),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to compress tile");
                    Some(false)
                }
            }
        })
        .collect();

    let compressed = results.iter().filter(|ok| **ok).count();
    let stats = CompressStats {
        compressed,
        failed: results.len() - compressed,
    };
    tracing::info!(
        dir = %dir.display(),
        compressed = stats.compressed,
        failed = stats.failed,
        "Compressed tiles"
    );
    stats
}
