// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while baking tiles
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration JSON: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Source path does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("No \"{pattern}\" files found in {dir}")]
    NoSourceFiles { dir: PathBuf, pattern: String },

    #[error("Tile {path}: {reason}")]
    Codec { path: String, reason: String },

    #[error("Feature task panicked: {0}")]
    Panicked(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Feature reader error: {0}")]
    Core(#[from] tilebake_core::Error),

    #[error("Geometry error: {0}")]
    Geometry(#[from] tilebake_geometry::Error),
}

impl Error {
    pub(crate) fn codec(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Codec {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Startup problems that stop the run before any file is read.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigJson(_) | Error::InvalidConfig(_) | Error::SourceNotFound(_) | Error::NoSourceFiles { .. }
        )
    }
}
