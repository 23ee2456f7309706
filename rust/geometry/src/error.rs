// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during geometry processing
#[derive(Error, Debug)]
pub enum Error {
    #[error("Triangulation failed: {0}")]
    TriangulationError(String),

    /// Index or attribute arrays of a mesh do not line up.
    #[error("Invalid mesh {id}: {reason}")]
    InvalidMesh { id: String, reason: String },

    #[error("Empty mesh: {0}")]
    EmptyMesh(String),

    #[error("Feature reader error: {0}")]
    CoreError(#[from] tilebake_core::Error),
}
