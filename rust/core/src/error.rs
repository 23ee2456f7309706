// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for CityJSON reading.

use thiserror::Error;

/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading a CityJSON document or one of its features.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document has no `CityObjects` table.
    #[error("document has no CityObjects table")]
    MissingCityObjects,

    /// A feature key or index does not exist in the feature table.
    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    /// A feature entry is missing its `type` member.
    #[error("feature {0} has no type")]
    MissingType(String),

    /// A boundary references a vertex outside the vertex array.
    #[error("feature {key} references vertex {index}, but the document has {len} vertices")]
    InvalidVertexIndex { key: String, index: usize, len: usize },

    /// A child reference points back to one of its own ancestors.
    #[error("feature {0} is part of a parent/child cycle")]
    CyclicReference(String),

    /// A feature's geometry is structurally malformed.
    #[error("malformed geometry in {key}: {reason}")]
    MalformedGeometry { key: String, reason: String },
}
