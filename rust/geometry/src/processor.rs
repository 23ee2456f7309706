// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mesh Processor - per-feature mesh stages
//!
//! Runs a freshly triangulated [`SubObject`] through deduplication or
//! simplification, optional spike clamping and optional grid clipping.

use crate::dedup::deduplicate;
use crate::error::{Error, Result};
use crate::grid::clip_to_grid;
use crate::mesh::{MeshState, SubObject};
use crate::simplify::simplify;
use crate::spikes::{clamp_spikes, SpikeRange};
use crate::tolerance::MeshSettings;

/// Stateless mesh stage runner, shared by all feature tasks of a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshProcessor {
    pub settings: MeshSettings,
    /// Clamp heights outside this range
    pub spikes: Option<SpikeRange>,
    /// Split meshes along a grid of this cell size
    pub tile_size: Option<f64>,
}

impl MeshProcessor {
    pub fn new(settings: MeshSettings) -> Self {
        Self {
            settings,
            spikes: None,
            tile_size: None,
        }
    }

    pub fn with_spike_range(mut self, range: SpikeRange) -> Self {
        self.spikes = Some(range);
        self
    }

    pub fn with_tiling(mut self, tile_size: f64) -> Self {
        self.tile_size = Some(tile_size);
        self
    }

    /// Run every configured stage on `sub`.
    ///
    /// Simplifies when the mesh has a positive density target and
    /// deduplicates otherwise. Returns one mesh, or one per grid cell when
    /// tiling splits it. A mesh with a broken triangle list or no triangles
    /// is an error for this mesh only.
    pub fn finalize(&self, mut sub: SubObject) -> Result<Vec<SubObject>> {
        sub.validate()?;
        if sub.is_empty() {
            return Err(Error::EmptyMesh(sub.id));
        }

        if sub.max_vertices_per_square_meter > 0.0 {
            simplify(&mut sub, &self.settings);
        } else {
            deduplicate(&mut sub, &self.settings.merge);
        }

        if let Some(range) = &self.spikes {
            clamp_spikes(&mut sub, range);
        }

        sub.centroid = sub
            .compute_centroid()
            .ok_or_else(|| Error::EmptyMesh(sub.id.clone()))?;

        let mut pieces = match self.tile_size {
            Some(size) => clip_to_grid(&sub, size),
            None => Vec::new(),
        };
        if pieces.is_empty() {
            pieces.push(sub);
        }

        for piece in &mut pieces {
            piece.validate()?;
            piece.state = MeshState::Finalized;
        }
        Ok(pieces)
    }
}
