// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Height outlier clamping.

use crate::mesh::{MeshState, SubObject};

/// Allowed vertical range, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeRange {
    pub ceiling: f64,
    pub floor: f64,
}

impl SpikeRange {
    pub fn new(ceiling: f64, floor: f64) -> Self {
        Self { ceiling, floor }
    }

    #[inline]
    pub fn contains(&self, z: f64) -> bool {
        z >= self.floor && z <= self.ceiling
    }
}

/// Snap out-of-range heights to the mean in-range height.
///
/// Falls back to the midpoint of the range when no vertex is in range.
/// Topology is untouched. Returns the number of vertices moved.
pub fn clamp_spikes(sub: &mut SubObject, range: &SpikeRange) -> usize {
    let (sum, count) = sub
        .vertices
        .iter()
        .filter(|v| range.contains(v.z))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v.z, count + 1));

    if count == sub.vertices.len() {
        return 0;
    }

    let height = if count > 0 {
        sum / count as f64
    } else {
        (range.ceiling + range.floor) * 0.5
    };

    let mut moved = 0;
    for v in sub.vertices.iter_mut().filter(|v| !range.contains(v.z)) {
        v.z = height;
        moved += 1;
    }

    tracing::debug!(id = %sub.id, moved, height, "Clamped spike vertices");
    sub.state = MeshState::SpikeClipped;
    moved
}
