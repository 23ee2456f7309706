// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Progress counters, cancellation and the run summary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag shared by all tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-file feature counters.
///
/// Updated from many tasks with relaxed atomics; only used for status output.
#[derive(Debug, Default)]
pub struct Progress {
    pub parsing: AtomicUsize,
    pub simplifying: AtomicUsize,
    pub tiling: AtomicUsize,
    pub done: AtomicUsize,
    pub skipped: AtomicUsize,
    pub failed: AtomicUsize,
    /// SubObjects produced
    pub emitted: AtomicUsize,
    /// Holes dropped and surfaces that failed to triangulate
    pub warnings: AtomicUsize,
}

/// Plain copy of [`Progress`] at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub parsing: usize,
    pub simplifying: usize,
    pub tiling: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
    pub emitted: usize,
    pub warnings: usize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn dec(counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        ProgressSnapshot {
            parsing: get(&self.parsing),
            simplifying: get(&self.simplifying),
            tiling: get(&self.tiling),
            done: get(&self.done),
            skipped: get(&self.skipped),
            failed: get(&self.failed),
            emitted: get(&self.emitted),
            warnings: get(&self.warnings),
        }
    }

    /// Log a status line every `every` finished features.
    pub fn report_every(&self, every: usize, total: usize) {
        let snapshot = self.snapshot();
        if every > 0 && snapshot.done > 0 && snapshot.done % every == 0 {
            tracing::info!(
                done = snapshot.done,
                total,
                skipped = snapshot.skipped,
                parsing = snapshot.parsing,
                simplifying = snapshot.simplifying,
                tiling = snapshot.tiling,
                "Converting features"
            );
        }
    }
}

/// Tile export counters of one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub written: usize,
    pub skipped_empty: usize,
    pub skipped_invalid_path: usize,
    pub failed: usize,
    /// Objects kept from tiles of earlier runs
    pub merged: usize,
}

/// Compression pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressStats {
    pub compressed: usize,
    pub failed: usize,
}

/// Totals of a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub files_processed: usize,
    pub files_failed: usize,
    pub features_converted: usize,
    pub features_filtered: usize,
    pub features_failed: usize,
    pub sub_objects: usize,
    pub tiles: ExportStats,
    pub compression: CompressStats,
    pub warnings: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Fold the counters of one converted file into the totals.
    pub fn add_file(&mut self, features: &ProgressSnapshot, tiles: &ExportStats) {
        self.files_processed += 1;
        self.features_converted += features.done.saturating_sub(features.skipped + features.failed);
        self.features_filtered += features.skipped;
        self.features_failed += features.failed;
        self.sub_objects += features.emitted;
        self.warnings += features.warnings;

        self.tiles.written += tiles.written;
        self.tiles.skipped_empty += tiles.skipped_empty;
        self.tiles.skipped_invalid_path += tiles.skipped_invalid_path;
        self.tiles.failed += tiles.failed;
        self.tiles.merged += tiles.merged;
    }

    /// Whether anything failed along the way; skips and warnings do not count.
    pub fn has_errors(&self) -> bool {
        self.files_failed > 0 || self.features_failed > 0 || self.tiles.failed > 0 || self.compression.failed > 0
    }

    pub fn log(&self) {
        tracing::info!(
            files = self.files_processed,
            files_failed = self.files_failed,
            features = self.features_converted,
            filtered = self.features_filtered,
            features_failed = self.features_failed,
            sub_objects = self.sub_objects,
            tiles_written = self.tiles.written,
            tiles_skipped = self.tiles.skipped_empty + self.tiles.skipped_invalid_path,
            tiles_failed = self.tiles.failed,
            compressed = self.compression.compressed,
            compress_failed = self.compression.failed,
            warnings = self.warnings,
            cancelled = self.cancelled,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Run complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_progress_counters() {
        let progress = Progress::new();
        Progress::inc(&progress.parsing);
        Progress::inc(&progress.done);
        Progress::dec(&progress.parsing);
        Progress::add(&progress.emitted, 4);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.parsing, 0);
        assert_eq!(snapshot.done, 1);
        assert_eq!(snapshot.emitted, 4);
    }

    #[test]
    fn test_summary_errors() {
        let mut summary = RunSummary::default();
        let features = ProgressSnapshot {
            done: 10,
            skipped: 3,
            emitted: 9,
            warnings: 2,
            ..Default::default()
        };
        let tiles = ExportStats {
            written: 4,
            skipped_empty: 1,
            ..Default::default()
        };
        summary.add_file(&features, &tiles);

        assert_eq!(summary.features_converted, 7);
        assert_eq!(summary.features_filtered, 3);
        assert!(!summary.has_errors());

        summary.tiles.failed = 1;
        assert!(summary.has_errors());
    }
}
