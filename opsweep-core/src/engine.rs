// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exhaustive classification sweep.
//!
//! The value range is split into one contiguous partition per worker. Each
//! worker owns a disjoint `&mut` slice of the output buffer, so no locking is
//! needed; the scope joins every worker before the buffer is handed on.

use std::ops::Range;
use std::thread;

use log::{debug, info};
use opsweep_common::{table_len, TableEntry, NO_MATCH};

use crate::catalog::PredicateCatalog;
use crate::table::{check_width, ClassificationTable, TableError};

/// Split `len` items into at most `parts` contiguous ranges whose sizes
/// differ by at most one. Never returns an empty list.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.clamp(1, len.max(1));
    let base = len / parts;
    let rem = len % parts;

    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < rem);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Parallel first-match classifier over a [`PredicateCatalog`].
pub struct ClassificationEngine<'a> {
    catalog: &'a PredicateCatalog,
    workers: usize,
    progress_interval: u64,
}

impl<'a> ClassificationEngine<'a> {
    /// Engine with one worker per available processing unit.
    pub fn new(catalog: &'a PredicateCatalog) -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            catalog,
            workers,
            progress_interval: 0,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Have worker 0 log its progress every `interval` values (0 = never).
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Classify values `base..base + out.len()` into `out`.
    ///
    /// `base + out.len()` must not exceed `2^32`.
    pub fn classify_range(&self, base: u64, out: &mut [TableEntry]) {
        let end = base + out.len() as u64;
        self.classify_window(base, out, end);
    }

    /// Classify one window of a sweep covering `0..total`.
    fn classify_window(&self, base: u64, out: &mut [TableEntry], total: u64) {
        debug_assert!(base + out.len() as u64 <= table_len(32));

        let ranges = partition(out.len(), self.workers);
        let catalog = self.catalog;
        let progress = Progress {
            interval: self.progress_interval,
            window_base: base,
            window_len: out.len() as u64,
            total,
        };

        thread::scope(|s| {
            let mut rest = out;
            for (worker, range) in ranges.into_iter().enumerate() {
                let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(range.len());
                rest = tail;
                let start = base + range.start as u64;
                s.spawn(move || sweep_partition(catalog, worker, start, chunk, progress));
            }
        });
    }

    /// Build a whole in-memory table for a `bits`-wide value space.
    ///
    /// The table is `2^bits` entries; use [`Self::sweep_to`] at full width.
    pub fn sweep(&self, bits: u32) -> Result<ClassificationTable, TableError> {
        let mut table = ClassificationTable::new(bits)?;
        info!(
            "Sweeping {} values against {} predicates on {} workers",
            table.len(),
            self.catalog.len(),
            self.workers
        );
        let total = table.len() as u64;
        self.classify_window(0, table.entries_mut(), total);
        Ok(table)
    }

    /// Sweep a `bits`-wide space in windows of `window` entries, handing each
    /// finished window to `sink` in increasing order with its base value.
    ///
    /// Only one window is resident at a time.
    pub fn sweep_to<F, E>(&self, bits: u32, window: usize, mut sink: F) -> Result<(), E>
    where
        F: FnMut(u64, &[TableEntry]) -> Result<(), E>,
        E: From<TableError>,
    {
        check_width(bits)?;
        let total = table_len(bits);
        let window = (window.max(1) as u64).min(total) as usize;
        let windows = total.div_ceil(window as u64);

        info!(
            "Sweeping {} values against {} predicates on {} workers ({} windows)",
            total,
            self.catalog.len(),
            self.workers,
            windows
        );

        let mut buf = vec![NO_MATCH; window];
        let mut base = 0u64;
        let mut index = 0u64;
        while base < total {
            let len = (total - base).min(window as u64) as usize;
            let chunk = &mut buf[..len];
            self.classify_window(base, chunk, total);
            index += 1;
            debug!("Window {}/{} done (base 0x{:08X})", index, windows, base);
            sink(base, chunk)?;
            base += len as u64;
        }
        Ok(())
    }
}

/// Where a window sits in the whole sweep, for worker 0's reports.
#[derive(Debug, Clone, Copy)]
struct Progress {
    interval: u64,
    window_base: u64,
    window_len: u64,
    total: u64,
}

impl Progress {
    /// Overall completion after `done` of `len` values of worker 0's slice,
    /// taking the other workers to be equally far into theirs.
    fn percent(&self, done: usize, len: usize) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let frac = if len == 0 { 1.0 } else { done as f64 / len as f64 };
        (self.window_base as f64 + frac * self.window_len as f64) / self.total as f64 * 100.0
    }
}

fn sweep_partition(
    catalog: &PredicateCatalog,
    worker: usize,
    start: u64,
    out: &mut [TableEntry],
    progress: Progress,
) {
    let report = worker == 0 && progress.interval != 0;
    let len = out.len();

    for (i, slot) in out.iter_mut().enumerate() {
        if report && i as u64 % progress.interval == 0 {
            info!("{:.1}%", progress.percent(i, len));
        }
        *slot = catalog.classify((start + i as u64) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_expected(v: u32) -> TableEntry {
        if v & 0b10 != 0 {
            0
        } else if v & 0b01 != 0 {
            1
        } else {
            NO_MATCH
        }
    }

    #[test]
    fn test_partition_even() {
        assert_eq!(partition(16, 4), vec![0..4, 4..8, 8..12, 12..16]);
    }

    #[test]
    fn test_partition_remainder() {
        let parts = partition(10, 3);
        assert_eq!(parts, vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_partition_more_workers_than_items() {
        assert_eq!(partition(2, 8), vec![0..1, 1..2]);
        assert_eq!(partition(0, 4), vec![0..0]);
        assert_eq!(partition(5, 0), vec![0..5]);
    }

    #[test]
    fn test_toy_space_end_to_end() {
        let catalog = PredicateCatalog::compile(["1x", "x1"]).unwrap();
        let table = ClassificationEngine::new(&catalog)
            .with_workers(3)
            .sweep(4)
            .unwrap();

        assert_eq!(table.len(), 16);
        for v in 0..16u32 {
            assert_eq!(table.get(v), Some(toy_expected(v)), "value {v}");
        }
        // Matches both: the earlier record wins.
        assert_eq!(table.get(0b11), Some(0));
        // Matches neither.
        assert_eq!(table.get(0b00), Some(NO_MATCH));
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let catalog = PredicateCatalog::compile(["1x1x", "xx11", "0xxx"]).unwrap();
        let single = ClassificationEngine::new(&catalog)
            .with_workers(1)
            .sweep(8)
            .unwrap();
        for workers in [2, 3, 7, 64, 1000] {
            let many = ClassificationEngine::new(&catalog)
                .with_workers(workers)
                .sweep(8)
                .unwrap();
            assert_eq!(single, many, "workers={workers}");
        }
    }

    #[test]
    fn test_classify_range_with_base() {
        let catalog = PredicateCatalog::compile(["1|xxxxxxxx"]).unwrap();
        let engine = ClassificationEngine::new(&catalog).with_workers(2);

        let mut out = vec![0; 4];
        engine.classify_range(0x1FE, &mut out);
        assert_eq!(out, vec![0, 0, NO_MATCH, NO_MATCH]);
    }

    #[test]
    fn test_streamed_sweep_matches_in_memory() {
        let catalog = PredicateCatalog::compile(["11xx", "x0x1", "xx1x"]).unwrap();
        let engine = ClassificationEngine::new(&catalog)
            .with_workers(4)
            .with_progress_interval(7);

        let whole = engine.sweep(10).unwrap();

        let mut bases = Vec::new();
        let mut streamed = Vec::new();
        engine
            .sweep_to(10, 300, |base, window| {
                bases.push(base);
                streamed.extend_from_slice(window);
                Ok::<(), TableError>(())
            })
            .unwrap();

        assert_eq!(bases, vec![0, 300, 600, 900]);
        assert_eq!(streamed, whole.entries());
    }

    #[test]
    fn test_progress_is_overall() {
        let window = |base| Progress {
            interval: 1,
            window_base: base,
            window_len: 256,
            total: 1024,
        };
        assert_eq!(window(0).percent(0, 64), 0.0);
        assert_eq!(window(0).percent(32, 64), 12.5);
        // A later window starts where the previous one ended.
        assert_eq!(window(256).percent(0, 64), 25.0);
        assert_eq!(window(768).percent(64, 64), 100.0);
        assert_eq!(window(512).percent(0, 0), 75.0);
    }

    #[test]
    fn test_sink_error_stops_sweep() {
        let catalog = PredicateCatalog::compile(["1"]).unwrap();
        let engine = ClassificationEngine::new(&catalog);

        let mut calls = 0;
        let result = engine.sweep_to(6, 16, |_, _| {
            calls += 1;
            Err(TableError::UnsupportedWidth(99))
        });
        assert_eq!(result, Err(TableError::UnsupportedWidth(99)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_sweep_rejects_wide_space() {
        let catalog = PredicateCatalog::default();
        let engine = ClassificationEngine::new(&catalog);
        assert!(engine.sweep(40).is_err());
        let res = engine.sweep_to(40, 16, |_, _| Ok::<(), TableError>(()));
        assert_eq!(res, Err(TableError::UnsupportedWidth(40)));
    }
}
