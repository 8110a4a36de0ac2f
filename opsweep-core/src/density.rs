// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Density map over a classification table.
//!
//! The table is cut into blocks of [`BLOCK_SIZE`] entries. Every entry that
//! is neither [`NO_MATCH`] nor catalog index 0 is mapped to its record's
//! instruction class, the class to a small ordinal (assigned from 1 in
//! first-seen order), and the ordinals are summed per block. Blocks with a
//! non-zero sum are reported as `a.b.c.d score`, where the dotted quad is
//! the block's start value and the score is `sum / BLOCK_SIZE`.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use opsweep_common::{TableEntry, BLOCK_SIZE, NO_MATCH};
use thiserror::Error;

/// Catalog index treated as the unclassified baseline and never counted.
pub const BASELINE_INDEX: TableEntry = 0;

/// Errors from aggregation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DensityError {
    #[error("table entry {entry} at 0x{value:08X} has no matching record ({records} records loaded)")]
    UnknownRecord { value: u64, entry: TableEntry, records: usize },

    #[error("chunk fed after a partial block at 0x{0:08X}")]
    MisalignedChunk(u64),
}

// ---------------------------------------------------------------------------
// Class registry
// ---------------------------------------------------------------------------

/// Instruction-class label to ordinal, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    ordinals: HashMap<String, u32>,
    order: Vec<String>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal for `label`, assigning the next one on first sight.
    pub fn ordinal(&mut self, label: &str) -> u32 {
        if let Some(&ord) = self.ordinals.get(label) {
            return ord;
        }
        self.order.push(label.to_string());
        let ord = self.order.len() as u32;
        self.ordinals.insert(label.to_string(), ord);
        ord
    }

    pub fn get(&self, label: &str) -> Option<u32> {
        self.ordinals.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(label, ordinal)` pairs in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, label)| (label.as_str(), i as u32 + 1))
    }
}

impl fmt::Display for ClassRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (label, ord)) in self.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{label:?}: {ord}")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Block scores
// ---------------------------------------------------------------------------

/// Score of one density block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockScore {
    /// First value covered by the block.
    pub start: u32,
    /// Truncated average ordinal over the block.
    pub score: u64,
}

impl BlockScore {
    /// Block start rendered as a dotted quad (big-endian octets).
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }
}

impl fmt::Display for BlockScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.address(), self.score)
    }
}

/// End-of-pass diagnostics.
#[derive(Debug, Clone)]
pub struct DensitySummary {
    pub registry: ClassRegistry,
    /// Number of table entries consumed.
    pub entries: u64,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Incremental density aggregator.
///
/// Feed the table in order; every chunk except the last must be a whole
/// number of blocks.
pub struct DensityAggregator<'a> {
    labels: Vec<&'a str>,
    registry: ClassRegistry,
    entries: u64,
    partial: bool,
}

impl<'a> DensityAggregator<'a> {
    /// `labels[i]` is the instruction class of catalog record `i`.
    pub fn new<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            labels: labels.into_iter().collect(),
            registry: ClassRegistry::new(),
            entries: 0,
            partial: false,
        }
    }

    /// Aggregate the next chunk of the table.
    pub fn feed(&mut self, chunk: &[TableEntry]) -> Result<Vec<BlockScore>, DensityError> {
        if self.partial && !chunk.is_empty() {
            return Err(DensityError::MisalignedChunk(self.entries));
        }

        let mut scores = Vec::new();
        for block in chunk.chunks(BLOCK_SIZE) {
            let start = self.entries;
            let total = self.block_total(start, block)?;
            if total != 0 {
                scores.push(BlockScore {
                    start: start as u32,
                    score: total / BLOCK_SIZE as u64,
                });
            }
            self.entries += block.len() as u64;
            self.partial = block.len() != BLOCK_SIZE;
        }
        Ok(scores)
    }

    fn block_total(&mut self, start: u64, block: &[TableEntry]) -> Result<u64, DensityError> {
        let mut total = 0u64;
        for (i, &entry) in block.iter().enumerate() {
            if entry == NO_MATCH || entry == BASELINE_INDEX {
                continue;
            }
            let label = usize::try_from(entry)
                .ok()
                .and_then(|idx| self.labels.get(idx))
                .ok_or(DensityError::UnknownRecord {
                    value: start + i as u64,
                    entry,
                    records: self.labels.len(),
                })?;
            total += u64::from(self.registry.ordinal(label));
        }
        Ok(total)
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn finish(self) -> DensitySummary {
        DensitySummary {
            registry: self.registry,
            entries: self.entries,
        }
    }
}

/// Aggregate a whole in-memory table in one pass. Full-width tables are
/// streamed through [`DensityAggregator::feed`] instead.
pub fn aggregate<'a, I>(
    table: &[TableEntry],
    labels: I,
) -> Result<(Vec<BlockScore>, DensitySummary), DensityError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut agg = DensityAggregator::new(labels);
    let scores = agg.feed(table)?;
    Ok((scores, agg.finish()))
}
