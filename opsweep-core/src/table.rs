// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory classification table.
//!
//! A dense array with one entry per value of a `bits`-wide space, indexed by
//! the value itself. Allocated once at full size and never resized.

use opsweep_common::{table_len, TableEntry, ADDRESS_BITS, NO_MATCH};
use thiserror::Error;

/// Errors from table construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("value space of {0} bits is not supported (max {ADDRESS_BITS})")]
    UnsupportedWidth(u32),

    #[error("table for {bits} bits needs {expected} entries, got {actual}")]
    LengthMismatch { bits: u32, expected: u64, actual: u64 },
}

/// Dense table mapping each value to its first-matching catalog index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationTable {
    bits: u32,
    entries: Box<[TableEntry]>,
}

/// Reject value spaces wider than 32 bits.
pub fn check_width(bits: u32) -> Result<(), TableError> {
    if bits > ADDRESS_BITS {
        return Err(TableError::UnsupportedWidth(bits));
    }
    Ok(())
}

impl ClassificationTable {
    /// Table of `2^bits` entries, all [`NO_MATCH`].
    pub fn new(bits: u32) -> Result<Self, TableError> {
        check_width(bits)?;
        let len = table_len(bits) as usize;
        Ok(Self {
            bits,
            entries: vec![NO_MATCH; len].into_boxed_slice(),
        })
    }

    /// Wrap existing entries; the length must be exactly `2^bits`.
    pub fn from_entries(bits: u32, entries: Vec<TableEntry>) -> Result<Self, TableError> {
        check_width(bits)?;
        let expected = table_len(bits);
        if entries.len() as u64 != expected {
            return Err(TableError::LengthMismatch {
                bits,
                expected,
                actual: entries.len() as u64,
            });
        }
        Ok(Self { bits, entries: entries.into_boxed_slice() })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `value`, or `None` when it lies outside the table.
    pub fn get(&self, value: u32) -> Option<TableEntry> {
        self.entries.get(value as usize).copied()
    }

    pub fn entries(&self) -> &[TableEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [TableEntry] {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unclassified() {
        let table = ClassificationTable::new(4).unwrap();
        assert_eq!(table.len(), 16);
        assert!(table.entries().iter().all(|&e| e == NO_MATCH));
        assert_eq!(table.get(15), Some(NO_MATCH));
        assert_eq!(table.get(16), None);
    }

    #[test]
    fn test_from_entries_length() {
        assert!(ClassificationTable::from_entries(2, vec![0, 1, -1, 0]).is_ok());
        assert_eq!(
            ClassificationTable::from_entries(2, vec![0; 3]),
            Err(TableError::LengthMismatch { bits: 2, expected: 4, actual: 3 })
        );
    }

    #[test]
    fn test_width_limit() {
        assert_eq!(
            ClassificationTable::new(33).unwrap_err(),
            TableError::UnsupportedWidth(33)
        );
    }
}
