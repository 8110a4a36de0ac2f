// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Ordered predicate catalog.
//!
//! One compiled predicate per input record, in input order. Order is the
//! match priority: the first predicate that accepts a value wins.

use log::debug;
use opsweep_common::{TableEntry, ADDRESS_BITS, MAX_CATALOG_ENTRIES, NO_MATCH};
use thiserror::Error;

use crate::diagram::{self, DiagramError, Predicate};

/// Errors from catalog construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("record {index}: {source}")]
    Diagram {
        index: usize,
        #[source]
        source: DiagramError,
    },

    #[error("catalog has {0} entries, a table can index at most {MAX_CATALOG_ENTRIES}")]
    TooManyEntries(usize),
}

/// Immutable, ordered collection of compiled predicates.
#[derive(Debug, Clone, Default)]
pub struct PredicateCatalog {
    entries: Box<[Predicate]>,
}

impl PredicateCatalog {
    /// Compile every diagram, failing on the first malformed one.
    pub fn compile<'a, I>(diagrams: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = Vec::new();
        for (index, text) in diagrams.into_iter().enumerate() {
            let compiled = diagram::compile(text)
                .map_err(|source| CatalogError::Diagram { index, source })?;
            if compiled.width != ADDRESS_BITS {
                debug!("record {}: diagram is {} bits wide", index, compiled.width);
            }
            entries.push(compiled.predicate);
        }
        Self::from_predicates(entries)
    }

    /// Wrap already compiled predicates, keeping their order.
    pub fn from_predicates(entries: Vec<Predicate>) -> Result<Self, CatalogError> {
        if entries.len() > MAX_CATALOG_ENTRIES {
            return Err(CatalogError::TooManyEntries(entries.len()));
        }
        Ok(Self { entries: entries.into_boxed_slice() })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Predicate> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Predicate> {
        self.entries.iter()
    }

    /// Index of the first predicate accepting `raw`.
    #[inline]
    pub fn first_match(&self, raw: u32) -> Option<usize> {
        self.entries.iter().position(|p| p.matches(raw))
    }

    /// Table entry for `raw`: the first-match index or [`NO_MATCH`].
    #[inline]
    pub fn classify(&self, raw: u32) -> TableEntry {
        match self.first_match(raw) {
            // Construction caps the length, so the index fits.
            Some(idx) => idx as TableEntry,
            None => NO_MATCH,
        }
    }
}

impl<'a> IntoIterator for &'a PredicateCatalog {
    type Item = &'a Predicate;
    type IntoIter = std::slice::Iter<'a, Predicate>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
