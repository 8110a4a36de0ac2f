// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// One classification table entry: a catalog index, or [`NO_MATCH`].
pub type TableEntry = i16;

/// Sentinel stored for values no catalog predicate matches.
pub const NO_MATCH: TableEntry = -1;

/// Width of the classified value space in bits.
pub const ADDRESS_BITS: u32 = 32;

/// Number of entries in a density block.
pub const BLOCK_SIZE: usize = 256;

/// Largest catalog an `i16` table can index (indices `0..=i16::MAX`).
pub const MAX_CATALOG_ENTRIES: usize = TableEntry::MAX as usize + 1;

/// Serialized size of one table entry in bytes.
pub const ENTRY_SIZE: usize = std::mem::size_of::<TableEntry>();

/// Number of entries in a table covering `bits` bits of value space.
///
/// `bits` must be at most [`ADDRESS_BITS`].
#[inline]
pub const fn table_len(bits: u32) -> u64 {
    1u64 << bits
}
