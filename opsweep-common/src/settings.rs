// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::types::{ADDRESS_BITS, BLOCK_SIZE};

/// Default instruction classes kept by the XML extractor.
pub const DEFAULT_CLASSES: &[&str] = &["general", "float", "fpsimd", "advsimd"];

/// Global run settings, populated from the config INI and CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    // Sweep
    /// Worker threads for the sweep; `None` means one per host processing unit.
    pub workers: Option<usize>,
    /// Worker 0 reports progress every this many values (0 disables it).
    pub progress_interval: u64,
    /// The table is swept and written in windows of `2^window_bits` entries.
    pub window_bits: u32,
    /// Width of the value space; 32 for real runs.
    pub address_bits: u32,

    // Table
    /// Entries per read when streaming a table back in.
    pub chunk_entries: usize,

    // Extract
    pub classes: Vec<String>,
    pub base_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: None,
            progress_interval: 200_000,
            window_bits: 28,
            address_bits: ADDRESS_BITS,
            chunk_entries: 1 << 20,
            classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            base_only: true,
        }
    }
}

impl Settings {
    /// Worker count to use, resolving `None` against the host.
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Sweep window length in entries, never larger than the table itself.
    pub fn window_entries(&self) -> usize {
        1usize << self.window_bits.min(self.address_bits)
    }

    /// Streaming chunk length rounded up to whole density blocks.
    pub fn block_aligned_chunk(&self) -> usize {
        self.chunk_entries.max(1).next_multiple_of(BLOCK_SIZE)
    }
}

/// Parse a comma-separated class list, dropping empty items.
pub fn parse_class_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an INI-style boolean (`1`/`true`/`yes`, `0`/`false`/`no`).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.address_bits, 32);
        assert_eq!(s.classes, vec!["general", "float", "fpsimd", "advsimd"]);
        assert!(s.base_only);
        assert!(s.effective_workers() >= 1);
    }

    #[test]
    fn test_explicit_workers() {
        let s = Settings {
            workers: Some(3),
            ..Settings::default()
        };
        assert_eq!(s.effective_workers(), 3);
    }

    #[test]
    fn test_window_clamped_to_table() {
        let s = Settings {
            address_bits: 4,
            window_bits: 28,
            ..Settings::default()
        };
        assert_eq!(s.window_entries(), 16);
    }

    #[test]
    fn test_chunk_rounds_to_blocks() {
        let s = Settings {
            chunk_entries: 300,
            ..Settings::default()
        };
        assert_eq!(s.block_aligned_chunk(), 512);

        let s = Settings {
            chunk_entries: 0,
            ..Settings::default()
        };
        assert_eq!(s.block_aligned_chunk(), 256);
    }

    #[test]
    fn test_parse_class_list() {
        assert_eq!(parse_class_list("general, sve,,"), vec!["general", "sve"]);
        assert!(parse_class_list("").is_empty());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
