// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Instruction records.
//!
//! A record is one candidate encoding: where it came from, its mnemonic,
//! its coarse instruction class and its bit-diagram. Records travel as a
//! JSON array whose order is the match priority.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or writing records.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed records JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One extracted encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    /// Source document file name.
    #[serde(default, alias = "file")]
    pub file: String,
    /// Instruction mnemonic.
    #[serde(default, alias = "name")]
    pub name: String,
    /// Encoding class id within the document (e.g. `iclass_sf`).
    #[serde(default, rename = "IClass", alias = "iclass")]
    pub iclass: String,
    #[serde(default, alias = "path")]
    pub path: String,
    /// Comma-separated architecture variants, empty for the base ISA.
    #[serde(default, alias = "variants")]
    pub variants: String,
    #[serde(default, alias = "features")]
    pub features: String,
    /// Coarse class label (`general`, `fpsimd`, ...).
    #[serde(alias = "instr_class", alias = "instrclass")]
    pub instr_class: String,
    #[serde(alias = "reg_diagram", alias = "regdiagram")]
    pub reg_diagram: String,
}

pub fn parse_records(json: &str) -> Result<Vec<Record>, RecordError> {
    Ok(serde_json::from_str(json)?)
}

/// Load the record list from a JSON file.
pub fn load_records(path: &Path) -> Result<Vec<Record>, RecordError> {
    let text = fs::read_to_string(path)?;
    let records = parse_records(&text)?;
    log::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Write records as pretty-printed JSON.
pub fn write_records<W: Write>(mut out: W, records: &[Record]) -> Result<(), RecordError> {
    serde_json::to_writer_pretty(&mut out, records)?;
    writeln!(out)?;
    Ok(())
}
