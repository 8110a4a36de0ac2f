// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Classification table file codec.
//!
//! The file is a flat run of `2^bits` little-endian `i16` entries with no
//! header: entry `n` lives at byte offset `2 * n`. A full 32-bit table is
//! exactly 8 GiB, so both directions stream in chunks and keep the
//! index/offset order intact.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info};
use opsweep_common::{table_len, TableEntry, ENTRY_SIZE};
use opsweep_core::table::{self, ClassificationTable};
use thiserror::Error;

/// I/O buffer size for table files.
const IO_BUFFER_SIZE: usize = 1 << 20;

/// Errors from table encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Table(#[from] table::TableError),

    #[error("table file is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("table ended after {read} of {expected} entries")]
    Truncated { read: u64, expected: u64 },

    #[error("table overflow: {extra} entries past the {expected}-entry table")]
    Overflow { extra: u64, expected: u64 },
}

/// Byte length of a table file for a `bits`-wide space.
pub fn file_size(bits: u32) -> u64 {
    table_len(bits) * ENTRY_SIZE as u64
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streams table entries to a sink in index order.
pub struct TableWriter<W: Write> {
    inner: W,
    scratch: Vec<u8>,
    written: u64,
    expected: u64,
}

impl TableWriter<BufWriter<File>> {
    /// Create (or truncate) a table file.
    pub fn create(path: &Path, bits: u32) -> Result<Self, CodecError> {
        let file = File::create(path)?;
        info!("Writing {}-bit table to {}", bits, path.display());
        Self::new(BufWriter::with_capacity(IO_BUFFER_SIZE, file), bits)
    }
}

impl<W: Write> TableWriter<W> {
    pub fn new(inner: W, bits: u32) -> Result<Self, CodecError> {
        table::check_width(bits)?;
        Ok(Self {
            inner,
            scratch: Vec::new(),
            written: 0,
            expected: table_len(bits),
        })
    }

    /// Append the next run of entries.
    pub fn write_chunk(&mut self, entries: &[TableEntry]) -> Result<(), CodecError> {
        let after = self.written + entries.len() as u64;
        if after > self.expected {
            return Err(CodecError::Overflow {
                extra: after - self.expected,
                expected: self.expected,
            });
        }

        self.scratch.resize(entries.len() * ENTRY_SIZE, 0);
        LittleEndian::write_i16_into(entries, &mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        self.written = after;
        Ok(())
    }

    /// Entries written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the sink; fails if the table is incomplete.
    pub fn finish(mut self) -> Result<W, CodecError> {
        if self.written != self.expected {
            return Err(CodecError::Truncated {
                read: self.written,
                expected: self.expected,
            });
        }
        self.inner.flush()?;
        debug!("Table complete: {} entries", self.written);
        Ok(self.inner)
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Streams table entries back in index order.
pub struct TableReader<R: Read> {
    inner: R,
    read: u64,
    expected: u64,
}

impl TableReader<BufReader<File>> {
    /// Open a table file, checking its size against `bits`.
    pub fn open(path: &Path, bits: u32) -> Result<Self, CodecError> {
        table::check_width(bits)?;
        let file = File::open(path)?;
        let actual = file.metadata()?.len();
        let expected = file_size(bits);
        if actual != expected {
            return Err(CodecError::SizeMismatch { expected, actual });
        }
        info!("Reading {}-bit table from {}", bits, path.display());
        Self::new(BufReader::with_capacity(IO_BUFFER_SIZE, file), bits)
    }
}

impl<R: Read> TableReader<R> {
    pub fn new(inner: R, bits: u32) -> Result<Self, CodecError> {
        table::check_width(bits)?;
        Ok(Self {
            inner,
            read: 0,
            expected: table_len(bits),
        })
    }

    /// Entries not yet read.
    pub fn remaining(&self) -> u64 {
        self.expected - self.read
    }

    /// Read up to `max` entries into `buf` (replacing its contents).
    ///
    /// Returns `false` once the table is exhausted.
    pub fn read_chunk(&mut self, buf: &mut Vec<TableEntry>, max: usize) -> Result<bool, CodecError> {
        let len = self.remaining().min(max as u64) as usize;
        buf.clear();
        if len == 0 {
            return Ok(false);
        }

        buf.resize(len, 0);
        self.inner
            .read_i16_into::<LittleEndian>(buf)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                    read: self.read,
                    expected: self.expected,
                },
                _ => CodecError::Io(e),
            })?;
        self.read += len as u64;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Whole-table helpers
// ---------------------------------------------------------------------------

// These hold the whole table in memory; a 32-bit table is 8 GiB, so real
// runs go through `TableWriter`/`TableReader`.

/// Encode a whole in-memory table.
pub fn encode_table<W: Write>(out: W, table: &ClassificationTable) -> Result<W, CodecError> {
    let mut writer = TableWriter::new(out, table.bits())?;
    for chunk in table.entries().chunks(IO_BUFFER_SIZE / ENTRY_SIZE) {
        writer.write_chunk(chunk)?;
    }
    writer.finish()
}

/// Decode a whole table of `2^bits` entries. Meant for toy widths.
pub fn decode_table<R: Read>(input: R, bits: u32) -> Result<ClassificationTable, CodecError> {
    let mut reader = TableReader::new(input, bits)?;
    let mut entries = vec![0; table_len(bits) as usize];
    reader
        .inner
        .read_i16_into::<LittleEndian>(&mut entries)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated {
                read: 0,
                expected: reader.expected,
            },
            _ => CodecError::Io(e),
        })?;
    Ok(ClassificationTable::from_entries(bits, entries)?)
}

/// Write a small in-memory table to `path`.
pub fn write_table(path: &Path, table: &ClassificationTable) -> Result<(), CodecError> {
    let file = File::create(path)?;
    encode_table(BufWriter::with_capacity(IO_BUFFER_SIZE, file), table)?;
    Ok(())
}

/// Read a small table back from `path`.
pub fn read_table(path: &Path, bits: u32) -> Result<ClassificationTable, CodecError> {
    let reader = TableReader::open(path, bits)?;
    decode_table(reader.inner, bits)
}
