// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! ARM instruction XML extractor.
//!
//! Walks a directory of `instructionsection` documents and turns each
//! encoding class (`iclass`) into a [`Record`]. Only the pieces the
//! classifier needs are read: section/iclass docvars, architecture variants,
//! and the register diagram boxes.
//!
//! A register diagram box becomes `name=bits` (or bare `bits` when unnamed).
//! Empty cells are don't-cares and `colspan` repeats a cell. `(0)`/`(1)`
//! cells read as their digit. A cell holding `!= bits` turns the whole box
//! into `name!=bits`.
//!
//! The section's `ps_section` pseudocode is kept line by line together with
//! the shared-pseudocode links each line uses, which is what the behavioural
//! filters (branch, memory read/write, atomic, register writes) look at.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use opsweep_common::Settings;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;
use walkdir::WalkDir;

use crate::record::Record;

/// Errors from directory extraction. Documents that fail to parse are
/// skipped, not reported here.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Shared-pseudocode link of a branch.
pub const LINK_BRANCH: &str = "impl-shared.BranchTo.3";
/// Shared-pseudocode link of a memory read.
pub const LINK_MEM_READ: &str = "impl-aarch64.Mem.read.3";
/// Shared-pseudocode link of a memory write.
pub const LINK_MEM_WRITE: &str = "impl-aarch64.Mem.write.3";
/// Shared-pseudocode link of an atomic memory operation.
pub const LINK_MEM_ATOMIC: &str = "impl-aarch64.MemAtomic.4";
/// Shared-pseudocode link of a general-purpose register write.
pub const LINK_REG_WRITE: &str = "impl-aarch64.X.write.2";

/// The conditional branch section lists a single `B` mnemonic; the op table
/// wants one entry per condition.
pub const COND_BRANCH_FILE: &str = "b_cond.xml";
pub const COND_BRANCH_OPS: [&str; 16] = [
    "B_AL", "B_CC", "B_CS", "B_EQ", "B_GE", "B_GT", "B_HI", "B_LE", "B_LS", "B_LT", "B_MI",
    "B_NE", "B_NV", "B_PL", "B_VC", "B_VS",
];

/// Which sections to keep.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Instruction classes to keep; empty keeps everything.
    pub classes: Vec<String>,
    /// Drop sections whose encodings belong to an architecture extension.
    pub base_only: bool,
    /// Keep only branches.
    pub branch: bool,
    /// Keep only sections that read memory.
    pub reads_memory: bool,
    /// Keep only sections that write memory.
    pub writes_memory: bool,
    /// Keep only atomic memory operations.
    pub atomic: bool,
    /// Keep only sections that write no general-purpose register.
    pub no_register_writes: bool,
    /// Keep sections available at or before this architecture version
    /// (compared as strings, e.g. `ARMv8.2`).
    pub max_variant: Option<String>,
}

impl From<&Settings> for ExtractOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            classes: settings.classes.clone(),
            base_only: settings.base_only,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Docvars {
    mnemonic: Option<String>,
    instr_class: Option<String>,
}

impl Docvars {
    fn set(&mut self, key: &str, value: String) {
        match key {
            "mnemonic" => self.mnemonic = Some(value),
            "instr-class" => self.instr_class = Some(value),
            _ => {}
        }
    }
}

/// One `<c>` cell of a diagram box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub colspan: usize,
    pub text: String,
}

/// One `<box>` of a register diagram.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagramBox {
    pub name: Option<String>,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchVariant {
    pub name: String,
    pub feature: String,
}

/// One encoding class of a section.
#[derive(Debug, Clone, Default)]
pub struct IClass {
    pub id: String,
    pub name: String,
    pub variants: Vec<ArchVariant>,
    pub boxes: Vec<DiagramBox>,
    /// Mnemonics (and alias mnemonics) of its encodings, deduplicated.
    pub mnemonics: Vec<String>,
    docvars: Docvars,
}

/// One line of section pseudocode, with the links it references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PseudoLine {
    /// Text with markup removed.
    pub text: String,
    pub links: Vec<String>,
}

/// A parsed `instructionsection` document.
#[derive(Debug, Clone, Default)]
pub struct InstructionSection {
    pub kind: String,
    pub id: String,
    pub iclasses: Vec<IClass>,
    pub pseudocode: Vec<PseudoLine>,
    docvars: Docvars,
}

impl InstructionSection {
    /// Instructions and aliases; pseudocode and index sections are not.
    pub fn is_instruction(&self) -> bool {
        self.kind == "instruction" || self.kind == "alias"
    }

    pub fn mnemonic(&self) -> Option<&str> {
        self.docvars.mnemonic.as_deref()
    }

    pub fn instr_class(&self) -> Option<&str> {
        self.docvars.instr_class.as_deref()
    }

    /// True when no encoding class is tied to an architecture variant.
    pub fn is_base_variant(&self) -> bool {
        self.iclasses.iter().all(|c| c.variants.is_empty())
    }

    /// True when an iclass is `iclass_<class>` or the section's class is `class`.
    pub fn has_class(&self, class: &str) -> bool {
        let id = format!("iclass_{class}");
        self.iclasses.iter().any(|c| c.id == id) || self.instr_class() == Some(class)
    }

    /// True when some class has no variant or a variant named at or before
    /// `version`.
    pub fn is_variant_at_most(&self, version: &str) -> bool {
        self.iclasses.iter().any(|c| {
            c.variants.is_empty() || c.variants.iter().any(|v| v.name.as_str() <= version)
        })
    }

    /// True when any pseudocode line references `link`.
    pub fn uses(&self, link: &str) -> bool {
        self.pseudocode
            .iter()
            .any(|line| line.links.iter().any(|l| l.contains(link)))
    }

    pub fn is_branch(&self) -> bool {
        self.uses(LINK_BRANCH)
    }

    pub fn reads_memory(&self) -> bool {
        self.uses(LINK_MEM_READ)
    }

    pub fn writes_memory(&self) -> bool {
        self.uses(LINK_MEM_WRITE)
    }

    pub fn is_atomic(&self) -> bool {
        self.uses(LINK_MEM_ATOMIC)
    }

    /// Destinations of general-purpose register writes, e.g. `X[d, datasize]`.
    pub fn register_writes(&self) -> BTreeSet<String> {
        self.pseudocode
            .iter()
            .filter(|line| line.links.iter().any(|l| l.contains(LINK_REG_WRITE)))
            .filter_map(|line| match line.text.split_once('=') {
                Some((dest, _)) => Some(dest.trim().to_string()),
                None => {
                    debug!("{}: register write without assignment: {:?}", self.id, line.text);
                    None
                }
            })
            .collect()
    }

    /// Encoding mnemonics and aliases across all classes, deduplicated in
    /// document order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.iclasses.iter().flat_map(|c| &c.mnemonics) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// `Op` variants for this section in the generated op table.
    pub fn op_names(&self, file: &str) -> Vec<String> {
        if file == COND_BRANCH_FILE {
            COND_BRANCH_OPS.iter().map(|op| op.to_string()).collect()
        } else {
            self.names()
        }
    }

    pub fn accepts(&self, opts: &ExtractOptions) -> bool {
        if !self.is_instruction() {
            return false;
        }
        if opts.base_only && !self.is_base_variant() {
            return false;
        }
        if !(opts.classes.is_empty() || opts.classes.iter().any(|c| self.has_class(c))) {
            return false;
        }
        if opts.branch && !self.is_branch() {
            return false;
        }
        if opts.reads_memory && !self.reads_memory() {
            return false;
        }
        if opts.writes_memory && !self.writes_memory() {
            return false;
        }
        if opts.atomic && !self.is_atomic() {
            return false;
        }
        if opts.no_register_writes && !self.register_writes().is_empty() {
            return false;
        }
        match &opts.max_variant {
            Some(version) => self.is_variant_at_most(version),
            None => true,
        }
    }

    /// One record per encoding class that has a register diagram.
    pub fn to_records(&self, file: &str, path: &str) -> Vec<Record> {
        self.iclasses
            .iter()
            .filter(|ic| {
                if ic.boxes.is_empty() {
                    debug!("{}: {} has no register diagram", file, ic.id);
                }
                !ic.boxes.is_empty()
            })
            .map(|ic| Record {
                file: file.to_string(),
                name: self
                    .mnemonic()
                    .or(ic.mnemonics.first().map(String::as_str))
                    .unwrap_or(&ic.name)
                    .to_string(),
                iclass: ic.id.clone(),
                path: path.to_string(),
                variants: join(ic.variants.iter().map(|v| v.name.as_str())),
                features: join(ic.variants.iter().map(|v| v.feature.as_str())),
                instr_class: self
                    .instr_class()
                    .or(ic.docvars.instr_class.as_deref())
                    .unwrap_or_default()
                    .to_string(),
                reg_diagram: render_diagram(&ic.boxes),
            })
            .collect()
    }
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.filter(|s| !s.is_empty()).collect::<Vec<_>>().join(",")
}

// ---------------------------------------------------------------------------
// Diagram rendering
// ---------------------------------------------------------------------------

fn cell_bit(text: &str) -> char {
    match text.trim() {
        "0" | "(0)" => '0',
        "1" | "(1)" => '1',
        _ => 'x',
    }
}

/// Render one box as diagram text.
pub fn render_box(bx: &DiagramBox) -> String {
    let name = bx.name.as_deref().unwrap_or("");

    if let Some(bits) = bx
        .cells
        .iter()
        .find_map(|c| c.text.trim().strip_prefix("!="))
    {
        return format!("{}!={}", name, bits.trim());
    }

    let bits: String = bx
        .cells
        .iter()
        .flat_map(|c| std::iter::repeat(cell_bit(&c.text)).take(c.colspan.max(1)))
        .collect();

    if name.is_empty() {
        bits
    } else {
        format!("{name}={bits}")
    }
}

/// Render boxes most-significant first, joined by `|`.
pub fn render_diagram(boxes: &[DiagramBox]) -> String {
    boxes.iter().map(render_box).collect::<Vec<_>>().join("|")
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum DocvarsOwner {
    Section,
    IClass,
    Encoding,
}

/// Element path of the section-level pseudocode text.
const SECTION_PSEUDOCODE: &[&[u8]] = &[b"instructionsection", b"ps_section", b"ps"];

#[derive(Default)]
struct SectionParser {
    stack: Vec<Vec<u8>>,
    section: Option<InstructionSection>,
    iclass: Option<IClass>,
    current_box: Option<DiagramBox>,
    cell: Option<Cell>,
    in_regdiagram: bool,
    in_pstext: bool,
    docvars_owner: Option<DocvarsOwner>,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

impl SectionParser {
    /// True when the open elements end with `path`.
    fn inside(&self, path: &[&[u8]]) -> bool {
        self.stack.len() >= path.len()
            && self.stack[self.stack.len() - path.len()..]
                .iter()
                .zip(path)
                .all(|(open, want)| open.as_slice() == *want)
    }

    fn pseudo_line(&mut self) -> Option<&mut PseudoLine> {
        self.section.as_mut().and_then(|s| s.pseudocode.last_mut())
    }

    fn open(&mut self, e: &BytesStart<'_>) {
        let parent = self.stack.last().map(Vec::as_slice);

        match e.name().as_ref() {
            b"instructionsection" if self.section.is_none() => {
                self.section = Some(InstructionSection {
                    kind: attr(e, b"type").unwrap_or_default(),
                    id: attr(e, b"id").unwrap_or_default(),
                    ..Default::default()
                });
            }
            b"docvars" => {
                self.docvars_owner = match parent {
                    Some(b"instructionsection") => Some(DocvarsOwner::Section),
                    Some(b"iclass") => Some(DocvarsOwner::IClass),
                    Some(b"encoding") => Some(DocvarsOwner::Encoding),
                    _ => None,
                };
            }
            b"docvar" => {
                if let (Some(key), Some(value)) = (attr(e, b"key"), attr(e, b"value")) {
                    self.docvar(&key, value);
                }
            }
            b"iclass" if self.section.is_some() => {
                self.iclass = Some(IClass {
                    id: attr(e, b"id").unwrap_or_default(),
                    name: attr(e, b"name").unwrap_or_default(),
                    ..Default::default()
                });
            }
            b"arch_variant" => {
                if let Some(ic) = self.iclass.as_mut() {
                    ic.variants.push(ArchVariant {
                        name: attr(e, b"name").unwrap_or_default(),
                        feature: attr(e, b"feature").unwrap_or_default(),
                    });
                }
            }
            b"regdiagram" if self.iclass.is_some() => self.in_regdiagram = true,
            b"box" if self.in_regdiagram => {
                self.current_box = Some(DiagramBox {
                    name: attr(e, b"name"),
                    cells: Vec::new(),
                });
            }
            b"pstext" if self.section.is_some() && self.inside(SECTION_PSEUDOCODE) => {
                self.in_pstext = true;
                if let Some(section) = self.section.as_mut() {
                    section.pseudocode.push(PseudoLine::default());
                }
            }
            b"a" if self.in_pstext => {
                if let Some(link) = attr(e, b"link") {
                    if let Some(line) = self.pseudo_line() {
                        line.links.push(link);
                    }
                }
            }
            b"c" if self.current_box.is_some() => {
                let colspan = attr(e, b"colspan")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(1);
                self.cell = Some(Cell { colspan, text: String::new() });
            }
            _ => {}
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"docvars" => self.docvars_owner = None,
            b"c" => {
                if let (Some(cell), Some(bx)) = (self.cell.take(), self.current_box.as_mut()) {
                    bx.cells.push(cell);
                }
            }
            b"box" => {
                if let (Some(bx), Some(ic)) = (self.current_box.take(), self.iclass.as_mut()) {
                    ic.boxes.push(bx);
                }
            }
            b"regdiagram" => self.in_regdiagram = false,
            b"pstext" => self.in_pstext = false,
            b"iclass" => {
                if let (Some(ic), Some(section)) = (self.iclass.take(), self.section.as_mut()) {
                    section.iclasses.push(ic);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &[u8]) {
        let text = String::from_utf8_lossy(text);
        if self.in_pstext {
            self.pseudo_text(&text);
        } else if let Some(cell) = self.cell.as_mut() {
            cell.text.push_str(&text);
        }
    }

    fn pseudo_text(&mut self, text: &str) {
        let Some(section) = self.section.as_mut() else {
            return;
        };
        let mut parts = text.split('\n');
        if let (Some(first), Some(line)) = (parts.next(), section.pseudocode.last_mut()) {
            line.text.push_str(first);
        }
        for part in parts {
            section.pseudocode.push(PseudoLine {
                text: part.to_string(),
                links: Vec::new(),
            });
        }
    }

    fn docvar(&mut self, key: &str, value: String) {
        match self.docvars_owner {
            Some(DocvarsOwner::Section) => {
                if let Some(section) = self.section.as_mut() {
                    section.docvars.set(key, value);
                }
            }
            Some(DocvarsOwner::IClass) => {
                if let Some(ic) = self.iclass.as_mut() {
                    ic.docvars.set(key, value);
                }
            }
            Some(DocvarsOwner::Encoding) => {
                let is_name = key == "mnemonic" || key == "alias_mnemonic";
                if let Some(ic) = self.iclass.as_mut().filter(|_| is_name) {
                    if !ic.mnemonics.contains(&value) {
                        ic.mnemonics.push(value);
                    }
                }
            }
            None => {}
        }
    }
}

/// Parse one XML document. Returns `Ok(None)` when it is not an
/// `instructionsection`.
pub fn parse_section(xml: &str) -> Result<Option<InstructionSection>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut parser = SectionParser::default();
    let mut buf = Vec::with_capacity(512);

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) => {
                parser.open(e);
                parser.stack.push(e.name().as_ref().to_vec());
            }
            Event::Empty(ref e) => {
                parser.open(e);
                parser.close(e.name().as_ref());
            }
            Event::End(ref e) => {
                parser.stack.pop();
                parser.close(e.name().as_ref());
            }
            Event::Text(ref t) => parser.text(t),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parser.section)
}

// ---------------------------------------------------------------------------
// Directory scan
// ---------------------------------------------------------------------------

/// An accepted section together with where it was read from.
#[derive(Debug, Clone)]
pub struct ScannedSection {
    pub file: String,
    pub path: String,
    pub section: InstructionSection,
}

/// Parse every `*.xml` document under `dir`, in file-name order, keeping the
/// sections `opts` accepts. Unparseable documents are skipped with a warning.
pub fn scan_sections(dir: &Path, opts: &ExtractOptions) -> Result<Vec<ScannedSection>, ExtractError> {
    let mut sections = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().map_or(true, |e| e != "xml") {
            continue;
        }

        let data = fs::read(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&data);

        let section = match parse_section(&text) {
            Ok(Some(section)) => section,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if !section.accepts(opts) {
            continue;
        }

        let file = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        debug!("{}: {} encoding classes", file, section.iclasses.len());
        sections.push(ScannedSection {
            file,
            path: path.display().to_string(),
            section,
        });
    }

    info!("Accepted {} documents under {}", sections.len(), dir.display());
    Ok(sections)
}

/// Extract records from every accepted document under `dir`.
pub fn scan_directory(dir: &Path, opts: &ExtractOptions) -> Result<Vec<Record>, ExtractError> {
    let records: Vec<Record> = scan_sections(dir, opts)?
        .iter()
        .flat_map(|s| s.section.to_records(&s.file, &s.path))
        .collect();
    info!("Extracted {} records", records.len());
    Ok(records)
}

/// Print `file: [names]` per section, optionally followed by one
/// `\t<iclass>: <diagram>` line per encoding class, then the total.
pub fn write_listing<W: Write>(
    mut out: W,
    sections: &[ScannedSection],
    encodings: bool,
) -> io::Result<()> {
    for s in sections {
        writeln!(out, "{}: [{}]", s.file, s.section.names().join(" "))?;
        if encodings {
            for ic in &s.section.iclasses {
                writeln!(out, "\t{}: {}", ic.id, render_diagram(&ic.boxes))?;
            }
        }
    }
    writeln!(out, "total instructions: {}", sections.len())
}

/// `Op` variant names of all sections, deduplicated in scan order.
pub fn op_table_names(sections: &[ScannedSection]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in sections.iter().flat_map(|s| s.section.op_names(&s.file)) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
