// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use opsweep_common::Settings;
use opsweep_core::catalog::CatalogError;
use opsweep_core::codegen;
use opsweep_core::density::DensityAggregator;
use opsweep_core::{ClassificationEngine, PredicateCatalog};
use opsweep_loader::codec::{TableReader, TableWriter};
use opsweep_loader::record::{self, Record};
use opsweep_loader::xml::{self, ExtractOptions};

/// Open `path` for writing, or stdout when absent.
fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => {
            let file = File::create(p)
                .with_context(|| format!("Failed to create {}", p.display()))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    record::load_records(path)
        .with_context(|| format!("Failed to load records from {}", path.display()))
}

/// Compile every record's diagram, naming the offending record on failure.
pub fn compile_catalog(records: &[Record]) -> Result<PredicateCatalog> {
    PredicateCatalog::compile(records.iter().map(|r| r.reg_diagram.as_str())).map_err(|e| {
        let culprit = match &e {
            CatalogError::Diagram { index, .. } => records
                .get(*index)
                .map(|r| format!(" ({} from {})", r.name, r.file)),
            CatalogError::TooManyEntries(_) => None,
        };
        anyhow::Error::new(e).context(format!(
            "Failed to compile bit-diagrams{}",
            culprit.unwrap_or_default()
        ))
    })
}

/// What `extract` writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractMode {
    /// Records JSON.
    Records,
    /// `file: [names]` lines, optionally with each class's diagram.
    Listing { encodings: bool },
    /// A `fn(op: Op) -> bool` selecting the accepted mnemonics.
    OpTable { name: String },
}

/// `extract`: scan an XML directory and write records, a listing or an op
/// table for the accepted sections.
pub fn extract(
    dir: &Path,
    opts: &ExtractOptions,
    mode: &ExtractMode,
    output: Option<&Path>,
) -> Result<()> {
    let context = || format!("Failed to extract from {}", dir.display());
    let mut out = open_output(output)?;

    match mode {
        ExtractMode::Records => {
            let records = xml::scan_directory(dir, opts).with_context(context)?;
            record::write_records(&mut out, &records).context("Failed to write records")?;
        }
        ExtractMode::Listing { encodings } => {
            let sections = xml::scan_sections(dir, opts).with_context(context)?;
            xml::write_listing(&mut out, &sections, *encodings)
                .context("Failed to write listing")?;
        }
        ExtractMode::OpTable { name } => {
            let sections = xml::scan_sections(dir, opts).with_context(context)?;
            let ops = xml::op_table_names(&sections);
            let source = codegen::emit_op_predicate(name, &ops)
                .with_context(|| format!("Failed to emit {name}"))?;
            out.write_all(source.as_bytes())?;
            info!("{}: {} ops", name, ops.len());
        }
    }

    out.flush()?;
    Ok(())
}

/// `compile`: emit matcher source for the record list.
pub fn compile(records_path: &Path, output: Option<&Path>) -> Result<()> {
    let records = load_records(records_path)?;
    let catalog = compile_catalog(&records)?;
    let source = codegen::emit_source(&catalog).context("Failed to emit matcher source")?;

    let mut out = open_output(output)?;
    out.write_all(source.as_bytes())?;
    out.flush()?;
    info!("Emitted {} matchers", catalog.len());
    Ok(())
}

/// `build`: sweep the value space and write the classification table.
pub fn build(records_path: &Path, table_path: &Path, settings: &Settings) -> Result<()> {
    let records = load_records(records_path)?;
    let catalog = compile_catalog(&records)?;
    let engine = ClassificationEngine::new(&catalog)
        .with_workers(settings.effective_workers())
        .with_progress_interval(settings.progress_interval);

    let bits = settings.address_bits;
    let mut writer = TableWriter::create(table_path, bits)
        .with_context(|| format!("Failed to create table {}", table_path.display()))?;

    engine
        .sweep_to(bits, settings.window_entries(), |_, window| writer.write_chunk(window))
        .with_context(|| format!("Failed to write table {}", table_path.display()))?;
    writer
        .finish()
        .with_context(|| format!("Failed to finish table {}", table_path.display()))?;

    info!("Table written to {}", table_path.display());
    Ok(())
}

/// `aggregate`: print `a.b.c.d score` lines for every non-empty block.
pub fn aggregate<W: Write>(
    records_path: &Path,
    table_path: &Path,
    settings: &Settings,
    mut out: W,
) -> Result<()> {
    let records = load_records(records_path)?;
    let mut reader = TableReader::open(table_path, settings.address_bits)
        .with_context(|| format!("Failed to open table {}", table_path.display()))?;
    let mut agg = DensityAggregator::new(records.iter().map(|r| r.instr_class.as_str()));

    let chunk = settings.block_aligned_chunk();
    let mut buf = Vec::with_capacity(chunk);
    while reader
        .read_chunk(&mut buf, chunk)
        .with_context(|| format!("Failed to read table {}", table_path.display()))?
    {
        for score in agg.feed(&buf)? {
            writeln!(out, "{score}")?;
        }
    }
    out.flush()?;

    let summary = agg.finish();
    info!("Classes: {}", summary.registry);
    info!("Entries: {}", summary.entries);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const RECORDS: &str = r#"[
        {"Name": "BASE", "InstrClass": "base", "RegDiagram": "0000000x"},
        {"Name": "HIGH", "InstrClass": "general", "RegDiagram": "op=1|xxxxxxx"},
        {"Name": "MID", "InstrClass": "fpsimd", "RegDiagram": "01|xxxxxx"}
    ]"#;

    fn toy_settings() -> Settings {
        Settings {
            workers: Some(3),
            address_bits: 8,
            window_bits: 5,
            chunk_entries: 100,
            ..Settings::default()
        }
    }

    #[test]
    fn test_build_then_aggregate() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.json");
        let table = dir.path().join("table.bin");
        fs::write(&records, RECORDS).unwrap();

        let settings = toy_settings();
        build(&records, &table, &settings).unwrap();

        let bytes = fs::read(&table).unwrap();
        assert_eq!(bytes.len(), 512);
        let entry = |v: usize| i16::from_le_bytes([bytes[2 * v], bytes[2 * v + 1]]);
        assert_eq!(entry(0), 0);
        assert_eq!(entry(1), 0);
        assert_eq!(entry(2), -1);
        assert_eq!(entry(64), 2);
        assert_eq!(entry(200), 1);

        // 64 entries of "fpsimd" (seen first, ordinal 1) and 128 of
        // "general" (ordinal 2): (64 + 256) / 256 = 1.
        let mut out = Vec::new();
        aggregate(&records, &table, &settings, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0.0.0.0 1\n");
    }

    #[test]
    fn test_aggregate_rejects_wrong_width() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.json");
        let table = dir.path().join("table.bin");
        fs::write(&records, RECORDS).unwrap();
        build(&records, &table, &toy_settings()).unwrap();

        let wide = Settings {
            address_bits: 9,
            ..toy_settings()
        };
        assert!(aggregate(&records, &table, &wide, Vec::new()).is_err());
    }

    #[test]
    fn test_compile_names_bad_record() {
        let records: Vec<Record> = record::parse_records(
            r#"[{"Name": "OK", "File": "a.xml", "InstrClass": "g", "RegDiagram": "1x"},
                {"Name": "BAD", "File": "b.xml", "InstrClass": "g", "RegDiagram": "1|2"}]"#,
        )
        .unwrap();
        let err = compile_catalog(&records).unwrap_err();
        assert!(format!("{err}").contains("BAD from b.xml"));
    }

    #[test]
    fn test_compile_writes_source() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.json");
        let source = dir.path().join("matchers.rs");
        fs::write(&records, RECORDS).unwrap();

        compile(&records, Some(&source)).unwrap();
        let text = fs::read_to_string(&source).unwrap();
        assert!(text.contains("pub fn parse_2(insn: u32) -> bool"));
        assert!(text.contains("[fn(u32) -> bool; 3]"));
    }

    #[test]
    fn test_extract_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let xml_dir = dir.path().join("xml");
        fs::create_dir(&xml_dir).unwrap();
        fs::write(
            xml_dir.join("nop.xml"),
            r#"<instructionsection id="NOP" type="instruction">
  <docvars><docvar key="instr-class" value="general"/><docvar key="mnemonic" value="NOP"/></docvars>
  <classes><iclass id="iclass_system" name="System">
    <regdiagram form="32"><box hibit="31" width="32"><c colspan="32">1</c></box></regdiagram>
  </iclass></classes>
</instructionsection>"#,
        )
        .unwrap();
        let out = dir.path().join("records.json");

        let opts = ExtractOptions::from(&Settings::default());
        extract(&xml_dir, &opts, &ExtractMode::Records, Some(&out)).unwrap();
        let records = record::load_records(&out).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "NOP");
        assert_eq!(records[0].file, "nop.xml");
        assert_eq!(records[0].reg_diagram, "1".repeat(32));
    }

    const BRANCH_XML: &str = r#"<instructionsection id="BR" type="instruction">
  <docvars><docvar key="instr-class" value="general"/><docvar key="mnemonic" value="BR"/></docvars>
  <classes><iclass id="iclass_br" name="Branch">
    <regdiagram form="32"><box hibit="31" width="32"><c colspan="32">0</c></box></regdiagram>
    <encoding name="BR_64_branch_reg"><docvars><docvar key="mnemonic" value="BR"/></docvars></encoding>
  </iclass></classes>
  <ps_section><ps name="br"><pstext><a link="impl-shared.BranchTo.3">BranchTo</a>(target);</pstext></ps></ps_section>
</instructionsection>"#;

    const STORE_XML: &str = r#"<instructionsection id="STR" type="instruction">
  <docvars><docvar key="instr-class" value="general"/><docvar key="mnemonic" value="STR"/></docvars>
  <classes><iclass id="iclass_str" name="Store">
    <regdiagram form="32"><box hibit="31" width="32"><c colspan="32">1</c></box></regdiagram>
    <encoding name="STR_64"><docvars><docvar key="mnemonic" value="STR"/></docvars></encoding>
  </iclass></classes>
  <ps_section><ps name="str"><pstext><a link="impl-aarch64.Mem.write.3">Mem</a>[address] = data;</pstext></ps></ps_section>
</instructionsection>"#;

    fn xml_dir(dir: &Path) -> std::path::PathBuf {
        let xml_dir = dir.join("xml");
        fs::create_dir(&xml_dir).unwrap();
        fs::write(xml_dir.join("br.xml"), BRANCH_XML).unwrap();
        fs::write(xml_dir.join("str.xml"), STORE_XML).unwrap();
        xml_dir
    }

    #[test]
    fn test_extract_listing() {
        let dir = tempfile::tempdir().unwrap();
        let xml_dir = xml_dir(dir.path());
        let out = dir.path().join("listing.txt");

        let mode = ExtractMode::Listing { encodings: true };
        extract(&xml_dir, &ExtractOptions::default(), &mode, Some(&out)).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            format!(
                "br.xml: [BR]\n\ticlass_br: {}\nstr.xml: [STR]\n\ticlass_str: {}\ntotal instructions: 2\n",
                "0".repeat(32),
                "1".repeat(32)
            )
        );
    }

    #[test]
    fn test_extract_op_table_for_branches() {
        let dir = tempfile::tempdir().unwrap();
        let xml_dir = xml_dir(dir.path());
        let out = dir.path().join("ops.rs");

        let opts = ExtractOptions {
            branch: true,
            ..ExtractOptions::default()
        };
        let mode = ExtractMode::OpTable {
            name: "is_branch".to_string(),
        };
        extract(&xml_dir, &opts, &mode, Some(&out)).unwrap();
        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("pub fn is_branch(op: Op) -> bool"));
        assert!(text.contains("Op::BR => true,"));
        assert!(!text.contains("Op::STR"));
    }
}
