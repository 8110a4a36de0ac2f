// SPDX-FileCopyrightText: 2025 opsweep contributors
// SPDX-License-Identifier: GPL-3.0-or-later

mod commands;
mod config;

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use commands::ExtractMode;
use log::info;
use opsweep_common::ADDRESS_BITS;
use opsweep_loader::xml::ExtractOptions;

/// opsweep - exhaustive instruction-space classifier
#[derive(Parser, Debug)]
#[command(
    name = "opsweep",
    version,
    about = "Classify the 32-bit instruction space against bit-diagram catalogs"
)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/opsweep/opsweep.ini)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract records from a directory of instruction XML documents
    Extract {
        /// Directory to scan for *.xml instruction sections
        dir: PathBuf,

        /// Comma-separated instruction classes to keep
        #[arg(long, value_delimiter = ',')]
        classes: Option<Vec<String>>,

        /// Keep encodings that belong to architecture extensions
        #[arg(long)]
        all_variants: bool,

        /// Keep only instructions available at or before this version (e.g. ARMv8.2)
        #[arg(long, value_name = "VERSION")]
        variant: Option<String>,

        /// Keep only branches
        #[arg(long)]
        branch: bool,

        /// Keep only instructions that read memory
        #[arg(long)]
        rdmem: bool,

        /// Keep only instructions that write memory
        #[arg(long)]
        wrmem: bool,

        /// Keep only atomic memory operations
        #[arg(long)]
        atomic: bool,

        /// Keep only instructions that write no general-purpose register
        #[arg(long)]
        nomodify: bool,

        /// List matching files and mnemonics instead of writing records
        #[arg(long, conflicts_with = "func")]
        list: bool,

        /// With --list, print each encoding class's diagram
        #[arg(long, requires = "list")]
        encoding: bool,

        /// Emit `fn NAME(op: Op) -> bool` over the matching mnemonics
        #[arg(long, value_name = "NAME")]
        func: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Emit Rust matcher functions for a records file
    Compile {
        /// Records JSON file
        records: PathBuf,

        /// Source output (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sweep the value space and write the classification table
    Build {
        /// Records JSON file
        records: PathBuf,

        /// Table output file
        #[arg(long)]
        out: PathBuf,

        /// Worker threads (default: one per processing unit)
        #[arg(long)]
        workers: Option<usize>,

        /// Width of the value space
        #[arg(long)]
        bits: Option<u32>,
    },

    /// Print the density map of a classification table
    Aggregate {
        /// Records JSON file the table was built from
        records: PathBuf,

        /// Table file
        #[arg(long)]
        table: PathBuf,

        /// Width of the value space
        #[arg(long)]
        bits: Option<u32>,
    },
}

fn check_bits(bits: Option<u32>) -> Result<Option<u32>> {
    match bits {
        Some(b) if b > ADDRESS_BITS => bail!("--bits {} exceeds {}", b, ADDRESS_BITS),
        other => Ok(other),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let mut settings = config::load_config(args.config.as_ref());

    match args.command {
        Command::Extract {
            dir,
            classes,
            all_variants,
            variant,
            branch,
            rdmem,
            wrmem,
            atomic,
            nomodify,
            list,
            encoding,
            func,
            output,
        } => {
            if let Some(classes) = classes {
                settings.classes = classes;
            }
            if all_variants {
                settings.base_only = false;
            }
            let opts = ExtractOptions {
                branch,
                reads_memory: rdmem,
                writes_memory: wrmem,
                atomic,
                no_register_writes: nomodify,
                max_variant: variant,
                ..ExtractOptions::from(&settings)
            };
            let mode = match (func, list) {
                (Some(name), _) => ExtractMode::OpTable { name },
                (None, true) => ExtractMode::Listing {
                    encodings: encoding,
                },
                (None, false) => ExtractMode::Records,
            };
            commands::extract(&dir, &opts, &mode, output.as_deref())?;
        }
        Command::Compile { records, output } => {
            commands::compile(&records, output.as_deref())?;
        }
        Command::Build {
            records,
            out,
            workers,
            bits,
        } => {
            if let Some(workers) = workers {
                settings.workers = Some(workers);
            }
            if let Some(bits) = check_bits(bits)? {
                settings.address_bits = bits;
            }
            info!(
                "Building {}-bit table with {} workers",
                settings.address_bits,
                settings.effective_workers()
            );
            commands::build(&records, &out, &settings)?;
        }
        Command::Aggregate {
            records,
            table,
            bits,
        } => {
            if let Some(bits) = check_bits(bits)? {
                settings.address_bits = bits;
            }
            commands::aggregate(&records, &table, &settings, io::stdout().lock())?;
        }
    }

    Ok(())
}
