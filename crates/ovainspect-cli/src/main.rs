//! OVAInspect CLI - Inspect the VM metadata inside OVA archives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use ovainspect_core::{
    parse_ova, vmdk::SECTOR_SIZE, ByteSource, DiagnosticCallback, FileSource, GrainTable,
    MmapSource, ParseOptions, ParseResult, DEFAULT_MAX_DESCRIPTOR_BYTES,
};

/// Streaming inspector for OVA virtual appliances.
#[derive(Parser)]
#[command(name = "ovainspect")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the VM described by an OVA archive.
    Info {
        /// Path to the OVA file.
        ova_file: PathBuf,

        /// Skip grain-table extraction for disk images.
        #[arg(long)]
        skip_tables: bool,

        /// Memory-map the archive instead of reading it through async file I/O.
        #[arg(long)]
        mmap: bool,

        /// Largest descriptor to read, in megabytes.
        #[arg(long, default_value_t = DEFAULT_MAX_DESCRIPTOR_BYTES / (1024 * 1024))]
        max_descriptor_mb: u64,

        /// Suppress the progress spinner.
        #[arg(short, long)]
        quiet: bool,
    },

    /// List the entries of an OVA archive.
    Entries {
        /// Path to the OVA file.
        ova_file: PathBuf,

        /// Memory-map the archive instead of reading it through async file I/O.
        #[arg(long)]
        mmap: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Info {
            ova_file,
            skip_tables,
            mmap,
            max_descriptor_mb,
            quiet,
        } => {
            let options = ParseOptions::new(skip_tables, max_descriptor_mb * 1024 * 1024);
            let result = inspect(&ova_file, mmap, options, quiet).await?;
            show_info(&ova_file, &result);
        }
        Commands::Entries { ova_file, mmap } => {
            let result = inspect(&ova_file, mmap, ParseOptions::metadata_only(), true).await?;
            show_entries(&result);
        }
    }

    Ok(())
}

/// Opens the archive with the requested backend and parses it.
async fn inspect(
    path: &Path,
    mmap: bool,
    options: ParseOptions,
    quiet: bool,
) -> Result<ParseResult<GrainTable>> {
    let spinner = if quiet {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message(format!("Reading {}", path.display()));
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    // Diagnostics are printed above the spinner so they stay visible
    let printer = spinner.clone();
    let callback: DiagnosticCallback = Box::new(move |diagnostic| match printer {
        Some(ref pb) => pb.println(format!("warning: {}", diagnostic)),
        None => eprintln!("warning: {}", diagnostic),
    });

    let result = if mmap {
        debug!("Memory-mapping {}", path.display());
        let source = MmapSource::open(path)?;
        run(&source, options, callback).await
    } else {
        let source = FileSource::open(path).await?;
        run(&source, options, callback).await
    };

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    result.with_context(|| format!("Failed to parse {}", path.display()))
}

async fn run<S: ByteSource>(
    source: &S,
    options: ParseOptions,
    callback: DiagnosticCallback,
) -> ovainspect_core::Result<ParseResult<GrainTable>> {
    debug!("Archive is {} bytes", source.size());
    parse_ova(source, options, Some(callback)).await
}

fn show_info(path: &Path, result: &ParseResult<GrainTable>) {
    println!("OVA Information");
    println!("===============");
    println!();
    println!("File:      {}", path.display());

    let Some(vm) = &result.descriptor else {
        println!("Descriptor: None");
        return;
    };

    println!("Name:      {}", vm.name_label);
    if let Some(description) = &vm.description_label {
        println!("About:     {}", description);
    }
    match vm.n_cpus {
        Some(cpus) => println!("CPUs:      {}", cpus),
        None => println!("CPUs:      unspecified"),
    }
    match vm.memory_bytes {
        Some(bytes) => println!("Memory:    {}", format_bytes(bytes)),
        None => println!("Memory:    unspecified"),
    }
    if vm.networks.is_empty() {
        println!("Networks:  None");
    } else {
        println!("Networks:  {}", vm.networks.join(", "));
    }
    println!();

    if vm.disks.is_empty() {
        println!("Disks:     None");
    } else {
        println!("Disks:");
        let mut disks: Vec<_> = vm.disks.iter().collect();
        disks.sort_by_key(|(_, disk)| disk.position);
        for (id, disk) in disks {
            println!(
                "  {}. {} ({}) - {} [{}]",
                disk.position,
                disk.name_label,
                id,
                format_bytes(disk.capacity_bytes),
                disk.path.as_deref().unwrap_or("no file")
            );
        }
    }

    if !result.tables.is_empty() {
        println!();
        println!("Grain tables:");
        for (name, table) in &result.tables {
            let allocated = (table.grains.len() as u64)
                .saturating_mul(table.grain_size_sectors)
                .saturating_mul(SECTOR_SIZE);
            println!(
                "  {} - {} grains, {} of {} allocated",
                name,
                table.grains.len(),
                format_bytes(allocated),
                format_bytes(table.capacity_bytes())
            );
        }
    }
}

fn show_entries(result: &ParseResult<GrainTable>) {
    println!("{:>12}  {:>12}  NAME", "OFFSET", "SIZE");
    for entry in &result.entries {
        println!("{:>12}  {:>12}  {}", entry.offset, entry.size, entry.name);
    }
}

/// Format bytes as human-readable string.
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
