use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Inspect and invalidate the on-disk market-data cache. The server itself
/// only ever refreshes entries; removing them is an operator action.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Cache root directory
    #[arg(short, long, default_value = "data/cache", env = "QUANTGATE_CACHE_ROOT")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Entry counts and bytes per interface
    Stats,
    /// Remove cached entries
    Clear {
        /// Restrict to one interface
        #[arg(short, long)]
        interface: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stats => stats(&cli.root),
        Command::Clear { interface } => clear(&cli.root, interface.as_deref()),
    }
}

fn stats(root: &Path) -> Result<()> {
    let mut per_interface: BTreeMap<String, (u64, u64)> = BTreeMap::new();

    for dir_entry in read_dir(root)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let interface = dir_entry.file_name().to_string_lossy().to_string();
        let mut entries = 0;
        let mut bytes = 0;
        for file in std::fs::read_dir(dir_entry.path())? {
            let file = file?;
            let path = file.path();
            bytes += file.metadata().map(|m| m.len()).unwrap_or(0);
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                entries += 1;
            }
        }
        per_interface.insert(interface, (entries, bytes));
    }

    if per_interface.is_empty() {
        println!("cache is empty");
        return Ok(());
    }

    let mut total_entries = 0;
    let mut total_bytes = 0;
    for (interface, (entries, bytes)) in &per_interface {
        println!("{interface}: {entries} entries, {bytes} bytes");
        total_entries += entries;
        total_bytes += bytes;
    }
    println!("total: {total_entries} entries, {total_bytes} bytes");
    Ok(())
}

fn clear(root: &Path, interface: Option<&str>) -> Result<()> {
    let mut removed = 0;

    for dir_entry in read_dir(root)? {
        let dir_entry = dir_entry?;
        if !dir_entry.file_type()?.is_dir() {
            continue;
        }
        let name = dir_entry.file_name().to_string_lossy().to_string();
        if interface.is_some_and(|wanted| wanted != name) {
            continue;
        }
        for file in std::fs::read_dir(dir_entry.path())? {
            let path = file?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("bin") {
                removed += 1;
            }
            std::fs::remove_file(&path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
        }
        std::fs::remove_dir(dir_entry.path()).ok();
    }

    println!("removed {removed} cached entries");
    Ok(())
}

fn read_dir(root: &Path) -> Result<std::fs::ReadDir> {
    std::fs::read_dir(root).with_context(|| format!("cannot read cache root {}", root.display()))
}
