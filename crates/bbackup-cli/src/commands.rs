use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use bbackup_client::{ClientConfig, IdMapSet};
use bbackup_idmap::{InodeToObjectMap, MAP_FORMAT_VERSION};
use bbackup_types::{InodeRef, MapEntry};
use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Lookup(args) => cmd_lookup(args, format),
        Command::Stat(args) => cmd_stat(args, format),
        Command::Info(args) => cmd_info(args, format),
        Command::Layout(args) => cmd_layout(args, format),
    }
}

#[derive(Debug, Serialize)]
struct LookupRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    inode: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_directory_id: Option<String>,
}

impl LookupRow {
    fn new(path: Option<PathBuf>, inode: InodeRef, entry: Option<MapEntry>) -> Self {
        Self {
            path,
            inode: inode.get(),
            object_id: entry.map(|e| e.object_id.to_string()),
            parent_directory_id: entry.map(|e| e.parent_directory_id.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoReport {
    map: PathBuf,
    format_version: i64,
    entries: u64,
}

#[derive(Debug, Serialize)]
struct LayoutRow {
    name: String,
    location: PathBuf,
    map: PathBuf,
    map_exists: bool,
    incomplete_map: PathBuf,
    incomplete_map_exists: bool,
}

fn open_map(path: &Path) -> anyhow::Result<InodeToObjectMap> {
    let mut map = InodeToObjectMap::persistent();
    map.open(path, true, false)
        .with_context(|| format!("cannot open inode map {}", path.display()))?;
    debug!(path = %path.display(), "opened inode map");
    Ok(map)
}

fn lookup_inodes(map: &InodeToObjectMap, inodes: &[u64]) -> anyhow::Result<Vec<LookupRow>> {
    inodes
        .iter()
        .map(|raw| {
            let inode = InodeRef::new(*raw);
            Ok::<_, anyhow::Error>(LookupRow::new(None, inode, map.lookup(inode)?))
        })
        .collect()
}

fn lookup_paths(map: &InodeToObjectMap, paths: &[PathBuf]) -> anyhow::Result<Vec<LookupRow>> {
    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        let metadata = std::fs::symlink_metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;
        let Some(inode) = InodeRef::from_metadata(&metadata) else {
            bail!("inode numbers are not available on this platform");
        };
        rows.push(LookupRow::new(Some(path.clone()), inode, map.lookup(inode)?));
    }
    Ok(rows)
}

fn map_info(path: &Path) -> anyhow::Result<InfoReport> {
    let map = open_map(path)?;
    Ok(InfoReport {
        map: path.to_path_buf(),
        format_version: MAP_FORMAT_VERSION,
        entries: map.entry_count()?,
    })
}

fn map_layout(config: &ClientConfig) -> anyhow::Result<Vec<LayoutRow>> {
    let set = IdMapSet::new(config.map_storage(), config.data_directory.clone());
    let mut rows = Vec::with_capacity(config.locations.len());
    for location in &config.locations {
        let map = set.base_path(&location.path);
        let incomplete_map = set.new_map_path(&location.path);
        rows.push(LayoutRow {
            name: location.name.clone(),
            location: location.path.clone(),
            map_exists: set.storage().exists(&map)?,
            incomplete_map_exists: set.storage().exists(&incomplete_map)?,
            map,
            incomplete_map,
        });
    }
    Ok(rows)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_lookup_rows(rows: &[LookupRow]) {
    for row in rows {
        let subject = match &row.path {
            Some(path) => format!("{} (inode {})", path.display(), row.inode),
            None => format!("inode {}", row.inode),
        };
        match (&row.object_id, &row.parent_directory_id) {
            (Some(object), Some(parent)) => println!(
                "{}: object {} in directory {}",
                subject.bold(),
                object.yellow(),
                parent.cyan()
            ),
            _ => println!("{}: {}", subject.bold(), "not found".dimmed()),
        }
    }
}

fn cmd_lookup(args: LookupArgs, format: OutputFormat) -> anyhow::Result<()> {
    let map = open_map(&args.map)?;
    let rows = lookup_inodes(&map, &args.inodes)?;
    match format {
        OutputFormat::Text => print_lookup_rows(&rows),
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(())
}

fn cmd_stat(args: StatArgs, format: OutputFormat) -> anyhow::Result<()> {
    let map = open_map(&args.map)?;
    let rows = lookup_paths(&map, &args.paths)?;
    match format {
        OutputFormat::Text => print_lookup_rows(&rows),
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(())
}

fn cmd_info(args: InfoArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = map_info(&args.map)?;
    match format {
        OutputFormat::Text => {
            println!("Map: {}", report.map.display().to_string().bold());
            println!("  Format version: {}", report.format_version);
            println!("  Entries: {}", report.entries.to_string().yellow());
        }
        OutputFormat::Json => print_json(&report)?,
    }
    Ok(())
}

fn cmd_layout(args: LayoutArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = ClientConfig::load(&args.config)
        .with_context(|| format!("cannot load configuration {}", args.config.display()))?;
    let rows = map_layout(&config)?;
    match format {
        OutputFormat::Text => {
            for row in &rows {
                println!("{} ({})", row.name.bold(), row.location.display());
                println!(
                    "  map: {} {}",
                    row.map.display(),
                    presence(row.map_exists, "present", "absent")
                );
                println!(
                    "  new: {} {}",
                    row.incomplete_map.display(),
                    presence(row.incomplete_map_exists, "left over", "absent")
                );
            }
        }
        OutputFormat::Json => print_json(&rows)?,
    }
    Ok(())
}

fn presence(exists: bool, yes: &str, no: &str) -> colored::ColoredString {
    if exists {
        yes.green()
    } else {
        no.dimmed()
    }
}
