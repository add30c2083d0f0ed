use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bbidmap",
    about = "Inspect Box Backup client inode maps",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Look up inode numbers in a map
    Lookup(LookupArgs),
    /// Look up local paths by their inode
    Stat(StatArgs),
    /// Show a map's entry count
    Info(InfoArgs),
    /// Show the map files a configuration uses
    Layout(LayoutArgs),
}

#[derive(Args)]
pub struct LookupArgs {
    /// Map file
    pub map: PathBuf,
    /// Inode numbers
    #[arg(required = true)]
    pub inodes: Vec<u64>,
}

#[derive(Args)]
pub struct StatArgs {
    /// Map file
    pub map: PathBuf,
    /// Local files or directories
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Map file
    pub map: PathBuf,
}

#[derive(Args)]
pub struct LayoutArgs {
    /// Client configuration file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,
}
