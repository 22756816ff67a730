//! CLI argument parsing with clap

use clap::{Args, Parser, Subcommand};
use url::Url;

/// Compoza - keep compose projects on their latest images
#[derive(Parser, Debug)]
#[command(name = "compoza")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check images for updates
    Check(CheckArgs),

    /// Re-check images periodically
    Watch(WatchArgs),

    /// Update one or more compose projects
    Update(UpdateArgs),

    /// Update projects with pending image updates
    UpdateAll(UpdateAllArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Images to check (default: images of running containers)
    pub images: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Wait up to SECS for background version resolution
    #[arg(long, value_name = "SECS")]
    pub wait_versions: Option<u64>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between checks
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub interval: u64,

    /// Images to check (default: images of running containers)
    pub images: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Compose projects to update
    #[arg(required = true)]
    pub projects: Vec<String>,

    /// Pull new images without recreating containers
    #[arg(long)]
    pub pull_only: bool,

    /// Run the update through a Compoza server instead of the local engine
    #[arg(long, env = "COMPOZA_REMOTE", value_name = "URL")]
    pub remote: Option<Url>,
}

#[derive(Args, Debug)]
pub struct UpdateAllArgs {
    /// Projects to update (default: running projects with updates available)
    pub projects: Vec<String>,

    /// Run the updates through a Compoza server instead of the local engine
    #[arg(long, env = "COMPOZA_REMOTE", value_name = "URL")]
    pub remote: Option<Url>,
}
