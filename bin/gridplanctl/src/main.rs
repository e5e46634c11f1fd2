//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Command line front end for mini-grid layout planning."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use gridplan_common::{init_tracing, PlannerConfig, StorageConfig};
use gridplan_core::store::CsvGridStore;
use tracing::debug;

mod data;
mod plan;
#[cfg(feature = "rest-api")]
mod serve;

const CONFIG_CANDIDATES: [&str; 2] = ["gridplan.toml", "config/gridplan.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Mini-grid distribution layout planner",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        global = true,
        help = "Path to configuration file"
    )]
    config: Option<PathBuf>,

    #[arg(
        long = "data-dir",
        value_name = "DIR",
        global = true,
        help = "Directory holding the node, link and summary tables"
    )]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Place poles and wire the stored consumers")]
    Optimize(plan::OptimizeCommand),
    #[command(about = "Move consumers that are cheaper standalone to solar-home-systems")]
    IdentifyShs(plan::IdentifyShsCommand),
    #[command(about = "Remove every stored node inside a polygon")]
    RemoveBoundary(plan::RemoveBoundaryCommand),
    #[command(about = "Replace the stored tables with a JSON grid document")]
    Import(data::ImportCommand),
    #[command(about = "Export the stored layout as JSON reports or a grid document")]
    Export(data::ExportCommand),
    #[command(about = "Print the recorded run summaries")]
    Summary(data::SummaryCommand),
    #[cfg(feature = "rest-api")]
    #[command(about = "Serve the planning API over HTTP")]
    Serve(serve::ServeCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
        config.storage.validate()?;
    }
    init_tracing("gridplanctl", &config.logging)?;

    match cli.command {
        Commands::Optimize(cmd) => cmd.execute(&config)?,
        Commands::IdentifyShs(cmd) => cmd.execute(&config)?,
        Commands::RemoveBoundary(cmd) => cmd.execute(&config)?,
        Commands::Import(cmd) => cmd.execute(&config)?,
        Commands::Export(cmd) => cmd.execute(&config)?,
        Commands::Summary(cmd) => cmd.execute(&config)?,
        #[cfg(feature = "rest-api")]
        Commands::Serve(cmd) => cmd.execute(&config)?,
    }
    Ok(())
}

/// An explicit `--config` must exist. Otherwise the usual candidates are
/// tried and the defaults apply when none is present.
fn load_config(explicit: Option<&Path>) -> Result<PlannerConfig> {
    if let Some(path) = explicit {
        return PlannerConfig::from_path(path);
    }
    let loaded = PlannerConfig::load_or_default(&CONFIG_CANDIDATES)?;
    if let Some(source) = &loaded.source {
        debug!(config_path = %source.display(), "configuration loaded");
    }
    Ok(loaded.config)
}

pub(crate) fn open_store(storage: &StorageConfig) -> CsvGridStore {
    CsvGridStore::new(
        storage.nodes_path(),
        storage.links_path(),
        storage.summary_path(),
    )
}
